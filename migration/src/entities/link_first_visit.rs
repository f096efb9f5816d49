//! 首次访问判重实体，(full_short_url, visitor) 唯一

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "link_first_visits")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub full_short_url: String,
    pub visitor: String,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
