//! 短链接跳转路由实体，gid 的权威来源

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "link_gotos")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub gid: String,
    #[sea_orm(unique)]
    pub full_short_url: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
