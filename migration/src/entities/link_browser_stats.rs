//! 浏览器维度统计

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "link_browser_stats")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub full_short_url: String,
    pub date: Date,
    pub browser: String,
    pub cnt: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
