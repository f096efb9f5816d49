//! 小时级访问统计（PV/UV/UIP）

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "link_access_stats")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub full_short_url: String,
    pub date: Date,
    pub hour: i32,
    pub weekday: i32,
    pub pv: i64,
    pub uv: i64,
    pub uip: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
