//! 短链接聚合实体（gid 分区下的 PV/UV/UIP 累计值）

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "links")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub gid: String,
    #[sea_orm(unique)]
    pub full_short_url: String,
    #[sea_orm(column_type = "Text")]
    pub origin_url: String,
    pub total_pv: i64,
    pub total_uv: i64,
    pub total_uip: i64,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
