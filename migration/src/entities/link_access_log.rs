//! Access log entity, one row per stream message

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "link_access_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub full_short_url: String,
    pub visitor: Option<String>,
    pub ip: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub network: Option<String>,
    pub device: Option<String>,
    pub locale: Option<String>,
    pub first_flag: bool,
    /// Stream message id (unique, DB-level dedupe)
    #[sea_orm(unique)]
    pub message_id: String,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
