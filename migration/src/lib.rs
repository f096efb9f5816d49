pub use sea_orm_migration::prelude::*;

pub mod entities;
mod m20261016_000001_link_tables;
mod m20261016_000002_access_logs;
mod m20261016_000003_stats_rollups;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261016_000001_link_tables::Migration),
            Box::new(m20261016_000002_access_logs::Migration),
            Box::new(m20261016_000003_stats_rollups::Migration),
        ]
    }
}
