//! 多维汇总表迁移
//!
//! 所有汇总表都带 (full_short_url, date, 维度值...) 唯一索引，
//! 写入端依赖它实现 upsert 累加：
//! - link_access_stats: 小时级 PV/UV/UIP
//! - link_locale_stats: 国家/省/市
//! - link_os_stats / link_browser_stats / link_device_stats / link_network_stats

use sea_orm_migration::prelude::*;

/// 单维度汇总表：(表名, 维度列名)
const DIMENSION_TABLES: [(&str, &str); 4] = [
    ("link_os_stats", "os"),
    ("link_browser_stats", "browser"),
    ("link_device_stats", "device"),
    ("link_network_stats", "network"),
];

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // 1. 小时访问统计
        manager
            .create_table(
                Table::create()
                    .table(LinkAccessStats::Table)
                    .if_not_exists()
                    .col(id_column(LinkAccessStats::Id))
                    .col(
                        ColumnDef::new(LinkAccessStats::FullShortUrl)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(LinkAccessStats::Date).date().not_null())
                    .col(ColumnDef::new(LinkAccessStats::Hour).integer().not_null())
                    .col(ColumnDef::new(LinkAccessStats::Weekday).integer().not_null())
                    .col(counter_column(LinkAccessStats::Pv))
                    .col(counter_column(LinkAccessStats::Uv))
                    .col(counter_column(LinkAccessStats::Uip))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("uk_access_stats_url_date_hour")
                    .table(LinkAccessStats::Table)
                    .col(LinkAccessStats::FullShortUrl)
                    .col(LinkAccessStats::Date)
                    .col(LinkAccessStats::Hour)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // 2. 地区统计
        manager
            .create_table(
                Table::create()
                    .table(LinkLocaleStats::Table)
                    .if_not_exists()
                    .col(id_column(LinkLocaleStats::Id))
                    .col(
                        ColumnDef::new(LinkLocaleStats::FullShortUrl)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(LinkLocaleStats::Date).date().not_null())
                    .col(
                        ColumnDef::new(LinkLocaleStats::Country)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(LinkLocaleStats::Province)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(ColumnDef::new(LinkLocaleStats::City).string_len(64).not_null())
                    .col(
                        ColumnDef::new(LinkLocaleStats::Adcode)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(counter_column(LinkLocaleStats::Cnt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("uk_locale_stats_url_date_locale")
                    .table(LinkLocaleStats::Table)
                    .col(LinkLocaleStats::FullShortUrl)
                    .col(LinkLocaleStats::Date)
                    .col(LinkLocaleStats::Country)
                    .col(LinkLocaleStats::Province)
                    .col(LinkLocaleStats::City)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // 3. 单维度统计表
        for (table, column) in DIMENSION_TABLES {
            manager
                .create_table(
                    Table::create()
                        .table(Alias::new(table))
                        .if_not_exists()
                        .col(id_column(DimensionStats::Id))
                        .col(
                            ColumnDef::new(DimensionStats::FullShortUrl)
                                .string_len(255)
                                .not_null(),
                        )
                        .col(ColumnDef::new(DimensionStats::Date).date().not_null())
                        .col(
                            ColumnDef::new(Alias::new(column))
                                .string_len(64)
                                .not_null(),
                        )
                        .col(counter_column(DimensionStats::Cnt))
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name(format!("uk_{}_url_date_value", table))
                        .table(Alias::new(table))
                        .col(DimensionStats::FullShortUrl)
                        .col(DimensionStats::Date)
                        .col(Alias::new(column))
                        .unique()
                        .to_owned(),
                )
                .await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for (table, _) in DIMENSION_TABLES {
            manager
                .drop_table(Table::drop().table(Alias::new(table)).to_owned())
                .await?;
        }

        manager
            .drop_table(Table::drop().table(LinkLocaleStats::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(LinkAccessStats::Table).to_owned())
            .await
    }
}

fn id_column<T: IntoIden>(name: T) -> ColumnDef {
    ColumnDef::new(name)
        .big_integer()
        .not_null()
        .auto_increment()
        .primary_key()
        .to_owned()
}

fn counter_column<T: IntoIden>(name: T) -> ColumnDef {
    ColumnDef::new(name)
        .big_integer()
        .not_null()
        .default(0)
        .to_owned()
}

#[derive(DeriveIden)]
enum LinkAccessStats {
    #[sea_orm(iden = "link_access_stats")]
    Table,
    Id,
    FullShortUrl,
    Date,
    Hour,
    Weekday,
    Pv,
    Uv,
    Uip,
}

#[derive(DeriveIden)]
enum LinkLocaleStats {
    #[sea_orm(iden = "link_locale_stats")]
    Table,
    Id,
    FullShortUrl,
    Date,
    Country,
    Province,
    City,
    Adcode,
    Cnt,
}

#[derive(DeriveIden)]
enum DimensionStats {
    Id,
    FullShortUrl,
    Date,
    Cnt,
}
