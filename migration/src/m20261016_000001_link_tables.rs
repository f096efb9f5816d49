//! 短链接主表与跳转表迁移
//!
//! - links: 以 (gid, full_short_url) 定位，保存 PV/UV/UIP 累计值
//! - link_gotos: full_short_url → gid 的权威映射

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Links::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Links::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Links::Gid).string_len(32).not_null())
                    .col(
                        ColumnDef::new(Links::FullShortUrl)
                            .string_len(255)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Links::OriginUrl).text().not_null())
                    .col(
                        ColumnDef::new(Links::TotalPv)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Links::TotalUv)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Links::TotalUip)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Links::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 条件累加按 (gid, full_short_url) 命中
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_links_gid_url")
                    .table(Links::Table)
                    .col(Links::Gid)
                    .col(Links::FullShortUrl)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(LinkGotos::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(LinkGotos::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(LinkGotos::Gid).string_len(32).not_null())
                    .col(
                        ColumnDef::new(LinkGotos::FullShortUrl)
                            .string_len(255)
                            .not_null()
                            .unique_key(),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(LinkGotos::Table).to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_links_gid_url").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Links::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Links {
    #[sea_orm(iden = "links")]
    Table,
    Id,
    Gid,
    FullShortUrl,
    OriginUrl,
    TotalPv,
    TotalUv,
    TotalUip,
    CreatedAt,
}

#[derive(DeriveIden)]
enum LinkGotos {
    #[sea_orm(iden = "link_gotos")]
    Table,
    Id,
    Gid,
    FullShortUrl,
}
