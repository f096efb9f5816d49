//! 访问日志与首访判重表迁移
//!
//! - link_access_logs: message_id 唯一，作为重复消费的数据库兜底
//! - link_first_visits: (full_short_url, visitor) 唯一

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(LinkAccessLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(LinkAccessLogs::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(LinkAccessLogs::FullShortUrl)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(LinkAccessLogs::Visitor).string_len(64).null())
                    .col(ColumnDef::new(LinkAccessLogs::Ip).string_len(45).null())
                    .col(ColumnDef::new(LinkAccessLogs::Browser).string_len(64).null())
                    .col(ColumnDef::new(LinkAccessLogs::Os).string_len(64).null())
                    .col(ColumnDef::new(LinkAccessLogs::Network).string_len(64).null())
                    .col(ColumnDef::new(LinkAccessLogs::Device).string_len(64).null())
                    .col(ColumnDef::new(LinkAccessLogs::Locale).string_len(255).null())
                    .col(
                        ColumnDef::new(LinkAccessLogs::FirstFlag)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(LinkAccessLogs::MessageId)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(LinkAccessLogs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("uk_access_logs_message_id")
                    .table(LinkAccessLogs::Table)
                    .col(LinkAccessLogs::MessageId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_access_logs_url_time")
                    .table(LinkAccessLogs::Table)
                    .col(LinkAccessLogs::FullShortUrl)
                    .col(LinkAccessLogs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(LinkFirstVisits::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(LinkFirstVisits::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(LinkFirstVisits::FullShortUrl)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(LinkFirstVisits::Visitor)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(LinkFirstVisits::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("uk_first_visits_url_visitor")
                    .table(LinkFirstVisits::Table)
                    .col(LinkFirstVisits::FullShortUrl)
                    .col(LinkFirstVisits::Visitor)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("uk_first_visits_url_visitor").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(LinkFirstVisits::Table).to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_access_logs_url_time").to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("uk_access_logs_message_id").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(LinkAccessLogs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum LinkAccessLogs {
    #[sea_orm(iden = "link_access_logs")]
    Table,
    Id,
    FullShortUrl,
    Visitor,
    Ip,
    Browser,
    Os,
    Network,
    Device,
    Locale,
    FirstFlag,
    MessageId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum LinkFirstVisits {
    #[sea_orm(iden = "link_first_visits")]
    Table,
    Id,
    FullShortUrl,
    Visitor,
    CreatedAt,
}
