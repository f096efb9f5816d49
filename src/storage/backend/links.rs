//! 短链接与 gid 映射的读写
//!
//! 链接本身由链接管理服务维护，这里只提供统计端需要的查询，
//! 以及测试和本地运行时用到的建链/换组操作。

use chrono::Utc;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter, TransactionTrait,
    sea_query::Expr,
};
use tracing::info;

use super::SeaOrmStorage;
use crate::errors::{Result, StatsError};

use migration::entities::{link, link_goto};

impl SeaOrmStorage {
    /// 创建短链接及其 goto 映射
    pub async fn create_link(&self, gid: &str, full_short_url: &str, origin_url: &str) -> Result<()> {
        let txn = self.db.begin().await?;

        link::Entity::insert(link::ActiveModel {
            gid: Set(gid.to_string()),
            full_short_url: Set(full_short_url.to_string()),
            origin_url: Set(origin_url.to_string()),
            total_pv: Set(0),
            total_uv: Set(0),
            total_uip: Set(0),
            created_at: Set(Utc::now()),
            ..Default::default()
        })
        .exec_without_returning(&txn)
        .await?;

        link_goto::Entity::insert(link_goto::ActiveModel {
            gid: Set(gid.to_string()),
            full_short_url: Set(full_short_url.to_string()),
            ..Default::default()
        })
        .exec_without_returning(&txn)
        .await?;

        txn.commit().await?;
        info!("Link created: {} (gid={})", full_short_url, gid);
        Ok(())
    }

    /// 查询链接聚合记录
    pub async fn find_link(&self, full_short_url: &str) -> Result<Option<link::Model>> {
        Ok(link::Entity::find()
            .filter(link::Column::FullShortUrl.eq(full_short_url))
            .one(&self.db)
            .await?)
    }

    /// 把链接迁移到新分组
    ///
    /// 调用方负责持有该链接的 gid 写锁
    pub async fn change_link_group(&self, full_short_url: &str, new_gid: &str) -> Result<()> {
        let txn = self.db.begin().await?;

        let updated = link::Entity::update_many()
            .col_expr(link::Column::Gid, Expr::val(new_gid))
            .filter(link::Column::FullShortUrl.eq(full_short_url))
            .exec(&txn)
            .await?;
        if updated.rows_affected == 0 {
            return Err(StatsError::not_found(format!(
                "链接不存在: {}",
                full_short_url
            )));
        }

        link_goto::Entity::update_many()
            .col_expr(link_goto::Column::Gid, Expr::val(new_gid))
            .filter(link_goto::Column::FullShortUrl.eq(full_short_url))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        info!("Link {} moved to gid={}", full_short_url, new_gid);
        Ok(())
    }
}

