//! 统计结果查询（诊断与测试使用）

use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};

use super::SeaOrmStorage;
use crate::errors::Result;

use migration::entities::{
    link_access_log, link_access_stats, link_browser_stats, link_device_stats,
    link_first_visit, link_locale_stats, link_network_stats, link_os_stats,
};

/// 单维度汇总值
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionCount {
    pub value: String,
    pub cnt: i64,
}

/// 小时访问统计按链接求和
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessStatsRow {
    pub pv: i64,
    pub uv: i64,
    pub uip: i64,
}

impl SeaOrmStorage {
    pub async fn count_access_logs(&self, full_short_url: &str) -> Result<u64> {
        Ok(link_access_log::Entity::find()
            .filter(link_access_log::Column::FullShortUrl.eq(full_short_url))
            .count(&self.db)
            .await?)
    }

    /// 按写入顺序返回访问日志
    pub async fn access_logs(&self, full_short_url: &str) -> Result<Vec<link_access_log::Model>> {
        Ok(link_access_log::Entity::find()
            .filter(link_access_log::Column::FullShortUrl.eq(full_short_url))
            .order_by_asc(link_access_log::Column::Id)
            .all(&self.db)
            .await?)
    }

    pub async fn count_first_visits(&self, full_short_url: &str) -> Result<u64> {
        Ok(link_first_visit::Entity::find()
            .filter(link_first_visit::Column::FullShortUrl.eq(full_short_url))
            .count(&self.db)
            .await?)
    }

    pub async fn access_stats_totals(&self, full_short_url: &str) -> Result<AccessStatsRow> {
        let rows = link_access_stats::Entity::find()
            .filter(link_access_stats::Column::FullShortUrl.eq(full_short_url))
            .all(&self.db)
            .await?;

        Ok(rows.iter().fold(AccessStatsRow::default(), |acc, r| AccessStatsRow {
            pv: acc.pv + r.pv,
            uv: acc.uv + r.uv,
            uip: acc.uip + r.uip,
        }))
    }

    pub async fn locale_stats(&self, full_short_url: &str) -> Result<Vec<link_locale_stats::Model>> {
        Ok(link_locale_stats::Entity::find()
            .filter(link_locale_stats::Column::FullShortUrl.eq(full_short_url))
            .all(&self.db)
            .await?)
    }

    pub async fn os_stats(&self, full_short_url: &str) -> Result<Vec<DimensionCount>> {
        let rows = link_os_stats::Entity::find()
            .filter(link_os_stats::Column::FullShortUrl.eq(full_short_url))
            .order_by_asc(link_os_stats::Column::Os)
            .all(&self.db)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| DimensionCount { value: r.os, cnt: r.cnt })
            .collect())
    }

    pub async fn browser_stats(&self, full_short_url: &str) -> Result<Vec<DimensionCount>> {
        let rows = link_browser_stats::Entity::find()
            .filter(link_browser_stats::Column::FullShortUrl.eq(full_short_url))
            .order_by_asc(link_browser_stats::Column::Browser)
            .all(&self.db)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| DimensionCount { value: r.browser, cnt: r.cnt })
            .collect())
    }

    pub async fn device_stats(&self, full_short_url: &str) -> Result<Vec<DimensionCount>> {
        let rows = link_device_stats::Entity::find()
            .filter(link_device_stats::Column::FullShortUrl.eq(full_short_url))
            .order_by_asc(link_device_stats::Column::Device)
            .all(&self.db)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| DimensionCount { value: r.device, cnt: r.cnt })
            .collect())
    }

    pub async fn network_stats(&self, full_short_url: &str) -> Result<Vec<DimensionCount>> {
        let rows = link_network_stats::Entity::find()
            .filter(link_network_stats::Column::FullShortUrl.eq(full_short_url))
            .order_by_asc(link_network_stats::Column::Network)
            .all(&self.db)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| DimensionCount { value: r.network, cnt: r.cnt })
            .collect())
    }
}
