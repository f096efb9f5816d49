//! 链接聚合累加
//!
//! 累加条件同时带 gid 和 full_short_url，gid 过期时更新命中 0 行而不会写错分区。
//! 热路径走本地 gid 缓存；缓存未命中或过期时，在 gid 读锁内重新解析再试一次。

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, ExprTrait, QueryFilter, sea_query::Expr,
};
use tracing::{debug, warn};

use super::WriteError;
use crate::config::StatsConfig;
use crate::keys::KeySpace;
use crate::lock::ReadLockService;

use migration::entities::{link, link_goto};

/// 一次访问对链接累计值的增量
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateDelta {
    pub pv: i64,
    pub uv: i64,
    pub uip: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOutcome {
    /// 缓存的 gid 直接命中
    CachedGid,
    /// 在读锁内重新解析 gid 后命中
    ResolvedGid,
    /// 链接已被并发删除，跳过
    LinkMissing,
}

pub struct LinkAggregator {
    gid_cache: Cache<String, String>,
    locks: Arc<dyn ReadLockService>,
    keys: KeySpace,
    lock_wait: Duration,
}

impl LinkAggregator {
    pub fn new(locks: Arc<dyn ReadLockService>, keys: KeySpace, config: &StatsConfig) -> Self {
        let gid_cache = Cache::builder()
            .max_capacity(config.gid_cache_capacity)
            .time_to_live(Duration::from_secs(config.gid_cache_ttl_secs))
            .build();

        Self {
            gid_cache,
            locks,
            keys,
            lock_wait: Duration::from_millis(config.lock_wait_ms),
        }
    }

    /// 链接管理端修改 gid 后调用
    pub fn invalidate_gid_cache(&self, full_short_url: &str) {
        self.gid_cache.invalidate(full_short_url);
    }

    pub fn cached_gid(&self, full_short_url: &str) -> Option<String> {
        self.gid_cache.get(full_short_url)
    }

    /// 在调用方的事务内累加链接聚合值
    pub async fn update<C: ConnectionTrait>(
        &self,
        db: &C,
        full_short_url: &str,
        delta: AggregateDelta,
    ) -> Result<AggregateOutcome, WriteError> {
        if let Some(gid) = self.gid_cache.get(full_short_url) {
            if increment(db, &gid, full_short_url, delta).await? > 0 {
                return Ok(AggregateOutcome::CachedGid);
            }
            debug!(
                "Cached gid '{}' for {} is stale, resolving under read lock",
                gid, full_short_url
            );
            self.gid_cache.invalidate(full_short_url);
        }

        let guard = self
            .locks
            .read_lock(&self.keys.gid_lock(full_short_url), self.lock_wait)
            .await?;
        let result = self.update_locked(db, full_short_url, delta).await;
        if let Err(e) = guard.release().await {
            warn!("Failed to release gid read lock for {}: {}", full_short_url, e);
        }
        result
    }

    async fn update_locked<C: ConnectionTrait>(
        &self,
        db: &C,
        full_short_url: &str,
        delta: AggregateDelta,
    ) -> Result<AggregateOutcome, WriteError> {
        let goto = link_goto::Entity::find()
            .filter(link_goto::Column::FullShortUrl.eq(full_short_url))
            .one(db)
            .await?;
        let Some(goto) = goto else {
            warn!(
                "Link goto record not found for {}, skipping aggregate update",
                full_short_url
            );
            return Ok(AggregateOutcome::LinkMissing);
        };

        self.gid_cache
            .insert(full_short_url.to_string(), goto.gid.clone());

        if increment(db, &goto.gid, full_short_url, delta).await? == 0 {
            warn!(
                "Aggregate update matched no link for {} (gid={}), skipping",
                full_short_url, goto.gid
            );
            return Ok(AggregateOutcome::LinkMissing);
        }
        Ok(AggregateOutcome::ResolvedGid)
    }
}

/// 条件累加，返回影响行数
async fn increment<C: ConnectionTrait>(
    db: &C,
    gid: &str,
    full_short_url: &str,
    delta: AggregateDelta,
) -> Result<u64, WriteError> {
    let result = link::Entity::update_many()
        .col_expr(
            link::Column::TotalPv,
            Expr::col(link::Column::TotalPv).add(Expr::val(delta.pv)),
        )
        .col_expr(
            link::Column::TotalUv,
            Expr::col(link::Column::TotalUv).add(Expr::val(delta.uv)),
        )
        .col_expr(
            link::Column::TotalUip,
            Expr::col(link::Column::TotalUip).add(Expr::val(delta.uip)),
        )
        .filter(link::Column::Gid.eq(gid))
        .filter(link::Column::FullShortUrl.eq(full_short_url))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::lock::MemoryLockService;
    use crate::storage::SeaOrmStorage;

    const URL: &str = "s.io/abc123";
    const ONE: AggregateDelta = AggregateDelta {
        pv: 1,
        uv: 1,
        uip: 0,
    };

    async fn setup() -> (tempfile::TempDir, SeaOrmStorage, LinkAggregator) {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            database_url: dir.path().join("agg.db").to_string_lossy().to_string(),
            ..DatabaseConfig::default()
        };
        let storage = SeaOrmStorage::new(&config).await.unwrap();
        let aggregator = LinkAggregator::new(
            Arc::new(MemoryLockService::new()),
            KeySpace::default(),
            &StatsConfig::default(),
        );
        (dir, storage, aggregator)
    }

    #[tokio::test]
    async fn test_cache_miss_then_hit() {
        let (_dir, storage, aggregator) = setup().await;
        storage.create_link("g1", URL, "https://example.com").await.unwrap();

        let first = aggregator.update(storage.get_db(), URL, ONE).await.unwrap();
        assert_eq!(first, AggregateOutcome::ResolvedGid);
        assert_eq!(aggregator.cached_gid(URL).as_deref(), Some("g1"));

        let second = aggregator.update(storage.get_db(), URL, ONE).await.unwrap();
        assert_eq!(second, AggregateOutcome::CachedGid);

        let link = storage.find_link(URL).await.unwrap().unwrap();
        assert_eq!((link.total_pv, link.total_uv, link.total_uip), (2, 2, 0));
    }

    #[tokio::test]
    async fn test_invalidated_gid_is_resolved_again() {
        let (_dir, storage, aggregator) = setup().await;
        storage.create_link("g1", URL, "https://example.com").await.unwrap();
        aggregator.update(storage.get_db(), URL, ONE).await.unwrap();
        assert_eq!(aggregator.cached_gid(URL).as_deref(), Some("g1"));

        aggregator.invalidate_gid_cache(URL);
        assert!(aggregator.cached_gid(URL).is_none());

        let outcome = aggregator.update(storage.get_db(), URL, ONE).await.unwrap();
        assert_eq!(outcome, AggregateOutcome::ResolvedGid);
        assert_eq!(aggregator.cached_gid(URL).as_deref(), Some("g1"));

        let link = storage.find_link(URL).await.unwrap().unwrap();
        assert_eq!(link.total_pv, 2);
    }

    #[tokio::test]
    async fn test_stale_gid_is_re_resolved() {
        let (_dir, storage, aggregator) = setup().await;
        storage.create_link("g1", URL, "https://example.com").await.unwrap();
        aggregator.update(storage.get_db(), URL, ONE).await.unwrap();

        storage.change_link_group(URL, "g2").await.unwrap();
        assert_eq!(aggregator.cached_gid(URL).as_deref(), Some("g1"));

        let outcome = aggregator.update(storage.get_db(), URL, ONE).await.unwrap();
        assert_eq!(outcome, AggregateOutcome::ResolvedGid);
        assert_eq!(aggregator.cached_gid(URL).as_deref(), Some("g2"));

        let link = storage.find_link(URL).await.unwrap().unwrap();
        assert_eq!(link.gid, "g2");
        assert_eq!(link.total_pv, 2);
    }

    #[tokio::test]
    async fn test_missing_link_is_benign() {
        let (_dir, storage, aggregator) = setup().await;

        let outcome = aggregator.update(storage.get_db(), URL, ONE).await.unwrap();
        assert_eq!(outcome, AggregateOutcome::LinkMissing);
        assert!(aggregator.cached_gid(URL).is_none());
    }

    #[tokio::test]
    async fn test_write_lock_blocks_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            database_url: dir.path().join("agg.db").to_string_lossy().to_string(),
            ..DatabaseConfig::default()
        };
        let storage = SeaOrmStorage::new(&config).await.unwrap();
        storage.create_link("g1", URL, "https://example.com").await.unwrap();

        let locks = Arc::new(MemoryLockService::new());
        let aggregator = LinkAggregator::new(
            locks.clone(),
            KeySpace::default(),
            &StatsConfig {
                lock_wait_ms: 50,
                ..StatsConfig::default()
            },
        );

        let writer = locks
            .write_lock(&KeySpace::default().gid_lock(URL), Duration::from_secs(1))
            .await
            .unwrap();
        let err = aggregator.update(storage.get_db(), URL, ONE).await.unwrap_err();
        assert!(matches!(err, WriteError::Stats(_)));
        writer.release().await.unwrap();

        let outcome = aggregator.update(storage.get_db(), URL, ONE).await.unwrap();
        assert_eq!(outcome, AggregateOutcome::ResolvedGid);
    }
}
