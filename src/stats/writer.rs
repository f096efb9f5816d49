//! 单条访问事件的落库
//!
//! 去重计数和地理查询在事务外完成，其余写入在同一事务内：
//! 首次访问 → 访问日志（message_id 唯一）→ 维度汇总 → 小时汇总 → 链接聚合。
//! 访问日志唯一键冲突说明此前已完整落库，整个事务回滚并视为成功。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveValue::Set, ConnectionTrait, DatabaseBackend, EntityTrait, ExprTrait, IdenStatic,
    QueryTrait, SqlErr, Statement, TransactionTrait,
    sea_query::{Expr, OnConflict},
};
use tracing::{debug, info};

use super::aggregate::{AggregateDelta, LinkAggregator};
use super::bucket::TimeBucket;
use super::record::StatsRecord;
use super::{WriteError, dimension};
use crate::config::StatsConfig;
use crate::counter::UniqueCounter;
use crate::errors::Result;
use crate::keys::KeySpace;
use crate::lock::ReadLockService;
use crate::services::{GeoInfo, GeoIpLookup};
use crate::storage::SeaOrmStorage;
use crate::storage::backend::retry;

use migration::entities::{
    link_access_log, link_access_stats, link_browser_stats, link_device_stats,
    link_first_visit, link_locale_stats, link_network_stats, link_os_stats,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Applied,
    /// 访问日志已存在，本次没有产生任何写入
    AlreadyApplied,
}

/// 一次访问在事务前已确定的全部输入
struct Visit<'a> {
    record: &'a StatsRecord,
    message_id: &'a str,
    event_time: DateTime<Utc>,
    bucket: TimeBucket,
    geo: GeoInfo,
    uv_delta: u8,
    uip_delta: u8,
}

pub struct StatsWriter {
    storage: Arc<SeaOrmStorage>,
    counter: Arc<dyn UniqueCounter>,
    geo: Arc<dyn GeoIpLookup>,
    aggregator: LinkAggregator,
    keys: KeySpace,
    utc_offset_secs: i32,
    hll_ttl_secs: u64,
}

impl StatsWriter {
    pub fn new(
        storage: Arc<SeaOrmStorage>,
        counter: Arc<dyn UniqueCounter>,
        geo: Arc<dyn GeoIpLookup>,
        locks: Arc<dyn ReadLockService>,
        keys: KeySpace,
        config: &StatsConfig,
    ) -> Self {
        Self {
            storage,
            counter,
            geo,
            aggregator: LinkAggregator::new(locks, keys.clone(), config),
            keys,
            utc_offset_secs: config.utc_offset_secs,
            hll_ttl_secs: config.hll_ttl_secs,
        }
    }

    pub fn aggregator(&self) -> &LinkAggregator {
        &self.aggregator
    }

    pub async fn save(&self, record: &StatsRecord, message_id: &str) -> Result<SaveOutcome> {
        let url = record.full_short_url.as_str();
        let event_time = record.event_time_or_now();
        let bucket = TimeBucket::resolve(event_time, self.utc_offset_secs);

        let uv_delta = self
            .counter
            .add_and_delta(
                &self.keys.uv_set(bucket.parity, url),
                &self.keys.uv_active(bucket.parity),
                record.visitor().unwrap_or_default(),
                url,
                self.hll_ttl_secs,
            )
            .await?;
        let uip_delta = self
            .counter
            .add_and_delta(
                &self.keys.uip_set(bucket.parity, url),
                &self.keys.uip_active(bucket.parity),
                record.client_ip().unwrap_or_default(),
                url,
                self.hll_ttl_secs,
            )
            .await?;

        let geo = match record.client_ip() {
            Some(ip) => self.geo.lookup(ip).await.unwrap_or_default(),
            None => GeoInfo::default(),
        };

        let visit = Visit {
            record,
            message_id,
            event_time,
            bucket,
            geo,
            uv_delta,
            uip_delta,
        };

        let outcome = retry::with_retry("stats_save", self.storage.retry_config(), || {
            self.apply(&visit)
        })
        .await?;

        if outcome == SaveOutcome::AlreadyApplied {
            info!("Message {} already persisted (access log exists), skip", message_id);
        } else {
            debug!(
                "Stats saved for {} (message={}, uv+{}, uip+{})",
                url, message_id, uv_delta, uip_delta
            );
        }
        Ok(outcome)
    }

    async fn apply(&self, visit: &Visit<'_>) -> std::result::Result<SaveOutcome, WriteError> {
        let txn = self.storage.get_db().begin().await?;
        let backend = txn.get_database_backend();
        let url = visit.record.full_short_url.as_str();

        let first_visit = match visit.record.visitor() {
            Some(visitor) => insert_first_visit(&txn, url, visitor, visit.event_time).await?,
            None => false,
        };

        let log = link_access_log::ActiveModel {
            full_short_url: Set(url.to_string()),
            visitor: Set(visit.record.visitor().map(String::from)),
            ip: Set(visit.record.client_ip().map(String::from)),
            browser: Set(visit.record.browser.clone()),
            os: Set(visit.record.os.clone()),
            network: Set(visit.geo.isp.clone()),
            device: Set(visit.record.device.clone()),
            locale: Set(visit.geo.locale()),
            first_flag: Set(first_visit),
            message_id: Set(visit.message_id.to_string()),
            created_at: Set(visit.event_time),
            ..Default::default()
        };
        if let Err(e) = link_access_log::Entity::insert(log)
            .exec_without_returning(&txn)
            .await
        {
            if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                txn.rollback().await?;
                return Ok(SaveOutcome::AlreadyApplied);
            }
            return Err(e.into());
        }

        upsert_rollups(&txn, backend, visit).await?;

        self.aggregator
            .update(
                &txn,
                url,
                AggregateDelta {
                    pv: 1,
                    uv: visit.uv_delta as i64,
                    uip: visit.uip_delta as i64,
                },
            )
            .await?;

        txn.commit().await?;
        Ok(SaveOutcome::Applied)
    }
}

/// 冲突忽略插入，返回本次是否为首次访问
async fn insert_first_visit<C: ConnectionTrait>(
    db: &C,
    full_short_url: &str,
    visitor: &str,
    event_time: DateTime<Utc>,
) -> std::result::Result<bool, WriteError> {
    let stmt = first_visit_insert(db.get_database_backend(), full_short_url, visitor, event_time);
    let result = db.execute_raw(stmt).await?;
    Ok(result.rows_affected() > 0)
}

/// 首次访问的插入语句
///
/// MySQL 使用 `INSERT IGNORE`，其余后端使用 `ON CONFLICT DO NOTHING`。
/// 两者在唯一键冲突时影响行数都是 0。
fn first_visit_insert(
    backend: DatabaseBackend,
    full_short_url: &str,
    visitor: &str,
    event_time: DateTime<Utc>,
) -> Statement {
    let mut insert = link_first_visit::Entity::insert(link_first_visit::ActiveModel {
        full_short_url: Set(full_short_url.to_string()),
        visitor: Set(visitor.to_string()),
        created_at: Set(event_time),
        ..Default::default()
    });
    match backend {
        DatabaseBackend::MySql => {
            let mut stmt = insert.build(backend);
            stmt.sql = stmt.sql.replacen("INSERT ", "INSERT IGNORE ", 1);
            stmt
        }
        _ => {
            insert = insert.on_conflict(
                OnConflict::columns([
                    link_first_visit::Column::FullShortUrl,
                    link_first_visit::Column::Visitor,
                ])
                .do_nothing()
                .to_owned(),
            );
            insert.build(backend)
        }
    }
}

/// 冲突时把计数列累加到已有行
///
/// SQLite/PostgreSQL: `tbl.cnt = tbl.cnt + excluded.cnt`
/// MySQL: `tbl.cnt = tbl.cnt + VALUES(cnt)`
fn increment_on_conflict<E: EntityTrait>(
    backend: DatabaseBackend,
    keys: impl IntoIterator<Item = E::Column>,
    counters: &[E::Column],
) -> OnConflict {
    let mut on_conflict = OnConflict::columns(keys);
    for column in counters {
        let incoming = match backend {
            DatabaseBackend::MySql => format!("VALUES({})", column.as_str()),
            _ => format!("excluded.{}", column.as_str()),
        };
        on_conflict.value(
            *column,
            Expr::col((E::default(), *column)).add(Expr::cust(incoming)),
        );
    }
    on_conflict
}

/// 单维度汇总：(链接, 日期, 维度值) 唯一，cnt 累加 1
macro_rules! upsert_dimension {
    ($db:expr, $backend:expr, $module:ident, $column:ident, $field:ident, $url:expr, $date:expr, $value:expr) => {
        $module::Entity::insert($module::ActiveModel {
            full_short_url: Set($url.to_string()),
            date: Set($date),
            $field: Set($value),
            cnt: Set(1),
            ..Default::default()
        })
        .on_conflict(increment_on_conflict::<$module::Entity>(
            $backend,
            [
                $module::Column::FullShortUrl,
                $module::Column::Date,
                $module::Column::$column,
            ],
            &[$module::Column::Cnt],
        ))
        .exec_without_returning($db)
        .await?
    };
}

async fn upsert_rollups<C: ConnectionTrait>(
    db: &C,
    backend: DatabaseBackend,
    visit: &Visit<'_>,
) -> std::result::Result<(), WriteError> {
    let url = visit.record.full_short_url.as_str();
    let date = visit.bucket.date;
    let geo = &visit.geo;

    link_locale_stats::Entity::insert(link_locale_stats::ActiveModel {
        full_short_url: Set(url.to_string()),
        date: Set(date),
        country: Set(dimension(geo.country.as_deref())),
        province: Set(dimension(geo.province.as_deref())),
        city: Set(dimension(geo.city.as_deref())),
        adcode: Set(dimension(geo.adcode.as_deref())),
        cnt: Set(1),
        ..Default::default()
    })
    .on_conflict(increment_on_conflict::<link_locale_stats::Entity>(
        backend,
        [
            link_locale_stats::Column::FullShortUrl,
            link_locale_stats::Column::Date,
            link_locale_stats::Column::Country,
            link_locale_stats::Column::Province,
            link_locale_stats::Column::City,
        ],
        &[link_locale_stats::Column::Cnt],
    ))
    .exec_without_returning(db)
    .await?;

    upsert_dimension!(
        db, backend, link_os_stats, Os, os, url, date,
        dimension(visit.record.os.as_deref())
    );
    upsert_dimension!(
        db, backend, link_browser_stats, Browser, browser, url, date,
        dimension(visit.record.browser.as_deref())
    );
    upsert_dimension!(
        db, backend, link_device_stats, Device, device, url, date,
        dimension(visit.record.device.as_deref())
    );
    upsert_dimension!(
        db, backend, link_network_stats, Network, network, url, date,
        dimension(geo.isp.as_deref())
    );

    link_access_stats::Entity::insert(link_access_stats::ActiveModel {
        full_short_url: Set(url.to_string()),
        date: Set(date),
        hour: Set(visit.bucket.hour),
        weekday: Set(visit.bucket.weekday),
        pv: Set(1),
        uv: Set(visit.uv_delta as i64),
        uip: Set(visit.uip_delta as i64),
        ..Default::default()
    })
    .on_conflict(increment_on_conflict::<link_access_stats::Entity>(
        backend,
        [
            link_access_stats::Column::FullShortUrl,
            link_access_stats::Column::Date,
            link_access_stats::Column::Hour,
        ],
        &[
            link_access_stats::Column::Pv,
            link_access_stats::Column::Uv,
            link_access_stats::Column::Uip,
        ],
    ))
    .exec_without_returning(db)
    .await?;

    Ok(())
}
