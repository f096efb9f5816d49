//! 集成测试公共工具
//!
//! 临时 SQLite + 内存后端装配完整流水线，不需要 Redis 和网络。

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;

use linkstats::config::{BackendKind, StaticConfig};
use linkstats::runtime::lifetime::{Backends, Pipeline};
use linkstats::services::{GeoInfo, GeoIpLookup};
use linkstats::stats::StatsRecord;
use linkstats::storage::StorageFactory;
pub use linkstats::stream::EventLog;
use linkstats::stream::{StreamEvent, StreamId};

pub const GROUP: &str = "stats-group";

/// 只认识 1.2.3.4 的地理位置服务
pub struct FixedGeo;

#[async_trait]
impl GeoIpLookup for FixedGeo {
    async fn lookup(&self, ip: &str) -> Option<GeoInfo> {
        (ip == "1.2.3.4").then(|| GeoInfo {
            country: Some("中国".to_string()),
            province: Some("浙江省".to_string()),
            city: Some("杭州市".to_string()),
            adcode: Some("330100".to_string()),
            isp: Some("电信".to_string()),
        })
    }

    fn name(&self) -> &'static str {
        "Fixed"
    }
}

pub fn test_config(dir: &TempDir) -> StaticConfig {
    let mut config = StaticConfig::default();
    config.database.database_url = dir.path().join("stats.db").to_string_lossy().to_string();
    config.stream.backend = BackendKind::Memory;
    config.stream.group = GROUP.to_string();
    config.stream.block_ms = 20;
    config.stream.max_workers = 4;
    config.analytics.enable_geo_lookup = false;
    config.recovery.min_idle_ms = 50;
    config.retention.keep_count = 0;
    config
}

/// 按配置装配一条使用内存后端的流水线，并创建消费组
pub async fn pipeline(config: &StaticConfig) -> Pipeline {
    let storage = StorageFactory::create(&config.database).await.unwrap();
    pipeline_with_storage(config, storage).await
}

pub async fn pipeline_with_storage(
    config: &StaticConfig,
    storage: Arc<linkstats::storage::SeaOrmStorage>,
) -> Pipeline {
    let pipeline = Pipeline::assemble(config, storage, Backends::memory(config), Arc::new(FixedGeo));
    pipeline
        .backends
        .log
        .ensure_group(pipeline.keys.stream(), GROUP)
        .await
        .unwrap();
    pipeline
}

pub fn event_at(url: &str, uv: &str, ip: &str, millis: i64) -> StatsRecord {
    StatsRecord {
        full_short_url: url.to_string(),
        uv: Some(uv.to_string()),
        uip: Some(ip.to_string()),
        browser: Some("Safari".to_string()),
        os: Some("iOS".to_string()),
        device: Some("mobile".to_string()),
        current_date: DateTime::<Utc>::from_timestamp_millis(millis),
    }
}

pub fn event(url: &str, uv: &str, ip: &str) -> StatsRecord {
    event_at(url, uv, ip, 1_700_000_000_000)
}

pub async fn publish(pipeline: &Pipeline, record: &StatsRecord) -> StreamId {
    pipeline
        .backends
        .log
        .append(pipeline.keys.stream(), &record.into_fields().unwrap())
        .await
        .unwrap()
}

/// 以指定消费者身份读取新消息但不处理，模拟读取后崩溃
pub async fn read_without_handling(pipeline: &Pipeline, consumer: &str, count: usize) -> Vec<StreamEvent> {
    pipeline
        .backends
        .log
        .read_group(
            pipeline.keys.stream(),
            GROUP,
            consumer,
            count,
            Duration::from_millis(10),
        )
        .await
        .unwrap()
}

pub async fn pending(pipeline: &Pipeline) -> u64 {
    pipeline
        .backends
        .log
        .pending_count(pipeline.keys.stream(), GROUP)
        .await
        .unwrap()
}
