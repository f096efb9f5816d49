//! 启动装配
//!
//! 按配置选择 Redis 或内存后端，组装统计写入、消息处理、调度和后台任务。

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::RedisStore;
use crate::config::{BackendKind, StaticConfig};
use crate::consumer::{Dispatcher, MessageHandler};
use crate::counter::{MemoryUniqueCounter, RedisUniqueCounter, UniqueCounter};
use crate::idempotency::{
    IdempotencyGate, IdempotencyStore, MemoryIdempotencyStore, RedisIdempotencyStore,
};
use crate::keys::KeySpace;
use crate::lock::{MemoryLockService, ReadLockService, RedisLockService};
use crate::services::{GeoIpLookup, GeoIpProvider};
use crate::stats::StatsWriter;
use crate::storage::{SeaOrmStorage, StorageFactory};
use crate::stream::{CursorStore, EventLog, MemoryEventLog, RedisEventLog};
use crate::tasks::{RecoveryTask, RetentionTask};

/// 事件流、幂等标记、去重计数、读锁的具体实现
#[derive(Clone)]
pub struct Backends {
    pub log: Arc<dyn EventLog>,
    pub cursors: Arc<dyn CursorStore>,
    pub markers: Arc<dyn IdempotencyStore>,
    pub counter: Arc<dyn UniqueCounter>,
    pub locks: Arc<dyn ReadLockService>,
}

impl Backends {
    pub async fn connect(config: &StaticConfig) -> Result<Self> {
        match config.stream.backend {
            BackendKind::Redis => Self::redis(config).await,
            BackendKind::Memory => Ok(Self::memory(config)),
        }
    }

    pub async fn redis(config: &StaticConfig) -> Result<Self> {
        let store = RedisStore::connect(&config.redis)
            .await
            .context("Failed to connect to Redis")?;
        let log = Arc::new(RedisEventLog::new(store.clone()));

        Ok(Self {
            log: log.clone(),
            cursors: log,
            markers: Arc::new(RedisIdempotencyStore::new(
                store.clone(),
                config.idempotency.processing_ttl_secs,
                config.idempotency.accomplished_ttl_secs,
            )),
            counter: Arc::new(RedisUniqueCounter::new(store.clone())),
            locks: Arc::new(RedisLockService::new(
                store,
                Duration::from_millis(config.stats.lock_lease_ms),
            )),
        })
    }

    /// 单进程后端，重启后状态丢失
    pub fn memory(config: &StaticConfig) -> Self {
        let log = Arc::new(MemoryEventLog::new());
        Self {
            log: log.clone(),
            cursors: log,
            markers: Arc::new(MemoryIdempotencyStore::new(
                Duration::from_secs(config.idempotency.processing_ttl_secs),
                Duration::from_secs(config.idempotency.accomplished_ttl_secs),
            )),
            counter: Arc::new(MemoryUniqueCounter::new()),
            locks: Arc::new(MemoryLockService::new()),
        }
    }
}

/// 装配完成的统计流水线
pub struct Pipeline {
    pub storage: Arc<SeaOrmStorage>,
    pub backends: Backends,
    pub keys: KeySpace,
    pub handler: Arc<MessageHandler>,
    pub dispatcher: Arc<Dispatcher>,
    pub recovery: Arc<RecoveryTask>,
    pub retention: Arc<RetentionTask>,
    recovery_enabled: bool,
    retention_enabled: bool,
}

impl Pipeline {
    pub fn assemble(
        config: &StaticConfig,
        storage: Arc<SeaOrmStorage>,
        backends: Backends,
        geo: Arc<dyn GeoIpLookup>,
    ) -> Self {
        let keys = KeySpace::from_config(config);
        let stream = keys.stream().to_string();
        let group = config.stream.group.clone();

        let writer = Arc::new(StatsWriter::new(
            storage.clone(),
            backends.counter.clone(),
            geo,
            backends.locks.clone(),
            keys.clone(),
            &config.stats,
        ));
        let handler = Arc::new(MessageHandler::new(
            backends.log.clone(),
            IdempotencyGate::new(backends.markers.clone(), keys.clone()),
            writer,
            stream.clone(),
            group.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            backends.log.clone(),
            handler.clone(),
            stream.clone(),
            &config.stream,
        ));
        let recovery = Arc::new(RecoveryTask::new(
            backends.log.clone(),
            backends.cursors.clone(),
            handler.clone(),
            stream.clone(),
            group.clone(),
            keys.recover_cursor(),
            &config.recovery,
        ));
        let retention = Arc::new(RetentionTask::new(
            backends.log.clone(),
            stream,
            group,
            &config.retention,
        ));

        Self {
            storage,
            backends,
            keys,
            handler,
            dispatcher,
            recovery,
            retention,
            recovery_enabled: config.recovery.enabled,
            retention_enabled: config.retention.enabled,
        }
    }

    /// 启动消费者与后台任务
    pub async fn start(&self, shutdown: watch::Receiver<bool>) -> crate::errors::Result<Vec<JoinHandle<()>>> {
        let mut handles = self.dispatcher.start(shutdown.clone()).await?;

        if self.recovery_enabled {
            handles.push(self.recovery.clone().spawn(shutdown.clone()));
        } else {
            info!("PEL recovery task is disabled");
        }
        if self.retention_enabled {
            handles.push(self.retention.clone().spawn(shutdown));
        } else {
            info!("Stream cleanup task is disabled");
        }
        Ok(handles)
    }
}

/// 连接数据库与后端并装配流水线
pub async fn prepare_pipeline(config: &StaticConfig) -> Result<Pipeline> {
    let start_time = std::time::Instant::now();
    debug!("Starting pre-startup processing...");

    let storage = StorageFactory::create(&config.database)
        .await
        .context("Failed to create storage backend")?;
    info!("Using storage backend: {}", storage.backend_name());

    let backends = Backends::connect(config)
        .await
        .context("Failed to initialize stream backends")?;
    info!("Using stream backend: {}", backends.log.backend_name());

    let geo = GeoIpProvider::new(&config.analytics);
    debug!("GeoIP provider: {}", geo.provider_name());

    let pipeline = Pipeline::assemble(config, storage, backends, Arc::new(geo));
    debug!(
        "Pre-startup processing completed in {} ms",
        start_time.elapsed().as_millis()
    );
    Ok(pipeline)
}
