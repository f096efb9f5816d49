use std::time::Duration;

use async_trait::async_trait;
use redis::Script;
use tokio::time::Instant;
use tracing::debug;

use super::{LockGuard, LockRelease, ReadLockService};
use crate::cache::RedisStore;
use crate::errors::{Result, StatsError};

const READ_ACQUIRE_SCRIPT: &str = include_str!("lua/read_lock_acquire.lua");
const READ_RELEASE_SCRIPT: &str = include_str!("lua/read_lock_release.lua");

/// 获取失败后的重试间隔
const RETRY_INTERVAL: Duration = Duration::from_millis(25);

fn reader_key(name: &str) -> String {
    format!("{}:read", name)
}

fn writer_key(name: &str) -> String {
    format!("{}:write", name)
}

/// 基于 Redis 的读锁，读端计数带租约，持有者崩溃后自动过期
///
/// 写锁键 `{name}:write` 由修改 gid 的一方设置，存在时读锁获取失败
#[derive(Clone)]
pub struct RedisLockService {
    store: RedisStore,
    lease: Duration,
    read_acquire: Script,
    read_release: Script,
}

impl RedisLockService {
    pub fn new(store: RedisStore, lease: Duration) -> Self {
        Self {
            store,
            lease,
            read_acquire: Script::new(READ_ACQUIRE_SCRIPT),
            read_release: Script::new(READ_RELEASE_SCRIPT),
        }
    }

    async fn try_read(&self, name: &str) -> Result<bool> {
        let mut conn = self.store.connection();
        let acquired: i64 = self
            .read_acquire
            .prepare_invoke()
            .key(reader_key(name))
            .key(writer_key(name))
            .arg(self.lease.as_millis() as u64)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StatsError::lock(format!("read_lock_acquire({}) failed: {}", name, e)))?;
        Ok(acquired == 1)
    }
}

struct RedisReadRelease {
    service: RedisLockService,
    name: String,
}

#[async_trait]
impl LockRelease for RedisReadRelease {
    async fn release(self: Box<Self>) -> Result<()> {
        let mut conn = self.service.store.connection();
        let remaining: i64 = self
            .service
            .read_release
            .prepare_invoke()
            .key(reader_key(&self.name))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                StatsError::lock(format!("read_lock_release({}) failed: {}", self.name, e))
            })?;
        debug!("Read lock '{}' released, {} readers left", self.name, remaining);
        Ok(())
    }
}

#[async_trait]
impl ReadLockService for RedisLockService {
    async fn read_lock(&self, name: &str, wait: Duration) -> Result<LockGuard> {
        let deadline = Instant::now() + wait;
        loop {
            if self.try_read(name).await? {
                return Ok(LockGuard::new(
                    name,
                    Box::new(RedisReadRelease {
                        service: self.clone(),
                        name: name.to_string(),
                    }),
                ));
            }
            if Instant::now() >= deadline {
                return Err(StatsError::lock(format!(
                    "Timed out waiting for read lock '{}'",
                    name
                )));
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }
}
