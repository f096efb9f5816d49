//! gid 迁移读写锁（读端）
//!
//! 统计端只持有读锁，写锁由修改 gid 的一方持有，读写互斥、读读共享。

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::errors::Result;

pub use memory::MemoryLockService;
pub use self::redis::RedisLockService;

/// 释放动作，由各后端实现
#[async_trait]
pub trait LockRelease: Send {
    async fn release(self: Box<Self>) -> Result<()>;
}

/// 持有中的锁，`release` 后失效
#[must_use = "the lock is released when the guard is released or dropped"]
pub struct LockGuard {
    name: String,
    inner: Option<Box<dyn LockRelease>>,
}

impl LockGuard {
    pub fn new(name: impl Into<String>, inner: Box<dyn LockRelease>) -> Self {
        Self {
            name: name.into(),
            inner: Some(inner),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn release(mut self) -> Result<()> {
        match self.inner.take() {
            Some(inner) => inner.release().await,
            None => Ok(()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.inner.is_some() {
            // Redis 租约到期后自动释放，内存锁随 guard 一起释放
            warn!("Lock '{}' dropped without explicit release", self.name);
        }
    }
}

#[async_trait]
pub trait ReadLockService: Send + Sync {
    /// 获取读锁，等待写锁释放最多 `wait`
    async fn read_lock(&self, name: &str, wait: Duration) -> Result<LockGuard>;
}
