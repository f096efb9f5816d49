use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use super::{LockGuard, LockRelease, ReadLockService};
use crate::errors::{Result, StatsError};

type LockMap = Arc<DashMap<String, Arc<RwLock<()>>>>;

/// 没有任何持有者或等待者时移除该名字的锁
fn prune(locks: &LockMap, name: &str) {
    locks.remove_if(name, |_, lock| Arc::strong_count(lock) == 1);
}

struct ReadRelease {
    guard: OwnedRwLockReadGuard<()>,
    locks: LockMap,
    name: String,
}

#[async_trait]
impl LockRelease for ReadRelease {
    async fn release(self: Box<Self>) -> Result<()> {
        let ReadRelease { guard, locks, name } = *self;
        drop(guard);
        prune(&locks, &name);
        Ok(())
    }
}

struct WriteRelease {
    guard: OwnedRwLockWriteGuard<()>,
    locks: LockMap,
    name: String,
}

#[async_trait]
impl LockRelease for WriteRelease {
    async fn release(self: Box<Self>) -> Result<()> {
        let WriteRelease { guard, locks, name } = *self;
        drop(guard);
        prune(&locks, &name);
        Ok(())
    }
}

/// 进程内读写锁，按名字懒创建，最后一个持有者释放后移除
#[derive(Default)]
pub struct MemoryLockService {
    locks: LockMap,
}

impl MemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, name: &str) -> Arc<RwLock<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// 当前登记的锁名数量
    pub fn tracked(&self) -> usize {
        self.locks.len()
    }

    /// 写锁，供修改 gid 的一方使用
    pub async fn write_lock(&self, name: &str, wait: Duration) -> Result<LockGuard> {
        let lock = self.lock_for(name);
        let acquired = tokio::time::timeout(wait, lock.write_owned()).await;
        let Ok(guard) = acquired else {
            prune(&self.locks, name);
            return Err(StatsError::lock(format!("Timed out waiting for write lock '{}'", name)));
        };
        Ok(LockGuard::new(
            name,
            Box::new(WriteRelease {
                guard,
                locks: self.locks.clone(),
                name: name.to_string(),
            }),
        ))
    }
}

#[async_trait]
impl ReadLockService for MemoryLockService {
    async fn read_lock(&self, name: &str, wait: Duration) -> Result<LockGuard> {
        let lock = self.lock_for(name);
        let acquired = tokio::time::timeout(wait, lock.read_owned()).await;
        let Ok(guard) = acquired else {
            prune(&self.locks, name);
            return Err(StatsError::lock(format!("Timed out waiting for read lock '{}'", name)));
        };
        Ok(LockGuard::new(
            name,
            Box::new(ReadRelease {
                guard,
                locks: self.locks.clone(),
                name: name.to_string(),
            }),
        ))
    }
}
