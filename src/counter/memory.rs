use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::UniqueCounter;
use crate::errors::Result;

#[derive(Debug)]
struct ExpiringSet {
    members: HashSet<String>,
    expires_at: Instant,
}

impl ExpiringSet {
    fn new(ttl: Duration) -> Self {
        Self {
            members: HashSet::new(),
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// 每累计这么多次写入清理一次过期集合
const PURGE_INTERVAL: u64 = 1024;

/// 精确集合实现（单实例），与 HyperLogLog 返回值语义相同
#[derive(Default)]
pub struct MemoryUniqueCounter {
    sets: DashMap<String, ExpiringSet>,
    writes: AtomicU64,
}

impl MemoryUniqueCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 某个 key 当前的成员数（过期视为 0）
    pub fn cardinality(&self, key: &str) -> usize {
        let now = Instant::now();
        self.sets
            .get(key)
            .filter(|s| !s.is_expired(now))
            .map(|s| s.members.len())
            .unwrap_or(0)
    }

    /// 活跃索引中是否登记了 owner
    pub fn is_active(&self, active_key: &str, owner: &str) -> bool {
        let now = Instant::now();
        self.sets
            .get(active_key)
            .filter(|s| !s.is_expired(now))
            .is_some_and(|s| s.members.contains(owner))
    }

    /// 当前保留的集合数量（含尚未清理的过期集合）
    pub fn tracked(&self) -> usize {
        self.sets.len()
    }

    fn purge_expired(&self) {
        let now = Instant::now();
        self.sets.retain(|_, set| !set.is_expired(now));
    }

    fn add(&self, key: &str, member: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut set = self
            .sets
            .entry(key.to_string())
            .or_insert_with(|| ExpiringSet::new(ttl));
        if set.is_expired(now) {
            *set = ExpiringSet::new(ttl);
        }
        set.expires_at = now + ttl;
        set.members.insert(member.to_string())
    }
}

#[async_trait]
impl UniqueCounter for MemoryUniqueCounter {
    async fn add_and_delta(
        &self,
        set_key: &str,
        active_key: &str,
        member: &str,
        owner: &str,
        ttl_secs: u64,
    ) -> Result<u8> {
        if member.trim().is_empty() {
            return Ok(0);
        }

        if self.writes.fetch_add(1, Ordering::Relaxed) % PURGE_INTERVAL == PURGE_INTERVAL - 1 {
            self.purge_expired();
        }

        let ttl = Duration::from_secs(ttl_secs);
        let added = self.add(set_key, member, ttl);
        self.add(active_key, owner, ttl);
        Ok(u8::from(added))
    }
}
