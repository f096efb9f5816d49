use async_trait::async_trait;
use redis::Script;

use super::UniqueCounter;
use crate::cache::RedisStore;
use crate::errors::{Result, StatsError};

const HLL_ADD_DELTA_SCRIPT: &str = include_str!("lua/hll_count_add_delta.lua");

/// HyperLogLog 去重计数，整个读-加-读过程在一个脚本里完成
pub struct RedisUniqueCounter {
    store: RedisStore,
    script: Script,
}

impl RedisUniqueCounter {
    pub fn new(store: RedisStore) -> Self {
        Self {
            store,
            script: Script::new(HLL_ADD_DELTA_SCRIPT),
        }
    }
}

#[async_trait]
impl UniqueCounter for RedisUniqueCounter {
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

        let mut conn = self.store.connection();
        let delta: i64 = self
            .script
            .prepare_invoke()
            .key(set_key)
            .key(active_key)
            .arg(member)
            .arg(owner)
            .arg(ttl_secs)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StatsError::script(format!("hll_count_add_delta failed: {}", e)))?;

        Ok(u8::from(delta > 0))
    }
}
