use async_trait::async_trait;
use redis::Script;

use super::{IdempotencyStore, MarkerState};
use crate::cache::RedisStore;
use crate::errors::{Result, StatsError};

const CHECK_STATE_SCRIPT: &str = include_str!("lua/marker_check_state.lua");

/// Redis 幂等标记：值 "0" 表示处理中，"1" 表示已完成
pub struct RedisIdempotencyStore {
    store: RedisStore,
    check_script: Script,
    processing_ttl_secs: u64,
    accomplished_ttl_secs: u64,
}

impl RedisIdempotencyStore {
    pub fn new(store: RedisStore, processing_ttl_secs: u64, accomplished_ttl_secs: u64) -> Self {
        Self {
            store,
            check_script: Script::new(CHECK_STATE_SCRIPT),
            processing_ttl_secs,
            accomplished_ttl_secs,
        }
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn check_state(&self, key: &str) -> Result<MarkerState> {
        let mut conn = self.store.connection();
        let state: i64 = self
            .check_script
            .prepare_invoke()
            .key(key)
            .arg(self.processing_ttl_secs)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StatsError::idempotency(format!("check_state({}) failed: {}", key, e)))?;

        Ok(match state {
            -1 => MarkerState::Absent,
            1 => MarkerState::Accomplished,
            _ => MarkerState::InProgress,
        })
    }

    async fn mark_done(&self, key: &str) -> Result<()> {
        let mut conn = self.store.connection();
        let _: redis::Value = redis::cmd("SET")
            .arg(key)
            .arg("1")
            .arg("EX")
            .arg(self.accomplished_ttl_secs)
            .query_async(&mut conn)
            .await
            .map_err(|e| StatsError::idempotency(format!("mark_done({}) failed: {}", key, e)))?;
        Ok(())
    }

    async fn release(&self, key: &str) -> Result<()> {
        let mut conn = self.store.connection();
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| StatsError::idempotency(format!("release({}) failed: {}", key, e)))?;
        Ok(())
    }
}
