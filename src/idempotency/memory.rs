use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::sync::Cache;

use super::{IdempotencyStore, MarkerState};
use crate::errors::Result;

#[derive(Debug, Clone, Copy)]
struct Marker {
    accomplished: bool,
    ttl: Duration,
}

/// 每个标记自带 TTL，状态更新时重新计时
struct MarkerExpiry;

impl Expiry<String, Marker> for MarkerExpiry {
    fn expire_after_create(&self, _key: &String, value: &Marker, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Marker,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// 进程内幂等标记（单实例）
pub struct MemoryIdempotencyStore {
    markers: Cache<String, Marker>,
    processing_ttl: Duration,
    accomplished_ttl: Duration,
}

impl MemoryIdempotencyStore {
    pub fn new(processing_ttl: Duration, accomplished_ttl: Duration) -> Self {
        Self {
            markers: Cache::builder()
                .max_capacity(1_000_000)
                .expire_after(MarkerExpiry)
                .build(),
            processing_ttl,
            accomplished_ttl,
        }
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn check_state(&self, key: &str) -> Result<MarkerState> {
        let processing_ttl = self.processing_ttl;
        let entry = self.markers.entry(key.to_string()).or_insert_with(|| Marker {
            accomplished: false,
            ttl: processing_ttl,
        });

        Ok(if entry.is_fresh() {
            MarkerState::Absent
        } else if entry.value().accomplished {
            MarkerState::Accomplished
        } else {
            MarkerState::InProgress
        })
    }

    async fn mark_done(&self, key: &str) -> Result<()> {
        self.markers.insert(
            key.to_string(),
            Marker {
                accomplished: true,
                ttl: self.accomplished_ttl,
            },
        );
        Ok(())
    }

    async fn release(&self, key: &str) -> Result<()> {
        self.markers.invalidate(key);
        Ok(())
    }
}
