//! 进程内事件流
//!
//! 与 Redis Stream 消费组语义一致：投递即进入 Pending 列表，
//! 确认后移除；认领按空闲时间转移所有权；裁剪不越过最早的 Pending 消息。

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{AutoClaimBatch, CursorStore, EventLog, StreamEvent, StreamId};
use crate::errors::{Result, StatsError};

/// XAUTOCLAIM 每次最多检查 count × 10 条 Pending 记录
const AUTOCLAIM_SCAN_FACTOR: usize = 10;

#[derive(Debug, Clone)]
struct PendingEntry {
    consumer: String,
    delivered_at: Instant,
    delivery_count: u64,
}

#[derive(Debug, Default)]
struct GroupState {
    last_delivered: StreamId,
    pending: BTreeMap<StreamId, PendingEntry>,
}

#[derive(Debug, Default)]
struct StreamState {
    entries: BTreeMap<StreamId, Vec<(String, String)>>,
    last_id: StreamId,
    groups: HashMap<String, GroupState>,
}

impl StreamState {
    fn next_id(&self) -> StreamId {
        let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        if now_ms > self.last_id.ms {
            StreamId::new(now_ms, 0)
        } else {
            self.last_id.successor()
        }
    }
}

/// 进程内事件流（同时实现游标存储）
#[derive(Default)]
pub struct MemoryEventLog {
    streams: Mutex<HashMap<String, StreamState>>,
    appended: Notify,
    cursors: DashMap<String, String>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 某条消息当前的持有者与投递次数（诊断和测试使用）
    pub fn pending_owner(&self, stream: &str, group: &str, id: &StreamId) -> Option<(String, u64)> {
        let streams = self.streams.lock();
        let pending = streams.get(stream)?.groups.get(group)?.pending.get(id)?;
        Some((pending.consumer.clone(), pending.delivery_count))
    }

    /// 当前仍在流中的全部消息 id
    pub fn entry_ids(&self, stream: &str) -> Vec<StreamId> {
        let streams = self.streams.lock();
        streams
            .get(stream)
            .map(|s| s.entries.keys().copied().collect())
            .unwrap_or_default()
    }

    /// 消费组中全部 Pending 消息 id
    pub fn pending_ids(&self, stream: &str, group: &str) -> Vec<StreamId> {
        let streams = self.streams.lock();
        streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.keys().copied().collect())
            .unwrap_or_default()
    }

    fn try_deliver(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEvent>> {
        let mut streams = self.streams.lock();
        let state = streams.get_mut(stream).ok_or_else(|| no_group(stream, group))?;
        let StreamState {
            entries, groups, ..
        } = state;
        let group_state = groups.get_mut(group).ok_or_else(|| no_group(stream, group))?;

        let now = Instant::now();
        let start = group_state.last_delivered.successor();
        let batch: Vec<StreamEvent> = entries
            .range(start..)
            .take(count)
            .map(|(id, fields)| StreamEvent::new(*id, fields.clone()))
            .collect();

        for event in &batch {
            group_state.pending.insert(
                event.id,
                PendingEntry {
                    consumer: consumer.to_string(),
                    delivered_at: now,
                    delivery_count: 1,
                },
            );
            group_state.last_delivered = event.id;
        }

        Ok(batch)
    }
}

fn no_group(stream: &str, group: &str) -> StatsError {
    StatsError::stream_operation(format!(
        "NOGROUP No such key '{}' or consumer group '{}'",
        stream, group
    ))
}

#[async_trait]
impl EventLog for MemoryEventLog {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()> {
        let mut streams = self.streams.lock();
        streams
            .entry(stream.to_string())
            .or_default()
            .groups
            .entry(group.to_string())
            .or_default();
        Ok(())
    }

    async fn append(&self, stream: &str, fields: &[(String, String)]) -> Result<StreamId> {
        let id = {
            let mut streams = self.streams.lock();
            let state = streams.entry(stream.to_string()).or_default();
            let id = state.next_id();
            state.entries.insert(id, fields.to_vec());
            state.last_id = id;
            id
        };
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEvent>> {
        let deadline = Instant::now() + block;
        loop {
            // 先注册唤醒再检查，避免错过检查与等待之间的追加
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.try_deliver(stream, group, consumer, count)?;
            if !batch.is_empty() {
                return Ok(batch);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn acknowledge(&self, stream: &str, group: &str, id: &StreamId) -> Result<bool> {
        let mut streams = self.streams.lock();
        let removed = streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
            .and_then(|g| g.pending.remove(id));
        Ok(removed.is_some())
    }

    async fn auto_claim(
        &self,
        stream: &str,
        group: &str,
        claimant: &str,
        min_idle: Duration,
        cursor: &StreamId,
        count: usize,
    ) -> Result<AutoClaimBatch> {
        let mut streams = self.streams.lock();
        let Some(state) = streams.get_mut(stream) else {
            return Ok(AutoClaimBatch::default());
        };
        let StreamState {
            entries, groups, ..
        } = state;
        let group_state = groups.get_mut(group).ok_or_else(|| no_group(stream, group))?;

        let now = Instant::now();
        let max_scan = count.saturating_mul(AUTOCLAIM_SCAN_FACTOR).max(1);
        let candidates: Vec<StreamId> = group_state
            .pending
            .range(*cursor..)
            .map(|(id, _)| *id)
            .collect();

        let mut claimed = Vec::new();
        let mut scanned = 0usize;
        let mut next_cursor = StreamId::ZERO;

        for id in candidates {
            if claimed.len() >= count || scanned >= max_scan {
                next_cursor = id;
                break;
            }
            scanned += 1;

            let Some(pending) = group_state.pending.get_mut(&id) else {
                continue;
            };
            if now.duration_since(pending.delivered_at) < min_idle {
                continue;
            }

            match entries.get(&id) {
                Some(fields) => {
                    pending.consumer = claimant.to_string();
                    pending.delivered_at = now;
                    pending.delivery_count += 1;
                    claimed.push(StreamEvent::new(id, fields.clone()));
                }
                None => {
                    // 消息已被删除，Pending 记录随之清除
                    group_state.pending.remove(&id);
                }
            }
        }

        Ok(AutoClaimBatch {
            next_cursor,
            entries: claimed,
        })
    }

    async fn trim_to_min_id(&self, stream: &str, group: &str, keep: u64) -> Result<u64> {
        let mut streams = self.streams.lock();
        let Some(state) = streams.get_mut(stream) else {
            return Ok(0);
        };
        let oldest_pending = state
            .groups
            .get(group)
            .ok_or_else(|| no_group(stream, group))?
            .pending
            .keys()
            .next()
            .copied();

        let total = state.entries.len() as u64;
        let mut boundary = if keep == 0 {
            state.entries.keys().next_back().map(|id| id.successor())
        } else if total >= keep {
            state.entries.keys().rev().nth((keep - 1) as usize).copied()
        } else {
            None
        };

        if let (Some(b), Some(p)) = (boundary, oldest_pending)
            && p < b
        {
            boundary = Some(p);
        }

        let Some(boundary) = boundary else {
            return Ok(0);
        };

        let kept = state.entries.split_off(&boundary);
        let trimmed = state.entries.len() as u64;
        state.entries = kept;
        Ok(trimmed)
    }

    async fn len(&self, stream: &str) -> Result<u64> {
        let streams = self.streams.lock();
        Ok(streams
            .get(stream)
            .map(|s| s.entries.len() as u64)
            .unwrap_or(0))
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64> {
        let streams = self.streams.lock();
        let state = streams.get(stream).ok_or_else(|| no_group(stream, group))?;
        let group_state = state
            .groups
            .get(group)
            .ok_or_else(|| no_group(stream, group))?;
        Ok(group_state.pending.len() as u64)
    }
}

#[async_trait]
impl CursorStore for MemoryEventLog {
    async fn load_cursor(&self, key: &str) -> Result<Option<String>> {
        Ok(self.cursors.get(key).map(|v| v.value().clone()))
    }

    async fn store_cursor(&self, key: &str, value: &str) -> Result<()> {
        self.cursors.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
