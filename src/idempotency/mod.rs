//! 幂等标记
//!
//! 每条消息一个三态标记：不存在 → 处理中 → 已完成。
//! 首次检查原子地写入“处理中”，标记只靠 TTL 过期，成功后不主动删除。

pub mod memory;
pub mod redis;

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::Result;
use crate::keys::KeySpace;

pub use memory::MemoryIdempotencyStore;
pub use self::redis::RedisIdempotencyStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerState {
    /// 此前不存在，本次调用已写入“处理中”
    Absent,
    InProgress,
    Accomplished,
}

/// 标记存储，任何支持原子 check-and-set 和 TTL 的 KV 都可以实现
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// 不存在时原子地写入“处理中”并返回 `Absent`，否则返回现有状态
    async fn check_state(&self, key: &str) -> Result<MarkerState>;

    /// 写入“已完成”
    async fn mark_done(&self, key: &str) -> Result<()>;

    /// 删除标记，让重试不被永久阻塞
    async fn release(&self, key: &str) -> Result<()>;
}

/// 按消息 id 访问幂等标记
#[derive(Clone)]
pub struct IdempotencyGate {
    store: Arc<dyn IdempotencyStore>,
    keys: KeySpace,
}

impl IdempotencyGate {
    pub fn new(store: Arc<dyn IdempotencyStore>, keys: KeySpace) -> Self {
        Self { store, keys }
    }

    /// 检查并占用：返回调用前的状态
    pub async fn check(&self, message_id: &str) -> Result<MarkerState> {
        self.store.check_state(&self.keys.idempotent(message_id)).await
    }

    /// 是否已有其他尝试处理过（首次调用会占用该消息）
    pub async fn is_processed(&self, message_id: &str) -> Result<bool> {
        Ok(self.check(message_id).await? != MarkerState::Absent)
    }

    pub async fn is_accomplished(&self, message_id: &str) -> Result<bool> {
        Ok(self.check(message_id).await? == MarkerState::Accomplished)
    }

    pub async fn mark_accomplished(&self, message_id: &str) -> Result<()> {
        self.store.mark_done(&self.keys.idempotent(message_id)).await
    }

    pub async fn release(&self, message_id: &str) -> Result<()> {
        self.store.release(&self.keys.idempotent(message_id)).await
    }
}
