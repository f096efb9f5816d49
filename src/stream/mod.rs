//! 事件流客户端
//!
//! 对持久化追加日志的最小抽象：追加、消费组读取、确认、
//! 认领超时 Pending 消息、按最小 id 裁剪。
//!
//! - `redis`: Redis Stream + Lua 脚本
//! - `memory`: 进程内实现，语义与 Redis 一致，用于测试和单机运行

pub mod memory;
pub mod redis;

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::{Result, StatsError};

pub use memory::MemoryEventLog;
pub use self::redis::RedisEventLog;

/// Stream 消息 id：`<毫秒>-<序号>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    /// `0-0`，消费组起点和扫描游标的初始值
    pub const ZERO: StreamId = StreamId { ms: 0, seq: 0 };

    pub const fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// 紧随其后的 id
    pub fn successor(&self) -> Self {
        if self.seq == u64::MAX {
            Self::new(self.ms + 1, 0)
        } else {
            Self::new(self.ms, self.seq + 1)
        }
    }
}

impl Ord for StreamId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ms.cmp(&other.ms).then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for StreamId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for StreamId {
    type Err = StatsError;

    /// 接受 `ms-seq` 以及省略序号的 `ms`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (ms, seq) = match s.split_once('-') {
            Some((ms, seq)) => (ms, seq),
            None => (s, "0"),
        };
        let ms = ms
            .parse::<u64>()
            .map_err(|_| StatsError::stream_operation(format!("Invalid stream id: '{}'", s)))?;
        let seq = seq
            .parse::<u64>()
            .map_err(|_| StatsError::stream_operation(format!("Invalid stream id: '{}'", s)))?;
        Ok(Self { ms, seq })
    }
}

/// 一条 Stream 消息：id + 有序字段表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub id: StreamId,
    pub fields: Vec<(String, String)>,
}

impl StreamEvent {
    pub fn new(id: StreamId, fields: Vec<(String, String)>) -> Self {
        Self { id, fields }
    }

    /// 按名字取字段值（重复字段取第一个）
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// 一次认领的结果
#[derive(Debug, Clone, Default)]
pub struct AutoClaimBatch {
    /// 下一轮扫描起点，`0-0` 表示已扫完一圈
    pub next_cursor: StreamId,
    /// 被认领且仍在 Stream 中的消息
    pub entries: Vec<StreamEvent>,
}

/// 事件流客户端
#[async_trait]
pub trait EventLog: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// 创建消费组（流不存在时一并创建），已存在视为成功
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()>;

    /// 追加一条消息，返回分配的 id
    async fn append(&self, stream: &str, fields: &[(String, String)]) -> Result<StreamId>;

    /// 以消费者身份读取未投递过的新消息，最多等待 `block`
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEvent>>;

    /// 确认消息，返回该消息此前是否在 Pending 列表中
    async fn acknowledge(&self, stream: &str, group: &str, id: &StreamId) -> Result<bool>;

    /// 把空闲超过 `min_idle` 的 Pending 消息转移给 `claimant`
    async fn auto_claim(
        &self,
        stream: &str,
        group: &str,
        claimant: &str,
        min_idle: Duration,
        cursor: &StreamId,
        count: usize,
    ) -> Result<AutoClaimBatch>;

    /// 裁剪旧消息，保留所有 Pending 消息和最新 `keep` 条，返回删除条数
    async fn trim_to_min_id(&self, stream: &str, group: &str, keep: u64) -> Result<u64>;

    /// 当前消息条数
    async fn len(&self, stream: &str) -> Result<u64>;

    /// 消费组 Pending 消息条数
    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64>;
}

/// 扫描游标存储
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load_cursor(&self, key: &str) -> Result<Option<String>>;

    async fn store_cursor(&self, key: &str, value: &str) -> Result<()>;
}
