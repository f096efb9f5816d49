//! 去重计数
//!
//! `add_and_delta` 把成员加入概率集合，基数增长时返回 1，否则返回 0。
//! 同时把集合所属的链接登记到活跃索引，两者一起续期。

pub mod memory;
pub mod redis;

use async_trait::async_trait;

use crate::errors::Result;

pub use memory::MemoryUniqueCounter;
pub use self::redis::RedisUniqueCounter;

#[async_trait]
pub trait UniqueCounter: Send + Sync {
    /// 空白成员直接返回 0，不触碰任何 key
    async fn add_and_delta(
        &self,
        set_key: &str,
        active_key: &str,
        member: &str,
        owner: &str,
        ttl_secs: u64,
    ) -> Result<u8>;
}
