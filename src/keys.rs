//! Redis key 布局
//!
//! 所有 key 都带配置的前缀，内存后端使用同样的 key 以保持行为一致。

use crate::config::StaticConfig;

#[derive(Debug, Clone)]
pub struct KeySpace {
    prefix: String,
    stream: String,
    recover_cursor: String,
}

impl KeySpace {
    pub fn new(prefix: &str, stream_key: &str, cursor_key: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            stream: format!("{}{}", prefix, stream_key),
            recover_cursor: format!("{}{}", prefix, cursor_key),
        }
    }

    pub fn from_config(config: &StaticConfig) -> Self {
        Self::new(
            &config.redis.key_prefix,
            &config.stream.key,
            &config.recovery.cursor_key,
        )
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn recover_cursor(&self) -> &str {
        &self.recover_cursor
    }

    pub fn idempotent(&self, message_id: &str) -> String {
        format!("{}stats:idempotent:{}", self.prefix, message_id)
    }

    pub fn uv_set(&self, bucket: u8, full_short_url: &str) -> String {
        format!("{}stats:uv:{}:{}", self.prefix, bucket, full_short_url)
    }

    pub fn uip_set(&self, bucket: u8, full_short_url: &str) -> String {
        format!("{}stats:uip:{}:{}", self.prefix, bucket, full_short_url)
    }

    pub fn uv_active(&self, bucket: u8) -> String {
        format!("{}stats:uv:active:{}", self.prefix, bucket)
    }

    pub fn uip_active(&self, bucket: u8) -> String {
        format!("{}stats:uip:active:{}", self.prefix, bucket)
    }

    /// gid 迁移读写锁的名字，写端由链接管理服务持有
    pub fn gid_lock(&self, full_short_url: &str) -> String {
        format!("{}lock:gid-update:{}", self.prefix, full_short_url)
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::from_config(&StaticConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let keys = KeySpace::default();
        assert_eq!(keys.stream(), "short-link:stats-stream");
        assert_eq!(keys.recover_cursor(), "short-link:stats-stream:recover-cursor");
        assert_eq!(keys.idempotent("1-0"), "short-link:stats:idempotent:1-0");
        assert_eq!(keys.uv_set(1, "s.io/abc"), "short-link:stats:uv:1:s.io/abc");
        assert_eq!(keys.uip_active(0), "short-link:stats:uip:active:0");
        assert_eq!(keys.gid_lock("s.io/abc"), "short-link:lock:gid-update:s.io/abc");
    }
}
