use std::time::Duration;

use redis::AsyncConnectionConfig;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use tracing::{debug, error};

use crate::config::RedisConfig;
use crate::errors::{Result, StatsError};

/// Redis 连接句柄
///
/// 共享操作走 `ConnectionManager`（断线自动重连）；
/// 阻塞读取需要独占连接，通过 `dedicated_connection` 单独建立。
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    manager: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.clone()).map_err(|e| {
            StatsError::cache_connection(format!("Invalid Redis URL {}: {}", config.url, e))
        })?;

        let mut manager = ConnectionManager::new(client.clone()).await.map_err(|e| {
            error!(
                "Failed to connect to Redis: {}. Check Redis server status and URL: {}",
                e, config.url
            );
            StatsError::cache_connection(format!("Redis connect failed: {}", e))
        })?;

        let pong: String = redis::cmd("PING")
            .query_async(&mut manager)
            .await
            .map_err(|e| StatsError::cache_connection(format!("Redis ping failed: {}", e)))?;
        debug!("Redis connection test successful: {}", pong);

        Ok(Self { client, manager })
    }

    /// 共享的多路复用连接（克隆开销很小）
    pub fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// 新建一条独占连接
    ///
    /// `response_timeout` 必须大于在这条连接上发出的最长 BLOCK 时间，
    /// 否则服务端已经投递的消息会在客户端超时后丢失在 PEL 里。
    pub async fn dedicated_connection(
        &self,
        response_timeout: Duration,
    ) -> Result<MultiplexedConnection> {
        let config = AsyncConnectionConfig::new().set_response_timeout(Some(response_timeout));
        let conn = self
            .client
            .get_multiplexed_async_connection_with_config(&config)
            .await?;
        debug!(
            "Dedicated Redis connection established (response timeout {:?})",
            response_timeout
        );
        Ok(conn)
    }
}

/// 把 Redis 返回值解析为字符串（BulkString / SimpleString / Int）
pub(crate) fn value_to_string(value: &redis::Value) -> Option<String> {
    match value {
        redis::Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        redis::Value::SimpleString(s) => Some(s.clone()),
        redis::Value::Int(n) => Some(n.to_string()),
        redis::Value::Okay => Some("OK".to_string()),
        _ => None,
    }
}

/// 把 Redis 返回值解析为整数
pub(crate) fn value_to_i64(value: &redis::Value) -> Option<i64> {
    match value {
        redis::Value::Int(n) => Some(*n),
        redis::Value::BulkString(bytes) => std::str::from_utf8(bytes).ok()?.trim().parse().ok(),
        redis::Value::SimpleString(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_to_string() {
        assert_eq!(
            value_to_string(&redis::Value::BulkString(b"1-0".to_vec())),
            Some("1-0".to_string())
        );
        assert_eq!(value_to_string(&redis::Value::Int(7)), Some("7".to_string()));
        assert_eq!(value_to_string(&redis::Value::Nil), None);
    }

    #[test]
    fn test_value_to_i64() {
        assert_eq!(value_to_i64(&redis::Value::Int(1)), Some(1));
        assert_eq!(value_to_i64(&redis::Value::BulkString(b"12".to_vec())), Some(12));
        assert_eq!(value_to_i64(&redis::Value::Nil), None);
    }
}
