//! Redis Stream 后端
//!
//! 阻塞读取使用每个消费者独占的连接，其余命令走共享的 ConnectionManager。
//! 认领与裁剪各用一个 Lua 脚本，保证读-改之间没有竞态。

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::Script;
use redis::aio::MultiplexedConnection;
use tracing::{debug, info, warn};

use super::{AutoClaimBatch, CursorStore, EventLog, StreamEvent, StreamId};
use crate::cache::RedisStore;
use crate::cache::redis::{value_to_i64, value_to_string};
use crate::errors::{Result, StatsError};

const AUTOCLAIM_SCRIPT: &str = include_str!("lua/stream_autoclaim.lua");
const TRIM_MINID_SCRIPT: &str = include_str!("lua/stream_trim_minid.lua");

/// 读连接的响应超时比 BLOCK 多出的余量
pub const READ_TIMEOUT_MARGIN: Duration = Duration::from_secs(2);

/// 阻塞读取连接的客户端响应超时
pub fn read_response_timeout(block: Duration) -> Duration {
    block + READ_TIMEOUT_MARGIN
}

pub struct RedisEventLog {
    store: RedisStore,
    /// 消费者名 -> 独占读连接
    readers: DashMap<String, MultiplexedConnection>,
    autoclaim_script: Script,
    trim_script: Script,
}

impl RedisEventLog {
    pub fn new(store: RedisStore) -> Self {
        Self {
            store,
            readers: DashMap::new(),
            autoclaim_script: Script::new(AUTOCLAIM_SCRIPT),
            trim_script: Script::new(TRIM_MINID_SCRIPT),
        }
    }

    async fn reader(&self, consumer: &str, block: Duration) -> Result<MultiplexedConnection> {
        if let Some(conn) = self.readers.get(consumer) {
            return Ok(conn.clone());
        }
        let conn = self
            .store
            .dedicated_connection(read_response_timeout(block))
            .await?;
        self.readers.insert(consumer.to_string(), conn.clone());
        Ok(conn)
    }

    /// 读取已投递给该消费者但尚未确认的消息（ID 从 0 开始，不阻塞）
    async fn read_own_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEvent>> {
        let mut conn = self.reader(consumer, block).await?;
        let value: redis::Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("STREAMS")
            .arg(stream)
            .arg("0")
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                self.readers.remove(consumer);
                StatsError::stream_operation(format!(
                    "XREADGROUP {} as {} (pending history) failed: {}",
                    stream, consumer, e
                ))
            })?;
        Ok(parse_read_reply(&value))
    }
}

#[async_trait]
impl EventLog for RedisEventLog {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()> {
        let mut conn = self.store.connection();
        let result: redis::RedisResult<redis::Value> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => {
                info!("Consumer group '{}' created on stream '{}'", group, stream);
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") || e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group '{}' already exists", group);
                Ok(())
            }
            Err(e) => Err(StatsError::stream_operation(format!(
                "XGROUP CREATE {} {} failed: {}",
                stream, group, e
            ))),
        }
    }

    async fn append(&self, stream: &str, fields: &[(String, String)]) -> Result<StreamId> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream).arg("*");
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }

        let mut conn = self.store.connection();
        let id: String = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| StatsError::stream_operation(format!("XADD {} failed: {}", stream, e)))?;
        id.parse()
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEvent>> {
        let mut conn = self.reader(consumer, block).await?;
        let block_ms = block.as_millis().max(1) as u64;

        let reply: redis::RedisResult<redis::Value> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(stream)
            .arg(">")
            .query_async(&mut conn)
            .await;

        match reply {
            Ok(value) => Ok(parse_read_reply(&value)),
            Err(e) => {
                self.readers.remove(consumer);
                if e.is_timeout() {
                    // 服务端可能已把消息记入本消费者的 PEL，从历史位置补读
                    warn!(
                        "XREADGROUP {} as {} timed out, re-reading own pending entries",
                        stream, consumer
                    );
                    return self.read_own_pending(stream, group, consumer, count, block).await;
                }
                Err(StatsError::stream_operation(format!(
                    "XREADGROUP {} as {} failed: {}",
                    stream, consumer, e
                )))
            }
        }
    }

    async fn acknowledge(&self, stream: &str, group: &str, id: &StreamId) -> Result<bool> {
        let mut conn = self.store.connection();
        let acked: i64 = redis::cmd("XACK")
            .arg(stream)
            .arg(group)
            .arg(id.to_string())
            .query_async(&mut conn)
            .await
            .map_err(|e| StatsError::stream_operation(format!("XACK {} failed: {}", id, e)))?;
        Ok(acked > 0)
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
        let mut conn = self.store.connection();
        let reply: redis::Value = self
            .autoclaim_script
            .prepare_invoke()
            .key(stream)
            .arg(group)
            .arg(claimant)
            .arg(min_idle.as_millis() as u64)
            .arg(cursor.to_string())
            .arg(count)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StatsError::script(format!("stream_autoclaim failed: {}", e)))?;

        parse_autoclaim_reply(&reply)
    }

    async fn trim_to_min_id(&self, stream: &str, group: &str, keep: u64) -> Result<u64> {
        let mut conn = self.store.connection();
        let trimmed: i64 = self
            .trim_script
            .prepare_invoke()
            .key(stream)
            .arg(group)
            .arg(keep)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StatsError::script(format!("stream_trim_minid failed: {}", e)))?;
        Ok(trimmed.max(0) as u64)
    }

    async fn len(&self, stream: &str) -> Result<u64> {
        let mut conn = self.store.connection();
        let len: u64 = redis::cmd("XLEN")
            .arg(stream)
            .query_async(&mut conn)
            .await
            .map_err(|e| StatsError::stream_operation(format!("XLEN {} failed: {}", stream, e)))?;
        Ok(len)
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64> {
        let mut conn = self.store.connection();
        let summary: redis::Value = redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                StatsError::stream_operation(format!("XPENDING {} failed: {}", stream, e))
            })?;

        match summary {
            redis::Value::Array(items) => Ok(items
                .first()
                .and_then(value_to_i64)
                .map(|n| n.max(0) as u64)
                .unwrap_or(0)),
            _ => Ok(0),
        }
    }
}

#[async_trait]
impl CursorStore for RedisEventLog {
    async fn load_cursor(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.store.connection();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value.filter(|v| !v.trim().is_empty()))
    }

    async fn store_cursor(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.store.connection();
        let _: redis::Value = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

/// 解析 XREADGROUP 返回：[[stream, [[id, [f, v, ...]], ...]], ...]
fn parse_read_reply(value: &redis::Value) -> Vec<StreamEvent> {
    let streams: Vec<&redis::Value> = match value {
        redis::Value::Array(streams) => streams
            .iter()
            .filter_map(|s| match s {
                redis::Value::Array(pair) if pair.len() == 2 => Some(&pair[1]),
                _ => None,
            })
            .collect(),
        redis::Value::Map(pairs) => pairs.iter().map(|(_, entries)| entries).collect(),
        _ => return Vec::new(),
    };

    streams.into_iter().flat_map(parse_entries).collect()
}

fn parse_entries(value: &redis::Value) -> Vec<StreamEvent> {
    match value {
        redis::Value::Array(entries) => entries.iter().filter_map(parse_entry).collect(),
        _ => Vec::new(),
    }
}

fn parse_entry(value: &redis::Value) -> Option<StreamEvent> {
    let redis::Value::Array(parts) = value else {
        return None;
    };
    if parts.len() < 2 {
        return None;
    }

    let id: StreamId = value_to_string(&parts[0])?.parse().ok()?;
    let fields = match &parts[1] {
        redis::Value::Array(flat) => flat
            .chunks_exact(2)
            .filter_map(|kv| Some((value_to_string(&kv[0])?, value_to_string(&kv[1])?)))
            .collect(),
        redis::Value::Map(pairs) => pairs
            .iter()
            .filter_map(|(k, v)| Some((value_to_string(k)?, value_to_string(v)?)))
            .collect(),
        _ => return None,
    };

    Some(StreamEvent::new(id, fields))
}

/// 解析认领脚本返回：[next_cursor, [[id, [f, v, ...]], ...]]
fn parse_autoclaim_reply(value: &redis::Value) -> Result<AutoClaimBatch> {
    let redis::Value::Array(parts) = value else {
        return Err(StatsError::script(format!(
            "Unexpected stream_autoclaim reply: {:?}",
            value
        )));
    };

    let next_cursor = match parts.first().and_then(value_to_string) {
        Some(cursor) => cursor.parse()?,
        None => {
            warn!("stream_autoclaim returned no cursor, restarting scan");
            StreamId::ZERO
        }
    };
    let entries = parts.get(1).map(parse_entries).unwrap_or_default();

    Ok(AutoClaimBatch {
        next_cursor,
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::Value;

    fn bulk(s: &str) -> Value {
        Value::BulkString(s.as_bytes().to_vec())
    }

    fn entry(id: &str, fields: &[(&str, &str)]) -> Value {
        let flat = fields
            .iter()
            .flat_map(|(k, v)| [bulk(k), bulk(v)])
            .collect();
        Value::Array(vec![bulk(id), Value::Array(flat)])
    }

    #[test]
    fn test_parse_read_reply() {
        let reply = Value::Array(vec![Value::Array(vec![
            bulk("short-link:stats-stream"),
            Value::Array(vec![
                entry("1-0", &[("statsRecord", "{\"a\":1}")]),
                entry("1-1", &[("statsRecord", "{\"a\":2}")]),
            ]),
        ])]);

        let events = parse_read_reply(&reply);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, StreamId::new(1, 0));
        assert_eq!(events[1].field("statsRecord"), Some("{\"a\":2}"));
    }

    #[test]
    fn test_parse_read_reply_timeout() {
        assert!(parse_read_reply(&Value::Nil).is_empty());
    }

    #[test]
    fn test_parse_autoclaim_reply() {
        let reply = Value::Array(vec![
            bulk("5-0"),
            Value::Array(vec![
                entry("3-0", &[("statsRecord", "{}")]),
                // 已从流中删除的条目没有字段
                Value::Array(vec![bulk("4-0"), Value::Nil]),
            ]),
        ]);

        let batch = parse_autoclaim_reply(&reply).unwrap();
        assert_eq!(batch.next_cursor, StreamId::new(5, 0));
        assert_eq!(batch.entries.len(), 1);
        assert_eq!(batch.entries[0].id, StreamId::new(3, 0));
    }

    #[test]
    fn test_parse_autoclaim_reply_rejects_garbage() {
        assert!(parse_autoclaim_reply(&Value::Int(1)).is_err());
    }

    mod fake_server {
        //! 最小的 RESP2 服务端，只回应连接握手与 XREADGROUP

        use std::time::Duration;

        use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
        use tokio::net::{TcpListener, TcpStream};

        /// 一条 `9-0 n=1` 消息的 XREADGROUP 回复
        const ONE_ENTRY: &str =
            "*1\r\n*2\r\n$1\r\ns\r\n*1\r\n*2\r\n$3\r\n9-0\r\n*2\r\n$1\r\nn\r\n$1\r\n1\r\n";

        /// 启动服务端，返回 redis URL
        ///
        /// `new_delay`: 对 `>` 读取的回复延迟；`history`: 是否对 `0` 读取返回那条消息
        pub async fn spawn(new_delay: Duration, history: bool) -> String {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    tokio::spawn(serve(socket, new_delay, history));
                }
            });
            format!("redis://{}/", addr)
        }

        async fn serve(socket: TcpStream, new_delay: Duration, history: bool) {
            let (read, mut write) = socket.into_split();
            let mut reader = BufReader::new(read);
            while let Some(args) = read_command(&mut reader).await {
                let reply = match args[0].to_ascii_uppercase().as_str() {
                    "PING" => "+PONG\r\n".to_string(),
                    "XREADGROUP" if args.last().map(String::as_str) == Some(">") => {
                        tokio::time::sleep(new_delay).await;
                        ONE_ENTRY.to_string()
                    }
                    "XREADGROUP" if history => ONE_ENTRY.to_string(),
                    "XREADGROUP" => "*0\r\n".to_string(),
                    _ => "+OK\r\n".to_string(),
                };
                if write.write_all(reply.as_bytes()).await.is_err() {
                    return;
                }
            }
        }

        async fn read_command<R: AsyncBufRead + Unpin>(reader: &mut R) -> Option<Vec<String>> {
            let mut line = String::new();
            if reader.read_line(&mut line).await.ok()? == 0 {
                return None;
            }
            let n: usize = line.trim().strip_prefix('*')?.parse().ok()?;
            let mut args = Vec::with_capacity(n);
            for _ in 0..n {
                line.clear();
                reader.read_line(&mut line).await.ok()?;
                let len: usize = line.trim().strip_prefix('$')?.parse().ok()?;
                let mut buf = vec![0u8; len + 2];
                reader.read_exact(&mut buf).await.ok()?;
                args.push(String::from_utf8_lossy(&buf[..len]).into_owned());
            }
            Some(args)
        }
    }

    async fn connect(url: String) -> RedisEventLog {
        let config = crate::config::RedisConfig {
            url,
            ..Default::default()
        };
        RedisEventLog::new(RedisStore::connect(&config).await.unwrap())
    }

    #[test]
    fn test_read_timeout_exceeds_block() {
        for block_ms in [1, 500, 5_000] {
            let block = Duration::from_millis(block_ms);
            assert!(read_response_timeout(block) > block);
        }
    }

    #[tokio::test]
    async fn test_reply_arriving_at_block_deadline_is_delivered() {
        let url = fake_server::spawn(Duration::from_millis(520), false).await;
        let log = connect(url).await;

        let events = log
            .read_group("s", "g", "c", 10, Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, StreamId::new(9, 0));
        assert_eq!(events[0].field("n"), Some("1"));
    }

    #[tokio::test]
    async fn test_timed_out_read_recovers_own_pending_entries() {
        // 回复晚于响应超时，服务端已经记入 PEL
        let url = fake_server::spawn(Duration::from_secs(5), true).await;
        let log = connect(url).await;

        let events = log
            .read_group("s", "g", "c", 10, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, StreamId::new(9, 0));
    }
}
