//! 单条消息的处理流程
//!
//! 幂等检查 → 解码 → 落库 → 标记完成 → ACK。
//! 业务失败时删除处理中标记且不 ACK，交给消息队列重投或巡检认领。

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::errors::{Result, StatsError};
use crate::idempotency::{IdempotencyGate, MarkerState};
use crate::stats::{SaveOutcome, StatsRecord, StatsWriter};
use crate::stream::{EventLog, StreamEvent, StreamId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// 正常处理并确认
    Acked,
    /// 此前已完成，只补偿 ACK
    AckOnly,
    /// 数据库已有该消息的访问日志，视为成功并确认
    Duplicate,
}

pub struct MessageHandler {
    log: Arc<dyn EventLog>,
    gate: IdempotencyGate,
    writer: Arc<StatsWriter>,
    stream: String,
    group: String,
}

impl MessageHandler {
    pub fn new(
        log: Arc<dyn EventLog>,
        gate: IdempotencyGate,
        writer: Arc<StatsWriter>,
        stream: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            log,
            gate,
            writer,
            stream: stream.into(),
            group: group.into(),
        }
    }

    pub fn writer(&self) -> &StatsWriter {
        &self.writer
    }

    pub async fn handle(&self, event: &StreamEvent) -> Result<HandleOutcome> {
        let id = event.id.to_string();

        match self.gate.check(&id).await? {
            MarkerState::Accomplished => {
                debug!("Message {} already accomplished, compensating ACK", id);
                self.acknowledge(&event.id).await;
                return Ok(HandleOutcome::AckOnly);
            }
            MarkerState::InProgress => {
                return Err(StatsError::in_flight(format!(
                    "Message {} is still being processed, leaving it pending",
                    id
                )));
            }
            MarkerState::Absent => {}
        }

        let saved = match StatsRecord::from_event(event) {
            Ok(record) => self.writer.save(&record, &id).await,
            Err(e) => Err(e),
        };

        let outcome = match saved {
            Ok(SaveOutcome::Applied) => HandleOutcome::Acked,
            Ok(SaveOutcome::AlreadyApplied) => {
                info!("Message {} already persisted, skip", id);
                HandleOutcome::Duplicate
            }
            Err(e) => {
                if let Err(release_err) = self.gate.release(&id).await {
                    warn!(
                        "Failed to release idempotency marker for {}: {}",
                        id, release_err
                    );
                }
                error!("Failed to process message {}, it will be retried: {}", id, e);
                return Err(e);
            }
        };

        if let Err(e) = self.gate.mark_accomplished(&id).await {
            error!(
                "Failed to mark message {} accomplished after success, acknowledging anyway: {}",
                id, e
            );
        }
        self.acknowledge(&event.id).await;

        Ok(outcome)
    }

    /// ACK 失败不影响结果，PEL 巡检会补偿
    async fn acknowledge(&self, id: &StreamId) {
        match self.log.acknowledge(&self.stream, &self.group, id).await {
            Ok(true) => {}
            Ok(false) => debug!("Message {} was not pending when acknowledged", id),
            Err(e) => error!(
                "Failed to acknowledge message {}, recovery will compensate: {}",
                id, e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::{DatabaseConfig, StatsConfig};
    use crate::counter::MemoryUniqueCounter;
    use crate::idempotency::{IdempotencyStore, MemoryIdempotencyStore};
    use crate::keys::KeySpace;
    use crate::lock::MemoryLockService;
    use crate::services::{GeoInfo, GeoIpLookup};
    use crate::storage::SeaOrmStorage;
    use crate::stream::MemoryEventLog;

    const STREAM: &str = "s";
    const GROUP: &str = "g";
    const URL: &str = "s.io/abc123";

    struct NoGeo;

    #[async_trait::async_trait]
    impl GeoIpLookup for NoGeo {
        async fn lookup(&self, _ip: &str) -> Option<GeoInfo> {
            None
        }

        fn name(&self) -> &'static str {
            "None"
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        storage: Arc<SeaOrmStorage>,
        log: Arc<MemoryEventLog>,
        markers: Arc<MemoryIdempotencyStore>,
        handler: MessageHandler,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(
            SeaOrmStorage::new(&DatabaseConfig {
                database_url: dir.path().join("handler.db").to_string_lossy().to_string(),
                ..DatabaseConfig::default()
            })
            .await
            .unwrap(),
        );
        storage.create_link("g1", URL, "https://example.com").await.unwrap();

        let keys = KeySpace::default();
        let log = Arc::new(MemoryEventLog::new());
        log.ensure_group(STREAM, GROUP).await.unwrap();
        let markers = Arc::new(MemoryIdempotencyStore::new(
            Duration::from_secs(120),
            Duration::from_secs(86400),
        ));
        let writer = Arc::new(StatsWriter::new(
            storage.clone(),
            Arc::new(MemoryUniqueCounter::new()),
            Arc::new(NoGeo),
            Arc::new(MemoryLockService::new()),
            keys.clone(),
            &StatsConfig::default(),
        ));
        let handler = MessageHandler::new(
            log.clone(),
            IdempotencyGate::new(markers.clone(), keys),
            writer,
            STREAM,
            GROUP,
        );

        Fixture {
            _dir: dir,
            storage,
            log,
            markers,
            handler,
        }
    }

    async fn deliver(log: &MemoryEventLog, payload: &str) -> StreamEvent {
        log.append(STREAM, &[("statsRecord".to_string(), payload.to_string())])
            .await
            .unwrap();
        let mut events = log
            .read_group(STREAM, GROUP, "c1", 1, Duration::from_millis(10))
            .await
            .unwrap();
        events.remove(0)
    }

    #[tokio::test]
    async fn test_success_marks_and_acks() {
        let f = fixture().await;
        let event = deliver(&f.log, r#"{"fullShortUrl":"s.io/abc123","uv":"v1"}"#).await;

        let outcome = f.handler.handle(&event).await.unwrap();
        assert_eq!(outcome, HandleOutcome::Acked);
        assert_eq!(f.log.pending_count(STREAM, GROUP).await.unwrap(), 0);

        let key = KeySpace::default().idempotent(&event.id.to_string());
        assert_eq!(
            f.markers.check_state(&key).await.unwrap(),
            MarkerState::Accomplished
        );
    }

    #[tokio::test]
    async fn test_redelivery_is_ack_only() {
        let f = fixture().await;
        let event = deliver(&f.log, r#"{"fullShortUrl":"s.io/abc123","uv":"v1"}"#).await;

        f.handler.handle(&event).await.unwrap();
        let again = f.handler.handle(&event).await.unwrap();
        assert_eq!(again, HandleOutcome::AckOnly);
        assert_eq!(f.storage.count_access_logs(URL).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_in_flight_leaves_message_pending() {
        let f = fixture().await;
        let event = deliver(&f.log, r#"{"fullShortUrl":"s.io/abc123"}"#).await;

        // 另一个处理者已经占住标记
        let key = KeySpace::default().idempotent(&event.id.to_string());
        f.markers.check_state(&key).await.unwrap();

        let err = f.handler.handle(&event).await.unwrap_err();
        assert!(err.is_in_flight());
        assert_eq!(f.log.pending_count(STREAM, GROUP).await.unwrap(), 1);
        assert_eq!(f.storage.count_access_logs(URL).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bad_payload_releases_marker() {
        let f = fixture().await;
        let event = deliver(&f.log, "{not json").await;

        assert!(f.handler.handle(&event).await.is_err());
        assert_eq!(f.log.pending_count(STREAM, GROUP).await.unwrap(), 1);

        // 标记已删除，下一次检查重新占位
        let key = KeySpace::default().idempotent(&event.id.to_string());
        assert_eq!(f.markers.check_state(&key).await.unwrap(), MarkerState::Absent);
    }

    #[tokio::test]
    async fn test_db_duplicate_is_acked() {
        let f = fixture().await;
        let event = deliver(&f.log, r#"{"fullShortUrl":"s.io/abc123","uv":"v1"}"#).await;
        f.handler.handle(&event).await.unwrap();

        // 标记丢失（例如 TTL 过期）后再次投递，由访问日志唯一键兜底
        let key = KeySpace::default().idempotent(&event.id.to_string());
        f.markers.release(&key).await.unwrap();

        let outcome = f.handler.handle(&event).await.unwrap();
        assert_eq!(outcome, HandleOutcome::Duplicate);
        assert_eq!(f.storage.count_access_logs(URL).await.unwrap(), 1);
        let link = f.storage.find_link(URL).await.unwrap().unwrap();
        assert_eq!(link.total_pv, 1);
    }
}
