//! PEL 巡检
//!
//! 从持久化游标开始认领空闲超时的 Pending 消息，以独立的认领者身份
//! 走与消费者相同的处理流程。每轮结束都保存下一游标（包括空轮），
//! 让扫描遍历整个 PEL 而不是反复扫描头部。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::RecoveryConfig;
use crate::consumer::MessageHandler;
use crate::errors::Result;
use crate::stream::{CursorStore, EventLog, StreamId};

/// 单轮巡检结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub start_cursor: StreamId,
    pub next_cursor: StreamId,
    /// 本轮认领到的消息数
    pub claimed: usize,
    /// 重新处理成功的消息数
    pub recovered: usize,
    pub failed: usize,
}

pub struct RecoveryTask {
    log: Arc<dyn EventLog>,
    cursors: Arc<dyn CursorStore>,
    handler: Arc<MessageHandler>,
    stream: String,
    group: String,
    cursor_key: String,
    claimant: String,
    min_idle: Duration,
    count: usize,
    interval: Duration,
}

impl RecoveryTask {
    pub fn new(
        log: Arc<dyn EventLog>,
        cursors: Arc<dyn CursorStore>,
        handler: Arc<MessageHandler>,
        stream: impl Into<String>,
        group: impl Into<String>,
        cursor_key: impl Into<String>,
        config: &RecoveryConfig,
    ) -> Self {
        Self {
            log,
            cursors,
            handler,
            stream: stream.into(),
            group: group.into(),
            cursor_key: cursor_key.into(),
            claimant: config.claimant.clone(),
            min_idle: Duration::from_millis(config.min_idle_ms),
            count: config.claim_count.max(1),
            interval: Duration::from_secs(config.interval_secs.max(1)),
        }
    }

    async fn load_cursor(&self) -> Result<StreamId> {
        match self.cursors.load_cursor(&self.cursor_key).await? {
            Some(raw) => Ok(raw.parse().unwrap_or_else(|_| {
                warn!("Invalid recovery cursor '{}', restarting from 0-0", raw);
                StreamId::ZERO
            })),
            None => Ok(StreamId::ZERO),
        }
    }

    /// 执行一轮巡检
    pub async fn run_once(&self) -> Result<RecoveryReport> {
        let start_cursor = self.load_cursor().await?;
        let batch = self
            .log
            .auto_claim(
                &self.stream,
                &self.group,
                &self.claimant,
                self.min_idle,
                &start_cursor,
                self.count,
            )
            .await?;

        let mut report = RecoveryReport {
            start_cursor,
            next_cursor: batch.next_cursor,
            claimed: batch.entries.len(),
            ..Default::default()
        };

        for event in &batch.entries {
            match self.handler.handle(event).await {
                Ok(outcome) => {
                    debug!("Recovered message {} ({:?})", event.id, outcome);
                    report.recovered += 1;
                }
                Err(e) => {
                    error!("Failed to recover pending message {}: {}", event.id, e);
                    report.failed += 1;
                }
            }
        }

        self.cursors
            .store_cursor(&self.cursor_key, &batch.next_cursor.to_string())
            .await?;

        if report.claimed > 0 {
            info!(
                "PEL recovery: claimed {}, recovered {}, failed {}, next cursor {}",
                report.claimed, report.recovered, report.failed, report.next_cursor
            );
        } else {
            debug!(
                "PEL recovery: nothing to claim from {}, next cursor {}",
                start_cursor, report.next_cursor
            );
        }
        Ok(report)
    }

    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let interval = self.interval;
        super::spawn_periodic("PEL recovery", interval, shutdown, move || {
            let task = Arc::clone(&self);
            async move {
                if let Err(e) = task.run_once().await {
                    error!("PEL recovery tick failed: {}", e);
                }
            }
        })
    }
}
