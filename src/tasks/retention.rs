//! Stream 清理
//!
//! 保留所有 Pending 消息和最近 `keep_count` 条已消费消息，其余删除。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::RetentionConfig;
use crate::errors::Result;
use crate::stream::EventLog;

pub struct RetentionTask {
    log: Arc<dyn EventLog>,
    stream: String,
    group: String,
    keep_count: u64,
    interval: Duration,
}

impl RetentionTask {
    pub fn new(
        log: Arc<dyn EventLog>,
        stream: impl Into<String>,
        group: impl Into<String>,
        config: &RetentionConfig,
    ) -> Self {
        Self {
            log,
            stream: stream.into(),
            group: group.into(),
            keep_count: config.keep_count,
            interval: Duration::from_secs(config.interval_secs.max(1)),
        }
    }

    /// 执行一轮清理，返回删除条数
    pub async fn run_once(&self) -> Result<u64> {
        let trimmed = self
            .log
            .trim_to_min_id(&self.stream, &self.group, self.keep_count)
            .await?;
        if trimmed > 0 {
            info!("Stream cleanup: trimmed {} messages from '{}'", trimmed, self.stream);
        } else {
            debug!("Stream cleanup: nothing to trim");
        }
        Ok(trimmed)
    }

    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let interval = self.interval;
        super::spawn_periodic("Stream cleanup", interval, shutdown, move || {
            let task = Arc::clone(&self);
            async move {
                if let Err(e) = task.run_once().await {
                    error!("Stream cleanup failed: {}", e);
                }
            }
        })
    }
}
