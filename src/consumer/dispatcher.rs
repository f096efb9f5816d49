//! 消费者调度
//!
//! 每个消费者一个读取循环，共享同一个有界工作池和消息处理器。
//! 读取阻塞时间有上限，循环在每次读取后检查关闭信号。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::handler::{HandleOutcome, MessageHandler};
use super::pool::{Submission, WorkerPool};
use crate::config::StreamConfig;
use crate::errors::Result;
use crate::stream::{EventLog, StreamEvent};

/// 读取失败后的等待时间
const READ_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// 调度计数
#[derive(Debug, Default)]
pub struct DispatcherStats {
    received: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    in_flight: AtomicU64,
    caller_runs: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherSnapshot {
    pub received: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// 因另一次处理尚未完成而留在 PEL 中
    pub in_flight: u64,
    pub caller_runs: u64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherSnapshot {
        DispatcherSnapshot {
            received: self.received.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            caller_runs: self.caller_runs.load(Ordering::Relaxed),
        }
    }

    fn record(&self, result: &Result<HandleOutcome>) {
        match result {
            Ok(_) => self.succeeded.fetch_add(1, Ordering::Relaxed),
            Err(e) if e.is_in_flight() => self.in_flight.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.failed.fetch_add(1, Ordering::Relaxed),
        };
    }
}

pub struct Dispatcher {
    log: Arc<dyn EventLog>,
    handler: Arc<MessageHandler>,
    pool: WorkerPool,
    stats: Arc<DispatcherStats>,
    stream: String,
    group: String,
    consumer_count: usize,
    batch_size: usize,
    block: Duration,
    throughput_interval: Duration,
}

impl Dispatcher {
    pub fn new(
        log: Arc<dyn EventLog>,
        handler: Arc<MessageHandler>,
        stream: impl Into<String>,
        config: &StreamConfig,
    ) -> Self {
        Self {
            log,
            handler,
            pool: WorkerPool::new(config.effective_max_workers()),
            stats: Arc::new(DispatcherStats::default()),
            stream: stream.into(),
            group: config.group.clone(),
            consumer_count: config.effective_consumer_count(),
            batch_size: config.batch_size,
            block: Duration::from_millis(config.block_ms),
            throughput_interval: Duration::from_secs(config.throughput_log_interval_secs.max(1)),
        }
    }

    /// 消费者名在重启之间保持不变，避免 PEL 里堆积孤儿消费者
    pub fn consumer_names(&self) -> Vec<String> {
        (0..self.consumer_count)
            .map(|i| format!("stats-consumer-{}", i))
            .collect()
    }

    pub fn stats(&self) -> DispatcherSnapshot {
        self.stats.snapshot()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// 创建消费组并启动所有读取循环和吞吐日志
    pub async fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<Vec<JoinHandle<()>>> {
        self.log.ensure_group(&self.stream, &self.group).await?;

        let mut handles = Vec::with_capacity(self.consumer_count + 1);
        for consumer in self.consumer_names() {
            let dispatcher = Arc::clone(self);
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                dispatcher.consume_loop(consumer, shutdown).await;
            }));
        }

        let dispatcher = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            dispatcher.throughput_loop(shutdown).await;
        }));

        info!(
            "Stats dispatcher started: {} consumers on '{}' (group '{}'), {} workers, batch {}",
            self.consumer_count,
            self.stream,
            self.group,
            self.pool.size(),
            self.batch_size
        );
        Ok(handles)
    }

    async fn consume_loop(self: Arc<Self>, consumer: String, mut shutdown: watch::Receiver<bool>) {
        debug!("Consumer '{}' started", consumer);
        while !*shutdown.borrow() {
            if let Err(e) = self.poll_once(&consumer).await {
                error!("Consumer '{}' failed to read stream: {}", consumer, e);
                tokio::select! {
                    _ = tokio::time::sleep(READ_ERROR_BACKOFF) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
        debug!("Consumer '{}' stopped", consumer);
    }

    /// 读取一批新消息并交给工作池，返回本批条数
    pub async fn poll_once(&self, consumer: &str) -> Result<usize> {
        let events = self
            .log
            .read_group(&self.stream, &self.group, consumer, self.batch_size, self.block)
            .await?;
        let count = events.len();
        for event in events {
            self.dispatch(event).await;
        }
        Ok(count)
    }

    async fn dispatch(&self, event: StreamEvent) {
        let handler = Arc::clone(&self.handler);
        let stats = Arc::clone(&self.stats);
        stats.received.fetch_add(1, Ordering::Relaxed);

        let job = async move {
            let result = handler.handle(&event).await;
            if let Err(e) = &result
                && e.is_in_flight()
            {
                debug!("{}", e);
            }
            stats.record(&result);
        };

        if self.pool.submit(job).await == Submission::CallerRan {
            self.stats.caller_runs.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn throughput_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut last_total = 0u64;
        let mut last_at = Instant::now();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.throughput_interval) => {}
                _ = shutdown.changed() => break,
            }

            let snapshot = self.stats.snapshot();
            let total = snapshot.succeeded + snapshot.failed + snapshot.in_flight;
            let elapsed = last_at.elapsed().as_secs_f64().max(f64::EPSILON);
            info!(
                "Stats consumer throughput: {} messages in {:.0}s (~{:.1} msg/s), {} failed, {} caller-runs",
                total - last_total,
                elapsed,
                (total - last_total) as f64 / elapsed,
                snapshot.failed,
                snapshot.caller_runs
            );
            last_total = total;
            last_at = Instant::now();
        }
    }

    /// 等待已提交的任务结束
    pub async fn drain(&self, timeout: Duration) {
        if !self.pool.drain(timeout).await {
            warn!("Some stats workers did not finish before shutdown");
        }
    }
}
