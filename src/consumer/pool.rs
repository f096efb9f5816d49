//! 有界工作池
//!
//! 许可用尽时由提交方就地执行（caller-runs），读取端随之放慢，
//! 不会无限排队，也不会丢弃任务。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// 交给后台 worker
    Spawned,
    /// 工作池已满，在提交方执行完毕
    CallerRan,
}

pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// 正在执行的后台任务数
    pub fn busy(&self) -> usize {
        self.size - self.permits.available_permits()
    }

    pub async fn submit<F>(&self, job: F) -> Submission
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self.permits.clone().try_acquire_owned() {
            Ok(permit) => {
                tokio::spawn(async move {
                    job.await;
                    drop(permit);
                });
                Submission::Spawned
            }
            Err(_) => {
                job.await;
                Submission::CallerRan
            }
        }
    }

    /// 等待所有后台任务结束，超时返回 false
    pub async fn drain(&self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.permits.acquire_many(self.size as u32)).await {
            Ok(Ok(_all)) => true,
            Ok(Err(_)) => true,
            Err(_) => {
                warn!(
                    "Worker pool drain timed out with {} tasks still running",
                    self.busy()
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_caller_runs_when_saturated() {
        let pool = WorkerPool::new(1);
        let gate = Arc::new(Notify::new());
        let done = Arc::new(AtomicUsize::new(0));

        let (g, d) = (gate.clone(), done.clone());
        let first = pool
            .submit(async move {
                g.notified().await;
                d.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert_eq!(first, Submission::Spawned);
        assert_eq!(pool.busy(), 1);

        let d = done.clone();
        let second = pool
            .submit(async move {
                d.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert_eq!(second, Submission::CallerRan);
        // 就地执行的任务在 submit 返回前已完成
        assert_eq!(done.load(Ordering::SeqCst), 1);

        gate.notify_one();
        assert!(pool.drain(Duration::from_secs(1)).await);
        assert_eq!(done.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_drain_times_out() {
        let pool = WorkerPool::new(2);
        pool.submit(async {
            tokio::time::sleep(Duration::from_secs(5)).await;
        })
        .await;

        assert!(!pool.drain(Duration::from_millis(20)).await);
    }
}
