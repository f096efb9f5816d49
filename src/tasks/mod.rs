//! 定时后台任务
//!
//! 每个任务一个独立的单线程循环，上一轮结束后才会进入下一轮，
//! 单轮失败只记录日志，不会终止调度。

pub mod recovery;
pub mod retention;

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

pub use recovery::{RecoveryReport, RecoveryTask};
pub use retention::RetentionTask;

/// 按固定频率执行 `tick`，收到关闭信号后退出
pub(crate) fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("{} task started (interval: {:?})", name, period);

        loop {
            tokio::select! {
                _ = ticker.tick() => tick().await,
                _ = shutdown.changed() => break,
            }
        }
        info!("{} task stopped", name);
    })
}
