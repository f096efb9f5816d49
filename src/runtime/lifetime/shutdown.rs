use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::consumer::Dispatcher;

/// 关闭超时时间（秒）
const SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// 等待工作池排空的超时时间（秒）
const DRAIN_TIMEOUT_SECS: u64 = 10;

/// 等待 Ctrl+C
pub async fn wait_for_signal() {
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received, stopping consumers...");
        }
        Err(e) => {
            warn!(
                "Failed to listen for Ctrl+C: {}. Proceeding with shutdown anyway.",
                e
            );
        }
    }
}

/// 广播关闭信号，等待读取循环和后台任务退出，再排空工作池
///
/// 未完成的消息留在 PEL 中，由下次启动的巡检任务接手。
pub async fn shutdown(
    notify: &watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    dispatcher: &Dispatcher,
) {
    let _ = notify.send(true);

    let result = timeout(
        Duration::from_secs(SHUTDOWN_TIMEOUT_SECS),
        perform_shutdown_tasks(handles, dispatcher),
    )
    .await;

    match result {
        Ok(()) => {
            info!("All shutdown tasks completed successfully");
        }
        Err(_) => {
            error!(
                "Shutdown tasks timed out after {} seconds, unfinished messages stay pending",
                SHUTDOWN_TIMEOUT_SECS
            );
        }
    }
}

async fn perform_shutdown_tasks(handles: Vec<JoinHandle<()>>, dispatcher: &Dispatcher) {
    for handle in handles {
        if let Err(e) = handle.await {
            error!("Background task ended abnormally: {}", e);
        }
    }
    dispatcher
        .drain(Duration::from_secs(DRAIN_TIMEOUT_SECS))
        .await;

    let stats = dispatcher.stats();
    info!(
        "Stats consumer stopped: {} received, {} succeeded, {} failed",
        stats.received, stats.succeeded, stats.failed
    );
}
