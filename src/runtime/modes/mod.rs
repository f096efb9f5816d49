//! 运行模式
//!
//! - `run_ingest`: 启动消费者、PEL 巡检和 Stream 清理，直到收到 Ctrl+C
//! - `publish`: 向事件流追加一条访问事件，用于联调

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::{BackendKind, StaticConfig};
use crate::keys::KeySpace;
use crate::runtime::lifetime::{self, Backends};
use crate::stats::StatsRecord;

pub async fn run_ingest(config: &StaticConfig) -> Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|e| anyhow::anyhow!("Failed to install rustls crypto provider: {:?}", e))?;

    if config.stream.backend == BackendKind::Memory {
        warn!("Memory stream backend selected: events and markers live only in this process");
    }

    let pipeline = lifetime::prepare_pipeline(config).await?;
    let (notify, shutdown) = watch::channel(false);
    let handles = pipeline
        .start(shutdown)
        .await
        .context("Failed to start stats consumers")?;

    lifetime::shutdown::wait_for_signal().await;
    lifetime::shutdown::shutdown(&notify, handles, &pipeline.dispatcher).await;
    info!("linkstats stopped");
    Ok(())
}

/// 追加一条事件并返回消息 ID
pub async fn publish(config: &StaticConfig, record: &StatsRecord) -> Result<String> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|e| anyhow::anyhow!("Failed to install rustls crypto provider: {:?}", e))?;

    let backends = Backends::connect(config).await?;
    let keys = KeySpace::from_config(config);
    let fields = record
        .into_fields()
        .context("Failed to encode stats record")?;
    let id = backends
        .log
        .append(keys.stream(), &fields)
        .await
        .context("Failed to append event")?;
    info!("Published event {} to '{}'", id, keys.stream());
    Ok(id.to_string())
}
