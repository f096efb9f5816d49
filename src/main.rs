use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;

use linkstats::cli::{Cli, Commands};
use linkstats::config::{
    DEFAULT_CONFIG_PATH, StaticConfig, get_config, init_config, validate_config,
};
use linkstats::runtime::modes;
use linkstats::system::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // 生成示例配置不需要加载配置和日志
    if let Some(Commands::GenConfig { output }) = &cli.command {
        let sample = StaticConfig::generate_sample_config();
        match output {
            Some(path) => {
                std::fs::write(path, sample)
                    .with_context(|| format!("Failed to write sample config to {}", path))?;
                println!("{} {}", "Sample config written to".green(), path);
            }
            None => print!("{}", sample),
        }
        return Ok(());
    }

    init_config(cli.config.as_deref().unwrap_or(DEFAULT_CONFIG_PATH));
    let config = get_config();

    if let Err(errors) = validate_config(&config) {
        for error in &errors {
            eprintln!("{} {}", "Config error:".red().bold(), error);
        }
        anyhow::bail!("Invalid configuration ({} errors)", errors.len());
    }

    let _log_guard = match init_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{}", e.format_colored());
            anyhow::bail!("Failed to initialize logging: {}", e.format_simple());
        }
    };

    match &cli.command {
        None | Some(Commands::Run) => modes::run_ingest(&config).await,
        Some(command @ Commands::Publish { .. }) => {
            let record = command
                .to_record()
                .context("publish requires a stats record")?;
            let id = modes::publish(&config, &record).await?;
            println!("{}", id);
            Ok(())
        }
        Some(Commands::GenConfig { .. }) => Ok(()),
    }
}
