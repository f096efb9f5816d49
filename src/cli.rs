//! Command-line interface definitions using clap

use clap::{Parser, Subcommand};

use crate::stats::StatsRecord;

/// linkstats - click statistics ingestion for the short-link service
#[derive(Parser)]
#[command(name = "linkstats")]
#[command(version)]
#[command(about = "Consume short-link click events into aggregated statistics", long_about = None)]
pub struct Cli {
    /// Config file path (default: config.toml)
    #[arg(long, short = 'c', global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the stream consumers and background tasks (default)
    Run,

    /// Generate example configuration file
    GenConfig {
        /// Output path (default: stdout)
        output: Option<String>,
    },

    /// Append one click event to the stream
    Publish {
        /// Full short url, e.g. s.example.com/abc123
        full_short_url: String,

        /// Visitor token
        #[arg(long)]
        uv: Option<String>,

        /// Client IP
        #[arg(long)]
        uip: Option<String>,

        #[arg(long)]
        os: Option<String>,

        #[arg(long)]
        browser: Option<String>,

        #[arg(long)]
        device: Option<String>,
    },
}

impl Commands {
    /// Build the event payload for `publish`
    pub fn to_record(&self) -> Option<StatsRecord> {
        match self {
            Commands::Publish {
                full_short_url,
                uv,
                uip,
                os,
                browser,
                device,
            } => {
                let mut record = StatsRecord::new(full_short_url.clone());
                record.uv = uv.clone();
                record.uip = uip.clone();
                record.os = os.clone();
                record.browser = browser.clone();
                record.device = device.clone();
                record.current_date = Some(chrono::Utc::now());
                Some(record)
            }
            _ => None,
        }
    }
}
