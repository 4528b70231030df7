//! Histagg Aggregate - topic backlog aggregation tool

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use clap::Parser;
use histagg_common::logging::{init_logging, LogConfig, LogLevel};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use histagg_aggregate::catalog;
use histagg_aggregate::orchestrator::{Orchestrator, OrchestratorConfig};
use histagg_aggregate::storage::{config::StorageConfig, S3Store};

#[derive(Parser, Debug)]
#[command(name = "histagg-aggregate")]
#[command(author, version, about = "Aggregates staged topic backups into daily archives")]
struct Cli {
    /// Path to the data catalog JSON enumerating topics
    #[arg(short = 'c', long)]
    data_catalog: PathBuf,

    /// Days before today to process (1 = yesterday)
    #[arg(short, long, default_value_t = 1)]
    offset_days: i64,

    /// Per-object delete budget during retirement, in seconds
    #[arg(long, default_value_t = 60)]
    delete_deadline_secs: u64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Environment configures logging; --verbose forces debug level
    let mut log_config = LogConfig::from_env()?.with_file_prefix("histagg-aggregate");
    if cli.verbose {
        log_config = log_config.with_level(LogLevel::Debug);
    }
    init_logging(&log_config)?;

    let topics = catalog::load_topics(&cli.data_catalog)?;
    info!("Loaded {} topics from '{}'", topics.len(), cli.data_catalog.display());

    let store = S3Store::new(StorageConfig::from_env()?).await?;

    let now = Utc::now();
    let config = OrchestratorConfig {
        process_date: (now - ChronoDuration::days(cli.offset_days)).date_naive(),
        run_timestamp: now.timestamp(),
        delete_deadline: Duration::from_secs(cli.delete_deadline_secs),
    };

    info!(
        "Aggregating staged backups for {} (offset {} days)",
        config.process_date, cli.offset_days
    );

    let summary = Orchestrator::new(store, config).run(&topics).await;

    if summary.failed > 0 {
        anyhow::bail!(
            "{} of {} topics failed aggregation",
            summary.failed,
            summary.succeeded + summary.failed
        );
    }

    info!("Aggregation complete");
    Ok(())
}
