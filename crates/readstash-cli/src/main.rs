use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use readstash_core::StorageEvent;
use readstash_sync::{handle_storage_event, IngestConfig, IngestPipeline};

#[derive(Debug, Parser)]
#[command(name = "readstash")]
#[command(about = "Diff configured sources against the ingestion ledger and save new items")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one reconciliation pass against the configured bucket.
    Run {
        /// Bucket holding sources.json and ingested.json; defaults to the
        /// READSTASH_BUCKET environment variable.
        #[arg(long)]
        bucket: Option<String>,
    },
    /// Handle a storage-change event read from a JSON file.
    Event {
        /// Path to the event payload ({"bucket": ..., "name": ...}).
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = IngestConfig::from_env();
    let pipeline = IngestPipeline::from_config(&config)?;

    match cli.command.unwrap_or(Commands::Run { bucket: None }) {
        Commands::Run { bucket } => {
            let bucket = bucket.unwrap_or(config.bucket);
            let summary = pipeline.run_once(&bucket).await?;
            println!(
                "run {} complete: sources={} new={} accepted={} failed={}",
                summary.run_id,
                summary.stats.sources,
                summary.stats.new_items,
                summary.stats.accepted,
                summary.stats.failed
            );
        }
        Commands::Event { path } => {
            let payload = std::fs::read_to_string(&path)
                .with_context(|| format!("reading event file {}", path.display()))?;
            let event: StorageEvent = serde_json::from_str(&payload)
                .with_context(|| format!("parsing event file {}", path.display()))?;

            match handle_storage_event(&pipeline, &event).await? {
                Some(summary) => println!(
                    "run {} complete: sources={} new={} accepted={} failed={}",
                    summary.run_id,
                    summary.stats.sources,
                    summary.stats.new_items,
                    summary.stats.accepted,
                    summary.stats.failed
                ),
                None => println!("ignored change to {} (not sources.json)", event.name),
            }
        }
    }

    Ok(())
}
