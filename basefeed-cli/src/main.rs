//! Basefeed CLI — single-invocation base-table load.
//!
//! One run executes, in order: the daily_base load across all entity
//! kinds, the daily_base cleanup, and the true_base load. There is no
//! resume flag; re-invocation reprocesses everything, which is safe
//! because the upserts are idempotent. `RUST_LOG` controls verbosity.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use basefeed_core::cleanup::CleanupPolicy;
use basefeed_core::loader::{self, RunSummary};
use basefeed_core::store::Store;

#[derive(Parser)]
#[command(
    name = "basefeed",
    about = "Consolidate per-entity market data feeds into the daily_base/true_base tables"
)]
struct Cli {
    /// Root directory of source partitions (one subdirectory per feed).
    #[arg(long)]
    source: PathBuf,

    /// Path to the target SQLite database.
    #[arg(long)]
    database: PathBuf,

    /// Optional TOML file overriding cleanup thresholds and jurisdiction.
    #[arg(long)]
    policy: Option<PathBuf>,

    /// Optional path to write the run summary as JSON.
    #[arg(long)]
    summary: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let policy = match &cli.policy {
        Some(path) => CleanupPolicy::from_file(path)
            .with_context(|| format!("load cleanup policy from {}", path.display()))?,
        None => CleanupPolicy::default(),
    };

    let mut store = Store::open(&cli.database)
        .with_context(|| format!("open database {}", cli.database.display()))?;

    info!(source = %cli.source.display(), database = %cli.database.display(), "starting run");
    let summary = loader::run(&mut store, &cli.source, &policy)?;

    print_summary(&summary);

    if let Some(path) = &cli.summary {
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(path, json)
            .with_context(|| format!("write run summary to {}", path.display()))?;
        println!("Summary saved to: {}", path.display());
    }

    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("=== Run Summary ===");
    for (name, stats) in [
        ("daily_base", &summary.daily_base),
        ("true_base", &summary.true_base),
    ] {
        println!("--- {name} ---");
        println!("Files loaded:    {}", stats.files_loaded);
        println!("Records written: {}", stats.records_written);
        println!("Dropped empty:   {}", stats.dropped_empty);
        println!("Dropped weekend: {}", stats.dropped_weekend);
        println!("Skipped rows:    {}", stats.skipped_unparseable);
    }
    println!("--- cleanup ---");
    println!("Below thresholds:      {}", summary.cleanup.below_thresholds);
    println!("No short interest:     {}", summary.cleanup.without_short_interest);
    println!("Outside universe:      {}", summary.cleanup.outside_universe);
    println!();
}
