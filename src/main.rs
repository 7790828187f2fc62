//! pll-histogram - clock recovery and phase histogramming
//!
//! Runs a tag source through the acquisition engine and collects rolling
//! phase histograms, optionally calibrating detector time walk.
//!
//! # Usage
//!
//! ```bash
//! # Synthetic tagger, 200 batches
//! cargo run --release -- --batches 200
//!
//! # Live tags from a tagger dump (JSON lines of [channel, time] pairs)
//! tagger_dump | ./pll-histogram --stdin --histogram-out hist.json
//!
//! # Measure time walk, then apply it
//! ./pll-histogram --batches 2000 --calibrate walk.json
//! ./pll-histogram --batches 200 --time-walk walk.json
//! ```
//!
//! # Environment Variables
//!
//! - `PLL_HISTOGRAM_CONFIG`: Path to the engine TOML config
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use pll_histogram::calibration::{TimeWalkAnalysis, TimeWalkFile};
use pll_histogram::config::{defaults, EngineConfig};
use pll_histogram::engine::HistogramEngine;
use pll_histogram::pipeline::{
    DrainLoop, DrainOutcome, IngestStats, IngestionLoop, StdinSource, SyntheticConfig,
    SyntheticSource, TagSource,
};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "pll-histogram")]
#[command(about = "Clock recovery, phase histograms and coincidences for time-tagged events")]
#[command(version)]
struct CliArgs {
    /// Engine config file (overrides PLL_HISTOGRAM_CONFIG and ./pll_histogram.toml)
    #[arg(long, value_name = "TOML")]
    config: Option<PathBuf>,

    /// Read tag batches from stdin (JSON lines) instead of the synthetic tagger
    #[arg(long)]
    stdin: bool,

    /// Number of synthetic batches to generate (0 = until Ctrl+C)
    #[arg(long, default_value = "200")]
    batches: u64,

    /// Seed for the synthetic tagger
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Interval between drains
    #[arg(long, default_value_t = defaults::DRAIN_INTERVAL_MS)]
    drain_interval_ms: u64,

    /// Apply a time-walk table (JSON) before processing
    #[arg(long, value_name = "JSON")]
    time_walk: Option<PathBuf>,

    /// Measure time walk and write the calibrated table (JSON)
    #[arg(long, value_name = "JSON")]
    calibrate: Option<PathBuf>,

    /// Write the persistent histograms (JSON) on exit
    #[arg(long, value_name = "JSON")]
    histogram_out: Option<PathBuf>,
}

// ============================================================================
// Task Supervision
// ============================================================================

enum TaskOutput {
    Ingestion(IngestStats),
    Drain(DrainOutcome),
}

/// Run both tasks to completion, cancelling the other if one fails.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskOutput>>,
    cancel_token: CancellationToken,
) -> Result<(Option<IngestStats>, Option<DrainOutcome>)> {
    let mut ingest = None;
    let mut drain = None;

    while let Some(result) = task_set.join_next().await {
        match result {
            Ok(Ok(TaskOutput::Ingestion(stats))) => {
                info!("Supervisor: ingestion completed ({})", stats);
                ingest = Some(stats);
            }
            Ok(Ok(TaskOutput::Drain(outcome))) => {
                info!("Supervisor: drain completed ({} blocks)", outcome.blocks);
                drain = Some(outcome);
            }
            Ok(Err(e)) => {
                error!("Supervisor: task failed with error: {:#}", e);
                cancel_token.cancel();
                return Err(e);
            }
            Err(e) => {
                error!("Supervisor: task panicked: {}", e);
                cancel_token.cancel();
                return Err(anyhow::anyhow!("Task panicked: {}", e));
            }
        }
    }

    Ok((ingest, drain))
}

// ============================================================================
// Pipeline Runner
// ============================================================================

async fn run_pipeline<S: TagSource>(
    mut source: S,
    engine: HistogramEngine,
    args: &CliArgs,
    cancel_token: CancellationToken,
) -> Result<()> {
    let mut task_set: JoinSet<Result<TaskOutput>> = JoinSet::new();

    // Task 1: Ingestion
    let ingest_loop = IngestionLoop::new(engine.clone(), cancel_token.clone());
    task_set.spawn(async move {
        let stats = ingest_loop.run(&mut source).await;
        Ok(TaskOutput::Ingestion(stats))
    });

    // Task 2: Drain
    let mut drain_loop = DrainLoop::new(
        engine.clone(),
        Duration::from_millis(args.drain_interval_ms.max(1)),
        cancel_token.clone(),
    );
    if args.calibrate.is_some() {
        drain_loop =
            drain_loop.with_time_walk_analysis(TimeWalkAnalysis::new(&engine.config().time_walk));
    }
    task_set.spawn(async move { Ok(TaskOutput::Drain(drain_loop.run().await)) });

    let (ingest, drain) = run_supervisor(&mut task_set, cancel_token).await?;

    print_final_statistics(&engine, ingest.as_ref(), drain.as_ref());

    if let Some(outcome) = drain {
        write_outputs(&outcome, args)?;
    }
    Ok(())
}

fn print_final_statistics(
    engine: &HistogramEngine,
    ingest: Option<&IngestStats>,
    drain: Option<&DrainOutcome>,
) {
    let stats = engine.stats();
    info!("");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("FINAL STATISTICS");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("   Batches:            {}", stats.batches);
    info!("   Tags:               {}", stats.tags);
    info!("   Clock Edges:        {}", stats.clock_edges);
    info!("   Data Events:        {}", stats.data_events);
    info!("   Dropped (unlocked): {}", stats.dropped_unlocked);
    info!("   Dropped (overflow): {}", stats.dropped_overflow);
    info!("   Full Pairs:         {}", stats.full_pairs);
    info!("   Center Pairs:       {}", stats.center_pairs);
    info!("   Relocks:            {}", stats.relocks);
    match stats.period {
        Some(period) => info!("   Period:             {:.3} ps", period),
        None => info!("   Period:             not locked"),
    }
    if let Some(ingest) = ingest {
        info!("   Unstable Batches:   {}", ingest.unstable_batches);
    }
    if let Some(drain) = drain {
        info!(
            "   Blocks Drained:     {} ({} truncated)",
            drain.blocks, drain.truncated_blocks
        );
    }
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

fn write_outputs(outcome: &DrainOutcome, args: &CliArgs) -> Result<()> {
    if let Some(path) = &args.histogram_out {
        match outcome.histograms.report() {
            Some(report) => {
                write_json(path, &report)?;
                info!("Histograms written to {}", path.display());
            }
            None => warn!("No locked blocks drained, histograms not written"),
        }
    }

    if let (Some(path), Some(analysis)) = (&args.calibrate, &outcome.time_walk) {
        let table = analysis
            .build_table()
            .context("Time-walk calibration failed")?;
        write_json(path, &table.to_file())?;
        info!(
            "Time-walk table ({} entries, {} samples) written to {}",
            table.len(),
            analysis.samples(),
            path.display()
        );
    }
    Ok(())
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

fn load_engine_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(EngineConfig::load()),
    }
}

fn load_time_walk(path: &Path, max_len: usize) -> Result<pll_histogram::TimeWalkTable> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file: TimeWalkFile = serde_json::from_str(&contents)
        .with_context(|| format!("Invalid time-walk file {}", path.display()))?;
    Ok(file.into_table(max_len)?)
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let config = load_engine_config(args.config.as_deref())?;
    info!(
        "Channels: clock {} | data {} / {} | mult {}",
        config.channels.clock, config.channels.data_1, config.channels.data_2, config.phase.mult
    );
    let channels = config.channels;
    let max_len = config.time_walk.max_len;
    let engine = HistogramEngine::new(config).context("Invalid engine configuration")?;

    if let Some(path) = &args.time_walk {
        let table = load_time_walk(path, max_len)?;
        engine.set_time_walk(table);
    }
    if args.calibrate.is_some() && args.time_walk.is_some() {
        warn!("Calibrating with a time-walk table applied measures the residual walk only");
    }

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    if args.stdin {
        info!("Input: stdin (JSON tag batches)");
        run_pipeline(StdinSource::new(), engine, &args, cancel_token).await?;
    } else {
        let synthetic = SyntheticConfig {
            channels,
            batches: (args.batches > 0).then_some(args.batches),
            seed: args.seed,
            ..SyntheticConfig::default()
        };
        info!(
            "Input: synthetic tagger ({} ps period, {} edges/batch, seed {})",
            synthetic.period_ps, synthetic.edges_per_batch, synthetic.seed
        );
        let source = SyntheticSource::new(synthetic)?;
        run_pipeline(source, engine, &args, cancel_token).await?;
    }

    info!("pll-histogram shutdown complete");
    Ok(())
}
