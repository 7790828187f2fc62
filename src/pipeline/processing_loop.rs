//! Ingestion and drain tasks around a shared [`HistogramEngine`].
//!
//! ```text
//! TagSource ──► IngestionLoop ──process()──► HistogramEngine
//!                                                 │ drain(timeout)
//!                                                 ▼
//!                       DrainLoop ──► HistogramSet / TimeWalkAnalysis
//! ```
//!
//! The ingestion loop stops the engine when its source is exhausted; the
//! drain loop then collects whatever block is left and exits.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::source::{BatchEvent, TagSource};
use crate::calibration::TimeWalkAnalysis;
use crate::engine::{EngineError, HistogramEngine};
use crate::histogram::HistogramSet;
use crate::types::Snapshot;

// ============================================================================
// Ingestion Loop
// ============================================================================

/// Counters of one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    pub batches: u64,
    pub tags: u64,
    pub data_events: u64,
    pub dropped_unlocked: u64,
    /// Batches cut short by loop divergence
    pub unstable_batches: u64,
    pub source_errors: u64,
}

impl std::fmt::Display for IngestStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Ingest: {} batches, {} tags, {} data events ({} dropped unlocked), {} unstable",
            self.batches, self.tags, self.data_events, self.dropped_unlocked, self.unstable_batches
        )
    }
}

/// Pulls batches from a source and feeds the engine.
pub struct IngestionLoop {
    engine: HistogramEngine,
    cancel_token: CancellationToken,
}

impl IngestionLoop {
    pub fn new(engine: HistogramEngine, cancel_token: CancellationToken) -> Self {
        Self {
            engine,
            cancel_token,
        }
    }

    /// Run until the source is exhausted or cancellation.
    pub async fn run<S: TagSource>(self, source: &mut S) -> IngestStats {
        let mut stats = IngestStats::default();
        info!("[Ingest] Reading tag batches from {}", source.source_name());

        loop {
            let event = tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("[Ingest] Shutdown signal received");
                    break;
                }
                result = source.next_batch() => {
                    match result {
                        Ok(ev) => ev,
                        Err(e) => {
                            stats.source_errors += 1;
                            warn!("[Ingest] Source error: {:#}", e);
                            break;
                        }
                    }
                }
            };

            let batch = match event {
                BatchEvent::Batch(batch) => batch,
                BatchEvent::Eof => {
                    info!(
                        "[Ingest] Source reached end ({} batches processed)",
                        stats.batches
                    );
                    break;
                }
            };

            stats.batches += 1;
            stats.tags += batch.len() as u64;

            match self.engine.process(&batch) {
                Ok(report) => {
                    stats.data_events += report.data_events as u64;
                    stats.dropped_unlocked += report.dropped_unlocked as u64;
                }
                Err(EngineError::Stopped) => {
                    info!("[Ingest] Engine stopped, ending ingestion");
                    break;
                }
                Err(e) => {
                    stats.unstable_batches += 1;
                    warn!("[Ingest] Batch {} rejected: {}", stats.batches, e);
                }
            }

            if stats.batches % 100 == 0 {
                let engine_stats = self.engine.stats();
                debug!(
                    batches = stats.batches,
                    locked = engine_stats.locked,
                    period_ps = engine_stats.period.unwrap_or(0.0),
                    "[Ingest] Progress"
                );
            }
        }

        self.engine.stop();
        stats
    }
}

// ============================================================================
// Drain Loop
// ============================================================================

/// What the drain loop collected.
#[derive(Debug, Clone)]
pub struct DrainOutcome {
    pub blocks: u64,
    pub truncated_blocks: u64,
    pub histograms: HistogramSet,
    pub time_walk: Option<TimeWalkAnalysis>,
}

/// Periodically drains the engine into the histograms.
pub struct DrainLoop {
    engine: HistogramEngine,
    histograms: HistogramSet,
    time_walk: Option<TimeWalkAnalysis>,
    interval: Duration,
    timeout: Duration,
    cancel_token: CancellationToken,
}

impl DrainLoop {
    pub fn new(engine: HistogramEngine, interval: Duration, cancel_token: CancellationToken) -> Self {
        let config = engine.config();
        let histograms = HistogramSet::new(&config.histogram, &config.phase);
        let timeout = Duration::from_millis(config.buffers.drain_timeout_ms);
        Self {
            engine,
            histograms,
            time_walk: None,
            interval,
            timeout,
            cancel_token,
        }
    }

    /// Also feed every block into a time-walk analysis.
    pub fn with_time_walk_analysis(mut self, analysis: TimeWalkAnalysis) -> Self {
        self.time_walk = Some(analysis);
        self
    }

    /// Run until cancellation, or until the engine is stopped and empty.
    pub async fn run(mut self) -> DrainOutcome {
        let mut blocks = 0u64;
        let mut truncated_blocks = 0u64;
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            interval_ms = self.interval.as_millis() as u64,
            "[Drain] Task starting"
        );

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("[Drain] Shutdown signal received");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let engine = self.engine.clone();
            let timeout = self.timeout;
            let drained = match tokio::task::spawn_blocking(move || engine.drain(timeout)).await {
                Ok(drained) => drained,
                Err(e) => {
                    warn!("[Drain] Drain task failed: {}", e);
                    break;
                }
            };

            match drained {
                Some(snapshot) => {
                    blocks += 1;
                    if snapshot.truncated {
                        truncated_blocks += 1;
                    }
                    self.consume(&snapshot);
                }
                None if self.engine.is_stopped() => {
                    info!("[Drain] Engine stopped and empty");
                    break;
                }
                None => {}
            }
        }

        // Whatever the last batches left behind
        if let Some(snapshot) = self.engine.try_drain() {
            blocks += 1;
            if snapshot.truncated {
                truncated_blocks += 1;
            }
            self.consume(&snapshot);
        }

        DrainOutcome {
            blocks,
            truncated_blocks,
            histograms: self.histograms,
            time_walk: self.time_walk,
        }
    }

    fn consume(&mut self, snapshot: &Snapshot) {
        self.histograms.ingest(snapshot);
        if let Some(analysis) = self.time_walk.as_mut() {
            analysis.record(snapshot);
        }
        log_block(snapshot);
    }
}

fn log_block(snapshot: &Snapshot) {
    let residuals = snapshot.clock_residuals();
    let max_residual = residuals.iter().map(|r| r.abs()).max().unwrap_or(0);
    info!(
        block = snapshot.block,
        clock_edges = snapshot.clock_edges.len(),
        ch1 = snapshot.channel_1.len(),
        ch2 = snapshot.channel_2.len(),
        full = snapshot.full_pairs.len(),
        center = snapshot.center_pairs.len(),
        raw = snapshot.raw_coincidences,
        period_ps = snapshot.period,
        max_residual_ps = max_residual,
        "[Drain] Block"
    );
    if snapshot.truncated {
        warn!(block = snapshot.block, "[Drain] Block was truncated, consider raising buffers.n_bins");
    }
}
