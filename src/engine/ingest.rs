//! Single-threaded tag processing: PLL, phase assignment, coincidences.
//!
//! Everything in here runs under the engine mutex, one batch at a time.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::EngineError;
use crate::accumulator::BatchAccumulator;
use crate::calibration::TimeWalkTable;
use crate::coincidence::CoincidenceDetector;
use crate::config::{ChannelConfig, EngineConfig};
use crate::phase::PhaseAssigner;
use crate::pll::PhaseLockedLoop;
use crate::types::{Snapshot, Tag};

/// What one `process` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub tags: usize,
    pub clock_edges: usize,
    pub data_events: usize,
    /// Data tags that arrived before the loop locked
    pub dropped_unlocked: usize,
    /// Tags on channels that are neither clock nor data
    pub ignored: usize,
    pub full_pairs: usize,
    pub center_pairs: usize,
}

/// Cumulative engine counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub batches: u64,
    pub tags: u64,
    pub clock_edges: u64,
    pub data_events: u64,
    pub dropped_unlocked: u64,
    /// Entries refused because a block buffer was full
    pub dropped_overflow: u64,
    pub ignored: u64,
    pub full_pairs: u64,
    pub center_pairs: u64,
    pub blocks_drained: u64,
    pub truncated_blocks: u64,
    pub unstable_batches: u64,
    pub relocks: u64,
    pub locked: bool,
    /// Current period estimate (ps), `None` while bootstrapping
    pub period: Option<f64>,
}

impl std::fmt::Display for EngineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Engine: {} batches, {} tags ({} clock, {} data, {} dropped unlocked, {} dropped overflow), {} full / {} center pairs, {} blocks ({} truncated), {} relocks",
            self.batches,
            self.tags,
            self.clock_edges,
            self.data_events,
            self.dropped_unlocked,
            self.dropped_overflow,
            self.full_pairs,
            self.center_pairs,
            self.blocks_drained,
            self.truncated_blocks,
            self.relocks
        )
    }
}

pub(super) struct EngineCore {
    channels: ChannelConfig,
    pll: PhaseLockedLoop,
    assigner: PhaseAssigner,
    detector: CoincidenceDetector,
    accumulator: BatchAccumulator,
    stats: EngineStats,
}

impl EngineCore {
    pub(super) fn new(config: &EngineConfig) -> Self {
        Self {
            channels: config.channels,
            pll: PhaseLockedLoop::new(&config.loop_filter),
            assigner: PhaseAssigner::new(&config.phase),
            detector: CoincidenceDetector::new(&config.coincidence),
            accumulator: BatchAccumulator::new(config.buffers.n_bins),
            stats: EngineStats::default(),
        }
    }

    /// Process one batch in order. On loop divergence the rest of the batch
    /// is discarded and the loop goes back to bootstrapping.
    pub(super) fn ingest(
        &mut self,
        batch: &[Tag],
        table: &TimeWalkTable,
    ) -> Result<BatchReport, EngineError> {
        let mut report = BatchReport::default();
        let result = self.ingest_tags(batch, table, &mut report);

        let s = &mut self.stats;
        s.batches += 1;
        s.tags += report.tags as u64;
        s.clock_edges += report.clock_edges as u64;
        s.data_events += report.data_events as u64;
        s.dropped_unlocked += report.dropped_unlocked as u64;
        s.ignored += report.ignored as u64;
        s.full_pairs += report.full_pairs as u64;
        s.center_pairs += report.center_pairs as u64;

        result.map(|()| report)
    }

    fn ingest_tags(
        &mut self,
        batch: &[Tag],
        table: &TimeWalkTable,
        report: &mut BatchReport,
    ) -> Result<(), EngineError> {
        for (index, tag) in batch.iter().enumerate() {
            report.tags += 1;

            if tag.channel == self.channels.clock {
                let accumulator = &mut self.accumulator;
                if let Err(source) = self
                    .pll
                    .observe(tag.time, |edge| accumulator.record_edge(&edge))
                {
                    self.stats.unstable_batches += 1;
                    self.assigner.reset();
                    self.detector.reset();
                    warn!(
                        index,
                        remaining = batch.len() - index - 1,
                        "[Engine] Discarding rest of batch after loop divergence"
                    );
                    return Err(EngineError::LoopUnstable { index, source });
                }
                report.clock_edges += 1;
                continue;
            }

            let Some(channel) = self.channels.data_channel(tag.channel) else {
                report.ignored += 1;
                continue;
            };

            let Some(clock) = self.pll.clock() else {
                report.dropped_unlocked += 1;
                continue;
            };

            let event = self.assigner.assign(channel, tag.time, clock, table);
            self.accumulator.record_event(&event);
            report.data_events += 1;

            let found = self
                .detector
                .observe(event.channel, event.phase, event.minor_cycle);
            self.accumulator.record_coincidences(&found);
            report.full_pairs += usize::from(found.full.is_some());
            report.center_pairs += usize::from(found.center.is_some());
        }

        if report.dropped_unlocked > 0 {
            debug!(
                dropped = report.dropped_unlocked,
                "[Engine] Data tags dropped while bootstrapping"
            );
        }
        Ok(())
    }

    pub(super) fn has_block(&self) -> bool {
        self.accumulator.has_block()
    }

    pub(super) fn take_snapshot(&mut self) -> Snapshot {
        let period = self.pll.period().unwrap_or(0.0);
        let snapshot = self.accumulator.take_snapshot(period);
        self.stats.blocks_drained += 1;
        if snapshot.truncated {
            self.stats.truncated_blocks += 1;
        }
        snapshot
    }

    /// Drop lock, pending coincidences and the current block.
    pub(super) fn clear(&mut self) {
        self.pll.reset();
        self.assigner.reset();
        self.detector.reset();
        self.accumulator.clear();
    }

    pub(super) fn stats(&self) -> EngineStats {
        EngineStats {
            dropped_overflow: self.accumulator.overflowed(),
            relocks: self.pll.relocks(),
            locked: self.pll.is_locked(),
            period: self.pll.period(),
            ..self.stats.clone()
        }
    }

    pub(super) fn period(&self) -> Option<f64> {
        self.pll.period()
    }

    pub(super) fn is_locked(&self) -> bool {
        self.pll.is_locked()
    }
}
