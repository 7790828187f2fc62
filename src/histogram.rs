//! Rolling phase histograms.
//!
//! Each drained block is binned into fixed-width bins spanning one minor
//! cycle. The last `blocks` per-block histograms are kept in a ring and
//! summed into a persistent view, so the persistent histogram always covers
//! the same integration time.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

use crate::config::{HistogramConfig, PhaseConfig};
use crate::types::Snapshot;

/// Fixed-bin histogram over a ring of recent blocks.
#[derive(Debug, Clone)]
pub struct RollingHistogram {
    origin: f64,
    span: f64,
    bins: usize,
    capacity: usize,
    ring: VecDeque<Vec<u64>>,
    persistent: Vec<u64>,
    out_of_range: u64,
}

impl RollingHistogram {
    /// `bins` equal bins over `[0, span)`, keeping the last `blocks` blocks.
    pub fn new(bins: usize, span: f64, blocks: usize) -> Self {
        let bins = bins.max(1);
        let capacity = blocks.max(1);
        Self {
            origin: 0.0,
            span,
            bins,
            capacity,
            ring: VecDeque::with_capacity(capacity),
            persistent: vec![0; bins],
            out_of_range: 0,
        }
    }

    /// Shift the binned range to `[origin, origin + span)`.
    pub fn with_origin(mut self, origin: f64) -> Self {
        self.origin = origin;
        self
    }

    /// Bin one block of values and add it to the ring, evicting the oldest
    /// block once the ring is full.
    pub fn push_block(&mut self, values: &[f64]) {
        let mut counts = vec![0u64; self.bins];
        let width = self.span / self.bins as f64;
        for &v in values {
            let pos = (v - self.origin) / width;
            if !(pos >= 0.0 && pos < self.bins as f64) {
                self.out_of_range += 1;
                continue;
            }
            counts[pos as usize] += 1;
        }

        if self.ring.len() == self.capacity {
            if let Some(evicted) = self.ring.pop_front() {
                for (total, old) in self.persistent.iter_mut().zip(&evicted) {
                    *total -= old;
                }
            }
        }
        for (total, new) in self.persistent.iter_mut().zip(&counts) {
            *total += new;
        }
        self.ring.push_back(counts);
    }

    /// Counts summed over every block in the ring.
    pub fn persistent(&self) -> &[u64] {
        &self.persistent
    }

    /// Counts of the most recent block, if any.
    pub fn latest(&self) -> Option<&[u64]> {
        self.ring.back().map(Vec::as_slice)
    }

    pub fn total_counts(&self) -> u64 {
        self.persistent.iter().sum()
    }

    /// Values that fell outside the binned range since the last reset.
    pub fn out_of_range(&self) -> u64 {
        self.out_of_range
    }

    /// Blocks currently held in the ring.
    pub fn blocks(&self) -> usize {
        self.ring.len()
    }

    pub fn reset(&mut self) {
        self.ring.clear();
        self.persistent.iter_mut().for_each(|c| *c = 0);
        self.out_of_range = 0;
    }

    /// `bins + 1` bin edges (ps).
    pub fn bin_edges(&self) -> Vec<f64> {
        let width = self.span / self.bins as f64;
        (0..=self.bins)
            .map(|i| self.origin + i as f64 * width)
            .collect()
    }

    /// Bin with the most persistent counts.
    pub fn peak_bin(&self) -> Option<usize> {
        self.persistent
            .iter()
            .enumerate()
            .filter(|(_, &c)| c > 0)
            .max_by_key(|(_, &c)| c)
            .map(|(i, _)| i)
    }
}

/// Persistent histograms in serialisable form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramReport {
    pub blocks: usize,
    pub bin_edges: Vec<f64>,
    pub channel_1: Vec<u64>,
    pub channel_2: Vec<u64>,
    pub center_1: Vec<u64>,
    pub center_2: Vec<u64>,
}

#[derive(Debug, Clone)]
struct Histograms {
    channel_1: RollingHistogram,
    channel_2: RollingHistogram,
    center_1: RollingHistogram,
    center_2: RollingHistogram,
}

/// The four phase histograms the acquisition view shows.
///
/// Bin range is fixed from the period of the first block that carries one,
/// divided by `mult` and shifted by the phase offset.
#[derive(Debug, Clone)]
pub struct HistogramSet {
    bins: usize,
    blocks: usize,
    mult: u32,
    phase_offset: f64,
    histograms: Option<Histograms>,
}

impl HistogramSet {
    pub fn new(histogram: &HistogramConfig, phase: &PhaseConfig) -> Self {
        Self {
            bins: histogram.bins,
            blocks: histogram.blocks,
            mult: phase.mult.max(1),
            phase_offset: phase.phase_offset_ps,
            histograms: None,
        }
    }

    /// Bin every phase series of a drained block.
    pub fn ingest(&mut self, snapshot: &Snapshot) {
        if self.histograms.is_none() {
            if !(snapshot.period > 0.0) {
                return;
            }
            let span = snapshot.period / f64::from(self.mult);
            debug!(span_ps = span, bins = self.bins, "[Histogram] Bin range fixed");
            let make = || {
                RollingHistogram::new(self.bins, span, self.blocks).with_origin(-self.phase_offset)
            };
            self.histograms = Some(Histograms {
                channel_1: make(),
                channel_2: make(),
                center_1: make(),
                center_2: make(),
            });
        }

        if let Some(h) = self.histograms.as_mut() {
            h.channel_1.push_block(&snapshot.channel_1.phases);
            h.channel_2.push_block(&snapshot.channel_2.phases);
            h.center_1.push_block(&snapshot.center_phases_1());
            h.center_2.push_block(&snapshot.center_phases_2());
        }
    }

    pub fn channel_1(&self) -> Option<&RollingHistogram> {
        self.histograms.as_ref().map(|h| &h.channel_1)
    }

    pub fn channel_2(&self) -> Option<&RollingHistogram> {
        self.histograms.as_ref().map(|h| &h.channel_2)
    }

    pub fn center_1(&self) -> Option<&RollingHistogram> {
        self.histograms.as_ref().map(|h| &h.center_1)
    }

    pub fn center_2(&self) -> Option<&RollingHistogram> {
        self.histograms.as_ref().map(|h| &h.center_2)
    }

    /// Snapshot of the persistent histograms, `None` before the first block.
    pub fn report(&self) -> Option<HistogramReport> {
        self.histograms.as_ref().map(|h| HistogramReport {
            blocks: h.channel_1.blocks(),
            bin_edges: h.channel_1.bin_edges(),
            channel_1: h.channel_1.persistent().to_vec(),
            channel_2: h.channel_2.persistent().to_vec(),
            center_1: h.center_1.persistent().to_vec(),
            center_2: h.center_2.persistent().to_vec(),
        })
    }

    /// Forget the bin range and every block.
    pub fn reset(&mut self) {
        self.histograms = None;
    }
}
