//! Time-walk calibration from recorded blocks.
//!
//! Accumulates `(inter_arrival, phase)` samples per detector into
//! `step`-wide inter-arrival bins, then derives a [`TimeWalkTable`]:
//!
//! ```text
//! reference  = mean of the per-bin means of the `reference_bins` longest
//!              populated inter-arrival bins (fully recovered detector)
//! offset[i]  = mean_phase[i] - reference      if count[i] >= min_counts
//!            = 0                              otherwise
//! ```
//!
//! Feed it blocks drained with a zero table loaded, otherwise the analysis
//! measures the residual walk on top of the active correction.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::{debug, info};

use super::{TimeWalkError, TimeWalkTable};
use crate::config::TimeWalkConfig;
use crate::types::{ChannelSeries, DataChannel, Snapshot};

/// Running phase statistics for one inter-arrival bin.
///
/// Uses Welford's online algorithm for numerically stable mean/variance.
#[derive(Debug, Clone, Copy, Default)]
struct BinAccumulator {
    count: usize,
    mean: f64,
    m2: f64,
}

impl BinAccumulator {
    fn add_sample(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    fn std_dev(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).sqrt()
        }
    }
}

/// Summary of one inter-arrival bin, for reports and plots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeWalkBin {
    /// Lower edge of the bin (ps)
    pub inter_arrival_ps: i64,
    pub count: usize,
    pub mean_phase: f64,
    pub std_dev: f64,
}

/// Collects samples across many blocks and builds a calibrated table.
#[derive(Debug, Clone)]
pub struct TimeWalkAnalysis {
    step: i64,
    max_len: usize,
    min_counts: usize,
    reference_bins: usize,
    bins: [Vec<BinAccumulator>; 2],
    samples: u64,
}

impl TimeWalkAnalysis {
    pub fn new(config: &TimeWalkConfig) -> Self {
        Self {
            step: config.step_ps.max(1),
            max_len: config.max_len,
            min_counts: config.min_counts.max(1),
            reference_bins: config.reference_bins.max(1),
            bins: [Vec::new(), Vec::new()],
            samples: 0,
        }
    }

    /// Add every event of a drained block.
    pub fn record(&mut self, snapshot: &Snapshot) {
        self.record_series(DataChannel::One, &snapshot.channel_1);
        self.record_series(DataChannel::Two, &snapshot.channel_2);
    }

    /// Add one channel's series.
    pub fn record_series(&mut self, channel: DataChannel, series: &ChannelSeries) {
        for (&phase, &inter_arrival) in series.phases.iter().zip(&series.inter_arrival) {
            self.add_sample(channel, inter_arrival, phase);
        }
    }

    /// Add a single sample. First events (inter-arrival 0) and inter-arrivals
    /// past the table limit are skipped.
    pub fn add_sample(&mut self, channel: DataChannel, inter_arrival: i64, phase: f64) {
        if inter_arrival <= 0 {
            return;
        }
        let Ok(index) = usize::try_from(inter_arrival / self.step) else {
            return;
        };
        if index >= self.max_len {
            return;
        }

        let bins = &mut self.bins[channel.index()];
        if bins.len() <= index {
            bins.resize(index + 1, BinAccumulator::default());
        }
        bins[index].add_sample(phase);
        self.samples += 1;
    }

    /// Total samples accepted so far.
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Per-bin statistics for one channel (populated bins only).
    pub fn bins(&self, channel: DataChannel) -> Vec<TimeWalkBin> {
        self.bins[channel.index()]
            .iter()
            .enumerate()
            .filter(|(_, b)| b.count > 0)
            .map(|(i, b)| TimeWalkBin {
                inter_arrival_ps: i as i64 * self.step,
                count: b.count,
                mean_phase: b.mean,
                std_dev: b.std_dev(),
            })
            .collect()
    }

    /// Derive a table from everything recorded so far.
    pub fn build_table(&self) -> Result<TimeWalkTable, TimeWalkError> {
        let offsets_1 = self.channel_offsets(DataChannel::One)?;
        let offsets_2 = self.channel_offsets(DataChannel::Two)?;

        let len = offsets_1.len().max(offsets_2.len());
        let pad = |mut v: Vec<f64>| {
            v.resize(len, 0.0);
            v
        };

        info!(
            entries = len,
            step_ps = self.step,
            samples = self.samples,
            "[TimeWalk] Calibration table built"
        );
        TimeWalkTable::new(self.step, pad(offsets_1), pad(offsets_2), self.max_len)
    }

    fn channel_offsets(&self, channel: DataChannel) -> Result<Vec<f64>, TimeWalkError> {
        let bins = &self.bins[channel.index()];
        let populated: Vec<usize> = bins
            .iter()
            .enumerate()
            .filter(|(_, b)| b.count >= self.min_counts)
            .map(|(i, _)| i)
            .collect();

        let Some(&last) = populated.last() else {
            return Err(TimeWalkError::InsufficientData(channel));
        };

        let reference = populated
            .iter()
            .rev()
            .take(self.reference_bins)
            .map(|&i| bins[i].mean)
            .collect::<Vec<f64>>()
            .mean();
        debug!(%channel, reference_ps = reference, bins = populated.len(), "[TimeWalk] Reference phase");

        let mut offsets = vec![0.0; last + 1];
        for &i in &populated {
            offsets[i] = bins[i].mean - reference;
        }
        Ok(offsets)
    }

    pub fn reset(&mut self) {
        self.bins = [Vec::new(), Vec::new()];
        self.samples = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TimeWalkConfig {
        TimeWalkConfig {
            step_ps: 1_000,
            max_len: 100,
            min_counts: 5,
            reference_bins: 2,
        }
    }

    /// Detector that reports 40 ps late right after firing, 20 ps late
    /// one step later and on time after that.
    fn walked_phase(inter_arrival: i64) -> f64 {
        match inter_arrival / 1_000 {
            0 => 140.0,
            1 => 120.0,
            _ => 100.0,
        }
    }

    #[test]
    fn test_offsets_relative_to_relaxed_detector() {
        let mut analysis = TimeWalkAnalysis::new(&config());
        for channel in [DataChannel::One, DataChannel::Two] {
            for ia in [500, 1_500, 2_500, 3_500, 4_500] {
                for _ in 0..10 {
                    analysis.add_sample(channel, ia, walked_phase(ia));
                }
            }
        }

        let table = analysis.build_table().expect("calibrated");
        assert_eq!(table.len(), 5);
        assert_eq!(table.offsets(DataChannel::One), &[40.0, 20.0, 0.0, 0.0, 0.0]);

        // Applying the table flattens the walk
        for ia in [500, 1_500, 4_500] {
            let corrected = table.correct(DataChannel::Two, walked_phase(ia), Some(ia));
            assert!((corrected - 100.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_sparse_bins_get_no_offset() {
        let mut analysis = TimeWalkAnalysis::new(&config());
        for channel in [DataChannel::One, DataChannel::Two] {
            analysis.add_sample(channel, 500, 999.0);
            for _ in 0..5 {
                analysis.add_sample(channel, 2_500, 100.0);
            }
        }
        let table = analysis.build_table().expect("calibrated");
        assert_eq!(table.offsets(DataChannel::One)[0], 0.0);
    }

    #[test]
    fn test_first_events_and_far_bins_skipped() {
        let mut analysis = TimeWalkAnalysis::new(&config());
        analysis.add_sample(DataChannel::One, 0, 10.0);
        analysis.add_sample(DataChannel::One, 1_000 * 100, 10.0);
        assert_eq!(analysis.samples(), 0);
        assert!(analysis.bins(DataChannel::One).is_empty());
    }

    #[test]
    fn test_empty_channel_is_an_error() {
        let mut analysis = TimeWalkAnalysis::new(&config());
        for _ in 0..10 {
            analysis.add_sample(DataChannel::One, 1_500, 100.0);
        }
        assert_eq!(
            analysis.build_table(),
            Err(TimeWalkError::InsufficientData(DataChannel::Two))
        );
    }

    #[test]
    fn test_records_snapshot_series() {
        let mut analysis = TimeWalkAnalysis::new(&config());
        let series = ChannelSeries {
            phases: vec![100.0, 110.0, 120.0],
            inter_arrival: vec![0, 1_200, 1_800],
        };
        analysis.record_series(DataChannel::Two, &series);
        let bins = analysis.bins(DataChannel::Two);
        assert_eq!(bins.len(), 1);
        assert_eq!(bins[0].inter_arrival_ps, 1_000);
        assert_eq!(bins[0].count, 2);
        assert!((bins[0].mean_phase - 115.0).abs() < 1e-9);
    }
}
