//! Drained block types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One coincidence, ordered by detector regardless of arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoincidencePair {
    /// Phase of the channel-1 event (ps)
    pub phase_1: f64,
    /// Phase of the channel-2 event (ps)
    pub phase_2: f64,
}

/// Per-detector series for one block.
///
/// `phases[i]` and `inter_arrival[i]` describe the same event. An
/// inter-arrival of `0` marks the first event seen on the channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelSeries {
    pub phases: Vec<f64>,
    pub inter_arrival: Vec<i64>,
}

impl ChannelSeries {
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }
}

/// Everything accumulated between two drains.
///
/// All series share the same block boundary: they cover exactly the batches
/// ingested after the previous drain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Sequence number of this block (first drain is 1)
    pub block: u64,
    pub drained_at: DateTime<Utc>,
    /// Raw clock-tag timestamps (ps)
    pub clock_edges: Vec<i64>,
    /// Integer part of the recovered edge after each clock tag (ps)
    pub recovered_edges: Vec<i64>,
    pub channel_1: ChannelSeries,
    pub channel_2: ChannelSeries,
    /// Same-minor-cycle pairs with no phase restriction
    pub full_pairs: Vec<CoincidencePair>,
    /// Pairs where both phases fell inside the acceptance windows
    pub center_pairs: Vec<CoincidencePair>,
    /// Consecutive events sharing a minor cycle, any channel
    pub raw_coincidences: u64,
    /// Recovered clock period at drain time (ps)
    pub period: f64,
    /// At least one series hit capacity and dropped events in this block
    pub truncated: bool,
}

impl Snapshot {
    /// Recovered-minus-raw clock residuals (ps), useful for judging lock quality.
    pub fn clock_residuals(&self) -> Vec<i64> {
        self.clock_edges
            .iter()
            .zip(&self.recovered_edges)
            .map(|(raw, recovered)| raw - recovered)
            .collect()
    }

    /// Channel-1 phases of every center-bin coincidence.
    pub fn center_phases_1(&self) -> Vec<f64> {
        self.center_pairs.iter().map(|p| p.phase_1).collect()
    }

    /// Channel-2 phases of every center-bin coincidence.
    pub fn center_phases_2(&self) -> Vec<f64> {
        self.center_pairs.iter().map(|p| p.phase_2).collect()
    }
}
