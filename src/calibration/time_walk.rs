//! Time-walk offset table.
//!
//! A detector that fired recently reports later than one that has been idle.
//! The table maps the inter-arrival time since the previous event on the same
//! channel to a phase offset: `index = inter_arrival / step`. Indices past the
//! end of the table, negative inter-arrivals and first events apply no
//! correction.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::DataChannel;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TimeWalkError {
    #[error("time-walk step must be > 0, got {0}")]
    InvalidStep(i64),

    #[error("time-walk offset arrays differ in length: {0} vs {1}")]
    LengthMismatch(usize, usize),

    #[error("time-walk table has {len} entries, limit is {max}")]
    TooLong { len: usize, max: usize },

    #[error("time-walk offset {index} on {channel} is not finite")]
    NonFinite { channel: DataChannel, index: usize },

    #[error("not enough samples to calibrate {0}")]
    InsufficientData(DataChannel),
}

/// Offset lookup for both detectors. Never mutated once built.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeWalkTable {
    step: i64,
    offsets: [Vec<f64>; 2],
}

impl TimeWalkTable {
    /// An empty table: every lookup is a no-op.
    pub fn zero(step: i64) -> Self {
        Self {
            step: step.max(1),
            offsets: [Vec::new(), Vec::new()],
        }
    }

    /// Build a table, rejecting inconsistent or oversized input.
    pub fn new(
        step: i64,
        offsets_1: Vec<f64>,
        offsets_2: Vec<f64>,
        max_len: usize,
    ) -> Result<Self, TimeWalkError> {
        if step <= 0 {
            return Err(TimeWalkError::InvalidStep(step));
        }
        if offsets_1.len() != offsets_2.len() {
            return Err(TimeWalkError::LengthMismatch(offsets_1.len(), offsets_2.len()));
        }
        if offsets_1.len() > max_len {
            return Err(TimeWalkError::TooLong {
                len: offsets_1.len(),
                max: max_len,
            });
        }
        for (channel, offsets) in [(DataChannel::One, &offsets_1), (DataChannel::Two, &offsets_2)]
        {
            if let Some(index) = offsets.iter().position(|o| !o.is_finite()) {
                return Err(TimeWalkError::NonFinite { channel, index });
            }
        }

        Ok(Self {
            step,
            offsets: [offsets_1, offsets_2],
        })
    }

    /// Same shape with every offset set to zero.
    pub fn cleared(&self) -> Self {
        Self {
            step: self.step,
            offsets: [
                vec![0.0; self.offsets[0].len()],
                vec![0.0; self.offsets[1].len()],
            ],
        }
    }

    pub fn step(&self) -> i64 {
        self.step
    }

    pub fn len(&self) -> usize {
        self.offsets[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets[0].is_empty()
    }

    /// True when no lookup can change a phase.
    pub fn is_zero(&self) -> bool {
        self.offsets.iter().flatten().all(|&o| o == 0.0)
    }

    pub fn offsets(&self, channel: DataChannel) -> &[f64] {
        &self.offsets[channel.index()]
    }

    /// Offset for an inter-arrival time, `None` when out of range.
    pub fn offset(&self, channel: DataChannel, inter_arrival: i64) -> Option<f64> {
        if inter_arrival < 0 {
            return None;
        }
        let index = usize::try_from(inter_arrival / self.step).ok()?;
        self.offsets[channel.index()].get(index).copied()
    }

    /// Apply the correction to a raw phase.
    pub fn correct(&self, channel: DataChannel, phase: f64, inter_arrival: Option<i64>) -> f64 {
        match inter_arrival.and_then(|ia| self.offset(channel, ia)) {
            Some(offset) => phase - offset,
            None => phase,
        }
    }

    pub fn to_file(&self) -> TimeWalkFile {
        TimeWalkFile {
            step_ps: self.step,
            offsets_1: self.offsets[0].clone(),
            offsets_2: self.offsets[1].clone(),
        }
    }
}

/// On-disk (JSON) form of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeWalkFile {
    pub step_ps: i64,
    pub offsets_1: Vec<f64>,
    pub offsets_2: Vec<f64>,
}

impl TimeWalkFile {
    pub fn into_table(self, max_len: usize) -> Result<TimeWalkTable, TimeWalkError> {
        TimeWalkTable::new(self.step_ps, self.offsets_1, self.offsets_2, max_len)
    }
}
