//! Time-tag and channel types

use serde::{Deserialize, Serialize};

/// One timestamped event delivered by the tagger.
///
/// `time` is in picoseconds on the tagger's own time base. Negative channel
/// numbers denote falling-edge inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub channel: i32,
    pub time: i64,
}

impl Tag {
    pub const fn new(channel: i32, time: i64) -> Self {
        Self { channel, time }
    }
}

impl From<(i32, i64)> for Tag {
    fn from((channel, time): (i32, i64)) -> Self {
        Self { channel, time }
    }
}

/// Which of the two detector inputs an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataChannel {
    One,
    Two,
}

impl DataChannel {
    /// Array index (0 or 1) for per-channel state.
    pub const fn index(self) -> usize {
        match self {
            Self::One => 0,
            Self::Two => 1,
        }
    }
}

impl std::fmt::Display for DataChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::One => write!(f, "CH1"),
            Self::Two => write!(f, "CH2"),
        }
    }
}

/// A data-channel tag after phase assignment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseEvent {
    pub channel: DataChannel,
    /// Phase within the minor cycle after time-walk correction (ps)
    pub phase: f64,
    /// Global minor-cycle index, used as the same-timeslot key
    pub minor_cycle: i64,
    /// Time since the previous tag on the same channel (ps), if any
    pub inter_arrival: Option<i64>,
}
