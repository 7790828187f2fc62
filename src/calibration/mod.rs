//! Detector time-walk calibration.
//!
//! - [`TimeWalkTable`]: immutable offset lookup applied during phase assignment
//! - [`TimeWalkAnalysis`]: builds a table from drained, uncorrected blocks

mod time_walk;
pub mod analysis;

pub use analysis::{TimeWalkAnalysis, TimeWalkBin};
pub use time_walk::*;
