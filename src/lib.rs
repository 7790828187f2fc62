//! pll-histogram: clock recovery and phase histogramming for time taggers
//!
//! Streams of `(channel, picosecond timestamp)` tags are split into a clock
//! channel and two detector channels. A software PLL recovers the clock
//! edges; detector events are expressed as phases within a minor cycle of
//! the recovered clock, corrected for detector time walk, and paired into
//! coincidences.
//!
//! ## Architecture
//!
//! - **PLL**: bootstrap period estimate, PD loop filter, split-epoch tracking
//! - **Phase**: minor-cycle folding and time-walk correction
//! - **Coincidence**: single-slot pairing, full and center-bin
//! - **Engine**: ingest/drain hand-off over fixed-capacity block buffers
//! - **Pipeline**: async sources, ingestion and drain tasks

pub mod accumulator;
pub mod calibration;
pub mod coincidence;
pub mod config;
pub mod engine;
pub mod histogram;
pub mod phase;
pub mod pipeline;
pub mod pll;
pub mod types;

// Re-export configuration
pub use config::{ConfigError, EngineConfig};

// Re-export commonly used types
pub use types::{ChannelSeries, CoincidencePair, DataChannel, PhaseEvent, Snapshot, Tag};

// Re-export the engine
pub use engine::{BatchReport, EngineError, EngineStats, HistogramEngine};

// Re-export processing components
pub use calibration::{TimeWalkAnalysis, TimeWalkError, TimeWalkFile, TimeWalkTable};
pub use coincidence::{CoincidenceDetector, Coincidences};
pub use histogram::{HistogramReport, HistogramSet, RollingHistogram};
pub use phase::PhaseAssigner;
pub use pll::{ClockState, LoopError, PhaseLockedLoop};
