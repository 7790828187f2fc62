//! Processing Pipeline Module
//!
//! ```text
//! TASK 1: Ingestion (source → engine, one batch at a time)
//! TASK 2: Drain (engine → histograms / time-walk analysis, fixed interval)
//! ```
//!
//! Both tasks share one [`HistogramEngine`](crate::engine::HistogramEngine)
//! handle and a cancellation token.

pub mod source;
pub mod processing_loop;

pub use processing_loop::{DrainLoop, DrainOutcome, IngestStats, IngestionLoop};
pub use source::{BatchEvent, StdinSource, SyntheticConfig, SyntheticSource, TagSource};
