//! Engine Configuration Module
//!
//! Provides the acquisition engine configuration loaded from TOML files:
//! channel assignments, loop filter gains, minor-cycle subdivision,
//! acceptance windows and buffer capacities.
//!
//! ## Loading Order
//!
//! 1. `PLL_HISTOGRAM_CONFIG` environment variable (path to TOML file)
//! 2. `pll_histogram.toml` in the current working directory
//! 3. Built-in defaults (see [`defaults`])
//!
//! ## Usage
//!
//! ```ignore
//! let config = EngineConfig::load();
//! let engine = HistogramEngine::new(config)?;
//! ```

mod engine_config;
pub mod defaults;
pub mod validation;

pub use engine_config::*;
