//! Engine Configuration - channel map and loop tuning as TOML values
//!
//! Every tuning constant of the acquisition engine is a field in this module.
//! Each struct implements `Default` with the values from [`super::defaults`],
//! so an engine built without a config file behaves like the bench setup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use super::defaults;
use crate::types::DataChannel;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "PLL_HISTOGRAM_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "pll_histogram.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one acquisition engine.
///
/// Load with `EngineConfig::load()` which searches:
/// 1. `$PLL_HISTOGRAM_CONFIG` env var
/// 2. `./pll_histogram.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Which tagger inputs carry the clock and the two detectors
    #[serde(default)]
    pub channels: ChannelConfig,

    /// PLL loop filter tuning
    #[serde(default)]
    pub loop_filter: LoopFilterConfig,

    /// Minor-cycle subdivision
    #[serde(default)]
    pub phase: PhaseConfig,

    /// Center-bin acceptance windows
    #[serde(default)]
    pub coincidence: CoincidenceConfig,

    /// Per-block buffer capacity and drain timing
    #[serde(default)]
    pub buffers: BufferConfig,

    /// Time-walk table limits and calibration
    #[serde(default)]
    pub time_walk: TimeWalkConfig,

    /// Rolling histogram layout
    #[serde(default)]
    pub histogram: HistogramConfig,
}

impl EngineConfig {
    /// Load configuration using the standard search order:
    /// 1. `$PLL_HISTOGRAM_CONFIG` environment variable
    /// 2. `./pll_histogram.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded engine config from {}", CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded engine config from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    ///
    /// Unknown keys are reported as warnings and never fail the load.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a pretty TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Write the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        std::fs::write(path, contents).map_err(|e| ConfigError::Io(path.to_path_buf(), e))
    }

    /// Validate the configuration, collecting every problem found.
    ///
    /// Checks:
    /// - Clock and data channels are pairwise distinct
    /// - `mult`, `n_bins`, bootstrap edges and histogram sizes are non-zero
    /// - Gains are finite and non-negative
    /// - Acceptance windows are ordered and finite
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let c = &self.channels;
        if c.clock == c.data_1 || c.clock == c.data_2 || c.data_1 == c.data_2 {
            errors.push(format!(
                "channels must be distinct (clock={}, data_1={}, data_2={})",
                c.clock, c.data_1, c.data_2
            ));
        }

        let lf = &self.loop_filter;
        Self::check_gain(lf.deriv_gain, "loop_filter.deriv_gain", &mut errors);
        Self::check_gain(lf.prop_gain, "loop_filter.prop_gain", &mut errors);
        if lf.bootstrap_edges < 2 {
            errors.push(format!(
                "loop_filter.bootstrap_edges must be >= 2, got {}",
                lf.bootstrap_edges
            ));
        }
        // A period off by 100% or more is not a period any more
        if !(lf.max_period_deviation > 0.0 && lf.max_period_deviation < 1.0) {
            errors.push(format!(
                "loop_filter.max_period_deviation must be in (0, 1), got {}",
                lf.max_period_deviation
            ));
        }

        if self.phase.mult == 0 {
            errors.push("phase.mult must be > 0".to_string());
        }
        if !self.phase.phase_offset_ps.is_finite() {
            errors.push("phase.phase_offset_ps must be finite".to_string());
        }

        self.coincidence
            .window_1
            .check("coincidence.window_1", &mut errors);
        self.coincidence
            .window_2
            .check("coincidence.window_2", &mut errors);

        if self.buffers.n_bins == 0 {
            errors.push("buffers.n_bins must be > 0".to_string());
        }

        let tw = &self.time_walk;
        if tw.step_ps <= 0 {
            errors.push(format!("time_walk.step_ps must be > 0, got {}", tw.step_ps));
        }
        if tw.max_len == 0 {
            errors.push("time_walk.max_len must be > 0".to_string());
        }

        let h = &self.histogram;
        if h.bins == 0 {
            errors.push("histogram.bins must be > 0".to_string());
        }
        if h.blocks == 0 {
            errors.push("histogram.blocks must be > 0".to_string());
        }

        for w in super::validation::suspicious_values(self) {
            warn!("{}", w);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_gain(value: f64, name: &str, errors: &mut Vec<String>) {
        if !value.is_finite() || value < 0.0 {
            errors.push(format!("{name} must be finite and >= 0, got {value}"));
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Config parse error ({}): {}", .0.display(), .1)]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("Config serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

// ============================================================================
// Sections
// ============================================================================

/// Tagger channel assignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub clock: i32,
    pub data_1: i32,
    pub data_2: i32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            clock: defaults::CLOCK_CHANNEL,
            data_1: defaults::DATA_CHANNEL_1,
            data_2: defaults::DATA_CHANNEL_2,
        }
    }
}

impl ChannelConfig {
    /// Map a tagger channel number to a detector, if it is one.
    pub fn data_channel(&self, channel: i32) -> Option<DataChannel> {
        if channel == self.data_1 {
            Some(DataChannel::One)
        } else if channel == self.data_2 {
            Some(DataChannel::Two)
        } else {
            None
        }
    }
}

/// PD loop filter tuning and lock criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopFilterConfig {
    /// Weight of the phase-error derivative term
    pub deriv_gain: f64,
    /// Frequency correction per unit of filtered phase error
    pub prop_gain: f64,
    /// Clock edges collected before the period estimate is trusted
    pub bootstrap_edges: usize,
    /// Relative period drift tolerated before the loop is declared unstable
    pub max_period_deviation: f64,
}

impl Default for LoopFilterConfig {
    fn default() -> Self {
        Self {
            deriv_gain: defaults::DERIV_GAIN,
            prop_gain: defaults::PROP_GAIN,
            bootstrap_edges: defaults::BOOTSTRAP_EDGES,
            max_period_deviation: defaults::MAX_PERIOD_DEVIATION,
        }
    }
}

/// Minor-cycle subdivision of the recovered period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseConfig {
    /// Minor cycles per clock period
    pub mult: u32,
    /// Offset added to the phase before folding (ps)
    pub phase_offset_ps: f64,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            mult: defaults::MULT,
            phase_offset_ps: defaults::PHASE_OFFSET_PS,
        }
    }
}

/// Exclusive phase interval admitted into the center-bin buffer (ps).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceWindow {
    pub start_ps: f64,
    pub end_ps: f64,
}

impl AcceptanceWindow {
    pub const fn new(start_ps: f64, end_ps: f64) -> Self {
        Self { start_ps, end_ps }
    }

    /// Whether `phase` lies strictly inside the window.
    pub fn contains(&self, phase: f64) -> bool {
        phase > self.start_ps && phase < self.end_ps
    }

    fn check(&self, name: &str, errors: &mut Vec<String>) {
        if !self.start_ps.is_finite() || !self.end_ps.is_finite() {
            errors.push(format!("{name}: bounds must be finite"));
        } else if self.end_ps <= self.start_ps {
            errors.push(format!(
                "{name}: end ({:.1}) must be greater than start ({:.1})",
                self.end_ps, self.start_ps
            ));
        }
    }
}

impl Default for AcceptanceWindow {
    fn default() -> Self {
        Self::new(defaults::CENTER_WINDOW_START_PS, defaults::CENTER_WINDOW_END_PS)
    }
}

/// Per-channel center-bin windows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoincidenceConfig {
    pub window_1: AcceptanceWindow,
    pub window_2: AcceptanceWindow,
}

/// Block buffer sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Capacity of every series in one block
    pub n_bins: usize,
    /// How long a drain waits for a block (ms)
    pub drain_timeout_ms: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            n_bins: defaults::N_BINS,
            drain_timeout_ms: defaults::DRAIN_TIMEOUT_MS,
        }
    }
}

/// Time-walk table limits and calibration parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeWalkConfig {
    /// Inter-arrival resolution (ps)
    pub step_ps: i64,
    /// Largest table accepted per channel
    pub max_len: usize,
    /// Minimum samples per bin during calibration
    pub min_counts: usize,
    /// Longest populated bins averaged as the zero-walk reference
    pub reference_bins: usize,
}

impl Default for TimeWalkConfig {
    fn default() -> Self {
        Self {
            step_ps: defaults::TIME_WALK_STEP_PS,
            max_len: defaults::TIME_WALK_MAX_LEN,
            min_counts: defaults::TIME_WALK_MIN_COUNTS,
            reference_bins: defaults::TIME_WALK_REFERENCE_BINS,
        }
    }
}

/// Rolling histogram layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistogramConfig {
    /// Bins across one minor cycle
    pub bins: usize,
    /// Drained blocks summed into the persistent view
    pub blocks: usize,
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            bins: defaults::HISTOGRAM_BINS,
            blocks: defaults::HISTOGRAM_BLOCKS,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
