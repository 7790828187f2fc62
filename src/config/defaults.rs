//! System-wide default constants.
//!
//! Centralises the tuning numbers of the acquisition engine. Grouped by
//! subsystem for easy discovery. Every value here is the `Default` of the
//! matching field in [`EngineConfig`](super::EngineConfig).

// ============================================================================
// Channels
// ============================================================================

/// Clock reference input (event divider output of the tagger).
pub const CLOCK_CHANNEL: i32 = 9;

/// First detector input (falling-edge trigger, hence negative).
pub const DATA_CHANNEL_1: i32 = -5;

/// Second detector input.
pub const DATA_CHANNEL_2: i32 = -14;

// ============================================================================
// Loop Filter
// ============================================================================

/// Derivative gain of the PD loop filter.
pub const DERIV_GAIN: f64 = 0.01;

/// Proportional gain applied to the filtered phase error (1/ps).
pub const PROP_GAIN: f64 = 2e-9;

/// Number of clock edges used to bootstrap the period estimate.
pub const BOOTSTRAP_EDGES: usize = 1_000;

/// Largest allowed relative drift of the period away from the bootstrap
/// estimate before the loop is declared unstable.
pub const MAX_PERIOD_DEVIATION: f64 = 0.25;

// ============================================================================
// Phase Assignment
// ============================================================================

/// Minor cycles per recovered clock period.
pub const MULT: u32 = 1;

/// User phase offset added before folding into minor cycles (ps).
pub const PHASE_OFFSET_PS: f64 = 0.0;

// ============================================================================
// Coincidence
// ============================================================================

/// Start of the center-bin acceptance window (ps, exclusive).
pub const CENTER_WINDOW_START_PS: f64 = 90.0;

/// End of the center-bin acceptance window (ps, exclusive).
pub const CENTER_WINDOW_END_PS: f64 = 150.0;

// ============================================================================
// Buffers
// ============================================================================

/// Capacity of every per-block series.
pub const N_BINS: usize = 1_000_000;

/// Default time the drainer waits for a block before reporting no data (ms).
pub const DRAIN_TIMEOUT_MS: u64 = 500;

// ============================================================================
// Time Walk
// ============================================================================

/// Inter-arrival resolution of the time-walk table (ps).
pub const TIME_WALK_STEP_PS: i64 = 500;

/// Maximum number of entries a time-walk table may hold per channel.
pub const TIME_WALK_MAX_LEN: usize = 10_000;

/// Minimum samples in an inter-arrival bin before it contributes an offset.
pub const TIME_WALK_MIN_COUNTS: usize = 20;

/// Number of longest populated inter-arrival bins averaged as the
/// zero-walk reference.
pub const TIME_WALK_REFERENCE_BINS: usize = 10;

// ============================================================================
// Histograms
// ============================================================================

/// Number of bins spanning one minor cycle.
pub const HISTOGRAM_BINS: usize = 250;

/// Number of drained blocks summed into the persistent histogram.
pub const HISTOGRAM_BLOCKS: usize = 10;

// ============================================================================
// Pipeline
// ============================================================================

/// Interval between drain attempts in the processing loop (ms).
pub const DRAIN_INTERVAL_MS: u64 = 100;

/// Nominal synthetic clock period (ps).
pub const SYNTHETIC_PERIOD_PS: i64 = 244_556;

/// Clock edges per synthetic batch.
pub const SYNTHETIC_EDGES_PER_BATCH: usize = 5_000;
