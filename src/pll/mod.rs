//! Digital phase-locked loop for the tagger clock channel.
//!
//! Tracks a noisy periodic clock one edge at a time:
//!
//! ```text
//! arg      = ((t - epoch_int) - epoch_frac - period) * 2π / period
//! phi      = sin(arg)                                  phase detector
//! filtered = phi + (phi - phi_prev) * deriv_gain       PD loop filter
//! freq    -= filtered * prop_gain
//! cycles   = round((t - epoch_int) / period)           absorbs missed edges
//! period   = 1 / freq
//! epoch   += cycles * period                           split int + frac
//! ```
//!
//! The recovered edge is kept as an `i64` picosecond count plus an `f64`
//! fraction in `[0, 1)`. A plain `f64` epoch loses sub-picosecond resolution
//! after a few hours of picosecond timestamps.
//!
//! Before any tracking happens the loop collects `bootstrap_edges` clock
//! tags and seeds the period with their mean spacing; those edges are then
//! replayed through the tracker so they appear in the recovered series too.

use std::f64::consts::TAU;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::LoopFilterConfig;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LoopError {
    #[error("PLL unstable: period {period:.3} ps drifted from bootstrap estimate {nominal:.3} ps")]
    Unstable { period: f64, nominal: f64 },
}

// ============================================================================
// Clock State
// ============================================================================

/// Persistent numeric state of a locked loop.
#[derive(Debug, Clone, PartialEq)]
pub struct ClockState {
    /// Integer part of the most recent recovered edge (ps)
    pub epoch_int: i64,
    /// Fractional part of the recovered edge, always in `[0, 1)`
    pub epoch_frac: f64,
    /// Instantaneous period estimate (ps)
    pub period: f64,
    /// Phase detector output at the previous edge
    pub phase_error_prev: f64,
    /// `1 / period` (1/ps)
    pub frequency: f64,
    /// Recovered clock cycles since lock, including missed edges
    pub cycle_count: i64,
}

impl ClockState {
    /// Seed the state one period before the first observed edge.
    pub fn seeded(first_edge: i64, period: f64) -> Self {
        Self {
            epoch_int: (first_edge as f64 - period) as i64,
            epoch_frac: 0.0,
            period,
            phase_error_prev: 0.0,
            frequency: period.recip(),
            cycle_count: 0,
        }
    }

    /// Advance the loop by one clock tag and return the recovered edge.
    pub fn observe_clock_edge(&mut self, time: i64, gains: LoopGains) -> RecoveredEdge {
        let elapsed = (time - self.epoch_int) as f64;

        let arg = (elapsed - self.epoch_frac - self.period) * TAU / self.period;
        let phi = arg.sin();
        let filtered = phi + (phi - self.phase_error_prev) * gains.deriv;
        self.frequency -= filtered * gains.prop;

        // Rounded with the pre-update period so a dropped edge counts as a cycle
        let cycles = (elapsed / self.period).round();
        self.cycle_count += cycles as i64;
        self.period = self.frequency.recip();

        let adj = cycles * self.period;
        let adj_int = adj.trunc();
        self.epoch_int += adj_int as i64;
        self.epoch_frac += adj - adj_int;
        let carry = self.epoch_frac.floor();
        if carry != 0.0 {
            self.epoch_int += carry as i64;
            self.epoch_frac -= carry;
        }

        self.phase_error_prev = phi;

        RecoveredEdge {
            raw: time,
            epoch_int: self.epoch_int,
            epoch_frac: self.epoch_frac,
            phase_error: phi,
        }
    }
}

/// Loop filter gains.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopGains {
    pub deriv: f64,
    pub prop: f64,
}

/// One clock tag paired with the loop's estimate of the edge it belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecoveredEdge {
    /// Raw clock-tag timestamp (ps)
    pub raw: i64,
    pub epoch_int: i64,
    pub epoch_frac: f64,
    /// Phase detector output for this edge
    pub phase_error: f64,
}

// ============================================================================
// Phase-Locked Loop
// ============================================================================

#[derive(Debug, Clone)]
enum LockState {
    /// Collecting clock edges for the initial period estimate.
    Bootstrapping { edges: Vec<i64> },
    Locked { state: ClockState, nominal_period: f64 },
}

/// Clock recovery loop with bootstrap, tracking and divergence detection.
#[derive(Debug, Clone)]
pub struct PhaseLockedLoop {
    gains: LoopGains,
    bootstrap_edges: usize,
    max_period_deviation: f64,
    lock: LockState,
    relocks: u64,
}

impl PhaseLockedLoop {
    pub fn new(config: &LoopFilterConfig) -> Self {
        let bootstrap_edges = config.bootstrap_edges.max(2);
        Self {
            gains: LoopGains {
                deriv: config.deriv_gain,
                prop: config.prop_gain,
            },
            bootstrap_edges,
            max_period_deviation: config.max_period_deviation,
            lock: LockState::Bootstrapping {
                edges: Vec::with_capacity(bootstrap_edges),
            },
            relocks: 0,
        }
    }

    /// Feed one clock tag.
    ///
    /// Every edge the loop recovers is passed to `on_edge`, in time order.
    /// While bootstrapping nothing is emitted; the edge that completes the
    /// bootstrap window emits the whole window at once.
    ///
    /// On divergence the loop drops back to bootstrapping and the error is
    /// returned so the caller can abandon the current batch.
    pub fn observe<F>(&mut self, time: i64, mut on_edge: F) -> Result<(), LoopError>
    where
        F: FnMut(RecoveredEdge),
    {
        match &mut self.lock {
            LockState::Bootstrapping { edges } => {
                edges.push(time);
                if edges.len() < self.bootstrap_edges {
                    return Ok(());
                }

                let edges = std::mem::take(edges);
                let span = (edges[edges.len() - 1] - edges[0]) as f64;
                let period = span / (edges.len() - 1) as f64;
                if !period.is_finite() || period <= 0.0 {
                    warn!(
                        span_ps = span,
                        "[PLL] Bootstrap window has no usable span, restarting"
                    );
                    self.restart_bootstrap();
                    return Ok(());
                }

                info!(
                    period_ps = period,
                    edges = edges.len(),
                    "[PLL] Bootstrap complete, tracking clock"
                );

                let mut state = ClockState::seeded(edges[0], period);
                for &t in &edges {
                    on_edge(state.observe_clock_edge(t, self.gains));
                }
                self.lock = LockState::Locked {
                    state,
                    nominal_period: period,
                };
                self.check_stability()
            }
            LockState::Locked { state, .. } => {
                on_edge(state.observe_clock_edge(time, self.gains));
                self.check_stability()
            }
        }
    }

    fn check_stability(&mut self) -> Result<(), LoopError> {
        let LockState::Locked {
            state,
            nominal_period,
        } = &self.lock
        else {
            return Ok(());
        };

        let period = state.period;
        let nominal = *nominal_period;
        let deviation = (period / nominal - 1.0).abs();
        if period.is_finite() && period > 0.0 && deviation <= self.max_period_deviation {
            return Ok(());
        }

        warn!(
            period_ps = period,
            nominal_ps = nominal,
            "[PLL] Loop diverged, dropping lock"
        );
        self.restart_bootstrap();
        self.relocks += 1;
        Err(LoopError::Unstable { period, nominal })
    }

    fn restart_bootstrap(&mut self) {
        debug!("[PLL] Restarting bootstrap window");
        self.lock = LockState::Bootstrapping {
            edges: Vec::with_capacity(self.bootstrap_edges),
        };
    }

    /// Drop lock and start a fresh bootstrap window.
    pub fn reset(&mut self) {
        self.restart_bootstrap();
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.lock, LockState::Locked { .. })
    }

    /// Clock state once locked.
    pub fn clock(&self) -> Option<&ClockState> {
        match &self.lock {
            LockState::Locked { state, .. } => Some(state),
            LockState::Bootstrapping { .. } => None,
        }
    }

    /// Current period estimate, `None` while bootstrapping.
    pub fn period(&self) -> Option<f64> {
        self.clock().map(|c| c.period)
    }

    /// Period measured over the bootstrap window, `None` while bootstrapping.
    pub fn nominal_period(&self) -> Option<f64> {
        match &self.lock {
            LockState::Locked { nominal_period, .. } => Some(*nominal_period),
            LockState::Bootstrapping { .. } => None,
        }
    }

    /// Number of times lock was lost to divergence.
    pub fn relocks(&self) -> u64 {
        self.relocks
    }
}
