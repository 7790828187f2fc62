//! Phase assignment for data-channel tags.
//!
//! Expresses each detector event relative to the most recent recovered
//! clock edge, corrects it for time walk, and folds it into one of `mult`
//! minor cycles per clock period:
//!
//! ```text
//! phase       = (t - epoch_int) - epoch_frac - walk[channel][Δt / step]
//! sub_period  = period / mult
//! minor       = floor((phase + phase_offset) / sub_period)
//! phase      -= minor * sub_period
//! minor_cycle = cycle_count * mult + minor
//! ```

use crate::calibration::TimeWalkTable;
use crate::config::PhaseConfig;
use crate::pll::ClockState;
use crate::types::{DataChannel, PhaseEvent};

/// Per-channel phase assignment state (previous arrival times).
#[derive(Debug, Clone)]
pub struct PhaseAssigner {
    mult: u32,
    phase_offset: f64,
    prev_arrival: [Option<i64>; 2],
}

impl PhaseAssigner {
    pub fn new(config: &PhaseConfig) -> Self {
        Self {
            mult: config.mult.max(1),
            phase_offset: config.phase_offset_ps,
            prev_arrival: [None, None],
        }
    }

    /// Assign a phase and minor-cycle index to one detector event.
    ///
    /// Only call once the loop is locked. Updates the channel's previous
    /// arrival time as a side effect.
    pub fn assign(
        &mut self,
        channel: DataChannel,
        time: i64,
        clock: &ClockState,
        table: &TimeWalkTable,
    ) -> PhaseEvent {
        let raw = (time - clock.epoch_int) as f64 - clock.epoch_frac;

        let prev = &mut self.prev_arrival[channel.index()];
        let inter_arrival = prev.map(|p| time - p);
        *prev = Some(time);

        let phase = table.correct(channel, raw, inter_arrival);

        let sub_period = clock.period / f64::from(self.mult);
        let minor = ((phase + self.phase_offset) / sub_period).floor();
        let phase = phase - minor * sub_period;
        let minor_cycle = clock.cycle_count * i64::from(self.mult) + minor as i64;

        PhaseEvent {
            channel,
            phase,
            minor_cycle,
            inter_arrival,
        }
    }

    /// Forget previous arrival times (after a relock or clear).
    pub fn reset(&mut self) {
        self.prev_arrival = [None, None];
    }
}
