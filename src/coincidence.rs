//! Coincidence detection between the two detectors.
//!
//! Two events coincide when they share a minor-cycle index. Each detector
//! keeps a single-slot pending buffer holding the most recent unmatched
//! event:
//!
//! - **full**: every event, no phase restriction
//! - **center**: only events whose phase falls strictly inside the
//!   acceptance window of their channel
//!
//! When an event from the other channel arrives in the same minor cycle the
//! pair is emitted (always ordered as channel 1, channel 2) and the slot is
//! emptied. Otherwise the new event replaces whatever was pending.
//!
//! A separate raw counter counts consecutive events (either channel) that
//! land in the same minor cycle.

use crate::config::{AcceptanceWindow, CoincidenceConfig};
use crate::types::{CoincidencePair, DataChannel};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Pending {
    channel: DataChannel,
    phase: f64,
    minor_cycle: i64,
}

/// What a single event produced.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Coincidences {
    pub full: Option<CoincidencePair>,
    pub center: Option<CoincidencePair>,
    /// The event shared a minor cycle with the previous event
    pub raw: bool,
}

#[derive(Debug, Clone)]
pub struct CoincidenceDetector {
    windows: [AcceptanceWindow; 2],
    full: Option<Pending>,
    center: Option<Pending>,
    last_minor_cycle: Option<i64>,
    raw_coincidences: u64,
}

impl CoincidenceDetector {
    pub fn new(config: &CoincidenceConfig) -> Self {
        Self {
            windows: [config.window_1, config.window_2],
            full: None,
            center: None,
            last_minor_cycle: None,
            raw_coincidences: 0,
        }
    }

    /// Feed one phase-assigned event.
    pub fn observe(&mut self, channel: DataChannel, phase: f64, minor_cycle: i64) -> Coincidences {
        let event = Pending {
            channel,
            phase,
            minor_cycle,
        };

        let full = pair_or_hold(&mut self.full, event);
        let center = if self.windows[channel.index()].contains(phase) {
            pair_or_hold(&mut self.center, event)
        } else {
            None
        };

        let raw = self.last_minor_cycle == Some(minor_cycle);
        if raw {
            self.raw_coincidences += 1;
            self.last_minor_cycle = None;
        } else {
            self.last_minor_cycle = Some(minor_cycle);
        }

        Coincidences { full, center, raw }
    }

    /// Raw coincidences counted since construction or the last reset.
    pub fn raw_coincidences(&self) -> u64 {
        self.raw_coincidences
    }

    /// Empty both pending slots and the raw counter state.
    pub fn reset(&mut self) {
        self.full = None;
        self.center = None;
        self.last_minor_cycle = None;
        self.raw_coincidences = 0;
    }
}

fn pair_or_hold(slot: &mut Option<Pending>, event: Pending) -> Option<CoincidencePair> {
    match *slot {
        Some(pending)
            if pending.minor_cycle == event.minor_cycle && pending.channel != event.channel =>
        {
            *slot = None;
            let (one, two) = match event.channel {
                DataChannel::Two => (pending, event),
                DataChannel::One => (event, pending),
            };
            Some(CoincidencePair {
                phase_1: one.phase,
                phase_2: two.phase,
            })
        }
        _ => {
            *slot = Some(event);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> CoincidenceDetector {
        CoincidenceDetector::new(&CoincidenceConfig {
            window_1: AcceptanceWindow::new(90.0, 150.0),
            window_2: AcceptanceWindow::new(90.0, 150.0),
        })
    }

    #[test]
    fn test_pair_is_ordered_by_channel() {
        let mut d = detector();
        assert_eq!(d.observe(DataChannel::Two, 200.0, 5).full, None);
        let out = d.observe(DataChannel::One, 10.0, 5);
        assert_eq!(
            out.full,
            Some(CoincidencePair {
                phase_1: 10.0,
                phase_2: 200.0
            })
        );
        // Outside both windows
        assert_eq!(out.center, None);
    }

    #[test]
    fn test_different_minor_cycle_replaces_pending() {
        let mut d = detector();
        d.observe(DataChannel::One, 100.0, 5);
        assert_eq!(d.observe(DataChannel::Two, 100.0, 6).full, None);
        // Channel-2 event at cycle 6 is now pending
        let out = d.observe(DataChannel::One, 120.0, 6);
        assert_eq!(
            out.full,
            Some(CoincidencePair {
                phase_1: 120.0,
                phase_2: 100.0
            })
        );
    }

    #[test]
    fn test_same_channel_does_not_pair() {
        let mut d = detector();
        d.observe(DataChannel::One, 100.0, 5);
        let out = d.observe(DataChannel::One, 110.0, 5);
        assert_eq!(out.full, None);
        assert!(out.raw);

        // Latest channel-1 event is pending and pairs with channel 2
        let out = d.observe(DataChannel::Two, 130.0, 5);
        assert_eq!(
            out.full,
            Some(CoincidencePair {
                phase_1: 110.0,
                phase_2: 130.0
            })
        );
    }

    #[test]
    fn test_third_event_starts_fresh() {
        let mut d = detector();
        d.observe(DataChannel::One, 100.0, 7);
        assert!(d.observe(DataChannel::Two, 100.0, 7).full.is_some());
        // Slot was emptied, so a third event in the same cycle is held
        assert_eq!(d.observe(DataChannel::One, 100.0, 7).full, None);
        assert!(d.observe(DataChannel::Two, 100.0, 7).full.is_some());
    }

    #[test]
    fn test_center_requires_both_inside_window() {
        let mut d = detector();
        d.observe(DataChannel::One, 120.0, 3);
        let out = d.observe(DataChannel::Two, 160.0, 3);
        assert!(out.full.is_some());
        assert_eq!(out.center, None);

        d.observe(DataChannel::One, 120.0, 4);
        let out = d.observe(DataChannel::Two, 100.0, 4);
        assert_eq!(
            out.center,
            Some(CoincidencePair {
                phase_1: 120.0,
                phase_2: 100.0
            })
        );
    }

    #[test]
    fn test_window_bounds_are_exclusive() {
        let mut d = detector();
        d.observe(DataChannel::One, 90.0, 1);
        let out = d.observe(DataChannel::Two, 150.0, 1);
        assert!(out.full.is_some());
        assert_eq!(out.center, None);
    }

    #[test]
    fn test_center_slot_independent_of_full_slot() {
        let mut d = detector();
        d.observe(DataChannel::One, 100.0, 9);
        // Out-of-window event replaces the full slot but not the center slot
        d.observe(DataChannel::One, 500.0, 10);
        let out = d.observe(DataChannel::Two, 110.0, 9);
        assert_eq!(out.full, None);
        assert_eq!(
            out.center,
            Some(CoincidencePair {
                phase_1: 100.0,
                phase_2: 110.0
            })
        );
    }

    #[test]
    fn test_raw_counter_counts_consecutive_pairs() {
        let mut d = detector();
        for (ch, cycle) in [
            (DataChannel::One, 1),
            (DataChannel::One, 1),
            (DataChannel::Two, 1),
            (DataChannel::Two, 1),
            (DataChannel::One, 2),
            (DataChannel::Two, 3),
        ] {
            d.observe(ch, 0.0, cycle);
        }
        assert_eq!(d.raw_coincidences(), 2);
        d.reset();
        assert_eq!(d.raw_coincidences(), 0);
    }
}
