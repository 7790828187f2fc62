//! Fixed-capacity block accumulation.
//!
//! Every derived series is written into a buffer allocated once at startup
//! with room for `n_bins` entries. When any series fills up, the block is
//! flagged as truncated and every series refuses entries until the next
//! drain, so all of them end at the same point in time.
//! Draining hands the contents out and resets every cursor, so the next
//! block starts empty without reallocating.

use chrono::Utc;
use tracing::{debug, warn};

use crate::coincidence::Coincidences;
use crate::pll::RecoveredEdge;
use crate::types::{ChannelSeries, CoincidencePair, PhaseEvent, Snapshot};

// ============================================================================
// Bounded Series
// ============================================================================

/// Append-only buffer that refuses writes past its capacity.
#[derive(Debug, Clone)]
pub struct BoundedSeries<T> {
    items: Vec<T>,
    capacity: usize,
    dropped: u64,
}

impl<T> BoundedSeries<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Append an entry. Returns `false` (and counts a drop) when full.
    pub fn push(&mut self, item: T) -> bool {
        if self.items.len() >= self.capacity {
            self.dropped += 1;
            return false;
        }
        self.items.push(item);
        true
    }

    /// Move the contents out, keeping the allocation for the next block.
    pub fn take(&mut self) -> Vec<T> {
        self.dropped = 0;
        self.items.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.dropped = 0;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries refused since the last take.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }
}

// ============================================================================
// Block Accumulator
// ============================================================================

/// All series of the block currently being filled.
///
/// Paired series (raw/recovered clock edges, phase/inter-arrival per
/// channel) are stored as tuples so they always share one cursor.
#[derive(Debug)]
pub struct BatchAccumulator {
    clock: BoundedSeries<(i64, i64)>,
    channels: [BoundedSeries<(f64, i64)>; 2],
    full_pairs: BoundedSeries<CoincidencePair>,
    center_pairs: BoundedSeries<CoincidencePair>,
    raw_coincidences: u64,
    truncated: bool,
    blocks: u64,
    overflowed: u64,
}

impl BatchAccumulator {
    pub fn new(n_bins: usize) -> Self {
        Self {
            clock: BoundedSeries::with_capacity(n_bins),
            channels: [
                BoundedSeries::with_capacity(n_bins),
                BoundedSeries::with_capacity(n_bins),
            ],
            full_pairs: BoundedSeries::with_capacity(n_bins),
            center_pairs: BoundedSeries::with_capacity(n_bins),
            raw_coincidences: 0,
            truncated: false,
            blocks: 0,
            overflowed: 0,
        }
    }

    pub fn record_edge(&mut self, edge: &RecoveredEdge) {
        if self.refuse(1) {
            return;
        }
        let ok = self.clock.push((edge.raw, edge.epoch_int));
        self.note_overflow(ok, "clock");
    }

    pub fn record_event(&mut self, event: &PhaseEvent) {
        if self.refuse(1) {
            return;
        }
        let ok = self.channels[event.channel.index()]
            .push((event.phase, event.inter_arrival.unwrap_or(0)));
        self.note_overflow(ok, "phase");
    }

    pub fn record_coincidences(&mut self, found: &Coincidences) {
        let pairs = u64::from(found.full.is_some()) + u64::from(found.center.is_some());
        if self.refuse(pairs) {
            return;
        }
        if let Some(pair) = found.full {
            let ok = self.full_pairs.push(pair);
            self.note_overflow(ok, "full_pairs");
        }
        if let Some(pair) = found.center {
            let ok = self.center_pairs.push(pair);
            self.note_overflow(ok, "center_pairs");
        }
        if found.raw {
            self.raw_coincidences += 1;
        }
    }

    /// Count `entries` as dropped if the block is already cut off.
    fn refuse(&mut self, entries: u64) -> bool {
        if self.truncated {
            self.overflowed += entries;
        }
        self.truncated
    }

    fn note_overflow(&mut self, accepted: bool, series: &str) {
        if accepted {
            return;
        }
        self.overflowed += 1;
        if !self.truncated {
            warn!(
                series,
                capacity = self.clock.capacity(),
                "[Engine] Block buffer full, dropping events until next drain"
            );
        }
        self.truncated = true;
    }

    /// A block is ready once at least one recovered clock edge is stored.
    pub fn has_block(&self) -> bool {
        !self.clock.is_empty()
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Blocks handed out so far.
    pub fn blocks(&self) -> u64 {
        self.blocks
    }

    /// Entries dropped to overflow since construction.
    pub fn overflowed(&self) -> u64 {
        self.overflowed
    }

    pub fn events(&self) -> usize {
        self.channels[0].len() + self.channels[1].len()
    }

    /// Hand out the current block and start a new one.
    pub fn take_snapshot(&mut self, period: f64) -> Snapshot {
        self.blocks += 1;

        let (clock_edges, recovered_edges) = self.clock.take().into_iter().unzip();
        let [ch1, ch2] = &mut self.channels;
        let channel_1 = take_series(ch1);
        let channel_2 = take_series(ch2);

        let snapshot = Snapshot {
            block: self.blocks,
            drained_at: Utc::now(),
            clock_edges,
            recovered_edges,
            channel_1,
            channel_2,
            full_pairs: self.full_pairs.take(),
            center_pairs: self.center_pairs.take(),
            raw_coincidences: std::mem::take(&mut self.raw_coincidences),
            period,
            truncated: std::mem::take(&mut self.truncated),
        };

        debug!(
            block = snapshot.block,
            clock_edges = snapshot.clock_edges.len(),
            ch1 = snapshot.channel_1.len(),
            ch2 = snapshot.channel_2.len(),
            full = snapshot.full_pairs.len(),
            center = snapshot.center_pairs.len(),
            "[Engine] Block drained"
        );
        snapshot
    }

    /// Discard the current block without handing it out.
    pub fn clear(&mut self) {
        self.clock.clear();
        for series in &mut self.channels {
            series.clear();
        }
        self.full_pairs.clear();
        self.center_pairs.clear();
        self.raw_coincidences = 0;
        self.truncated = false;
    }
}

fn take_series(series: &mut BoundedSeries<(f64, i64)>) -> ChannelSeries {
    let (phases, inter_arrival) = series.take().into_iter().unzip();
    ChannelSeries {
        phases,
        inter_arrival,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataChannel;

    fn edge(raw: i64, epoch_int: i64) -> RecoveredEdge {
        RecoveredEdge {
            raw,
            epoch_int,
            epoch_frac: 0.0,
            phase_error: 0.0,
        }
    }

    fn event(channel: DataChannel, phase: f64, inter_arrival: Option<i64>) -> PhaseEvent {
        PhaseEvent {
            channel,
            phase,
            minor_cycle: 0,
            inter_arrival,
        }
    }

    #[test]
    fn test_bounded_series_drops_past_capacity() {
        let mut s = BoundedSeries::with_capacity(2);
        assert!(s.push(1));
        assert!(s.push(2));
        assert!(s.is_full());
        assert!(!s.push(3));
        assert_eq!(s.dropped(), 1);
        assert_eq!(s.take(), vec![1, 2]);
        assert!(s.is_empty());
        assert_eq!(s.dropped(), 0);
        assert!(s.push(4));
    }

    #[test]
    fn test_snapshot_pairs_stay_aligned() {
        let mut acc = BatchAccumulator::new(16);
        acc.record_edge(&edge(1_000, 999));
        acc.record_edge(&edge(2_001, 2_000));
        acc.record_event(&event(DataChannel::One, 12.5, None));
        acc.record_event(&event(DataChannel::One, 13.5, Some(700)));
        acc.record_event(&event(DataChannel::Two, 40.0, Some(1_200)));

        let snap = acc.take_snapshot(1_000.0);
        assert_eq!(snap.block, 1);
        assert_eq!(snap.clock_edges, vec![1_000, 2_001]);
        assert_eq!(snap.recovered_edges, vec![999, 2_000]);
        assert_eq!(snap.clock_residuals(), vec![1, 1]);
        assert_eq!(snap.channel_1.phases, vec![12.5, 13.5]);
        assert_eq!(snap.channel_1.inter_arrival, vec![0, 700]);
        assert_eq!(snap.channel_2.inter_arrival, vec![1_200]);
        assert!(!snap.truncated);
        assert!(!acc.has_block());
    }

    #[test]
    fn test_overflow_flags_block_and_clears_on_drain() {
        let mut acc = BatchAccumulator::new(3);
        for t in 0..5 {
            acc.record_edge(&edge(t, t));
        }
        assert!(acc.is_truncated());
        assert_eq!(acc.overflowed(), 2);
        let snap = acc.take_snapshot(1.0);
        assert_eq!(snap.clock_edges.len(), 3);
        assert!(snap.truncated);

        acc.record_edge(&edge(10, 10));
        let snap = acc.take_snapshot(1.0);
        assert_eq!(snap.block, 2);
        assert_eq!(snap.clock_edges, vec![10]);
        assert!(!snap.truncated);
    }

    #[test]
    fn test_truncation_stops_every_series() {
        let mut acc = BatchAccumulator::new(2);
        let pair = CoincidencePair {
            phase_1: 1.0,
            phase_2: 2.0,
        };
        acc.record_event(&event(DataChannel::One, 5.0, None));
        acc.record_edge(&edge(0, 0));
        acc.record_edge(&edge(10, 10));
        acc.record_edge(&edge(20, 20));
        assert!(acc.is_truncated());

        // Room left in these series, but the block already ended
        acc.record_event(&event(DataChannel::One, 6.0, Some(25)));
        acc.record_event(&event(DataChannel::Two, 6.0, None));
        acc.record_coincidences(&Coincidences {
            full: Some(pair),
            center: Some(pair),
            raw: true,
        });
        assert_eq!(acc.overflowed(), 1 + 2 + 2);

        let snap = acc.take_snapshot(10.0);
        assert_eq!(snap.clock_edges, vec![0, 10]);
        assert_eq!(snap.channel_1.phases, vec![5.0]);
        assert!(snap.channel_2.is_empty());
        assert!(snap.full_pairs.is_empty());
        assert!(snap.center_pairs.is_empty());
        assert_eq!(snap.raw_coincidences, 0);

        acc.record_event(&event(DataChannel::Two, 7.0, None));
        assert_eq!(acc.events(), 1);
    }

    #[test]
    fn test_coincidences_recorded() {
        let mut acc = BatchAccumulator::new(8);
        let pair = CoincidencePair {
            phase_1: 1.0,
            phase_2: 2.0,
        };
        acc.record_coincidences(&Coincidences {
            full: Some(pair),
            center: None,
            raw: true,
        });
        acc.record_coincidences(&Coincidences {
            full: Some(pair),
            center: Some(pair),
            raw: false,
        });
        acc.record_edge(&edge(0, 0));
        let snap = acc.take_snapshot(1.0);
        assert_eq!(snap.full_pairs.len(), 2);
        assert_eq!(snap.center_pairs, vec![pair]);
        assert_eq!(snap.raw_coincidences, 1);
    }

    #[test]
    fn test_clear_discards_block() {
        let mut acc = BatchAccumulator::new(8);
        acc.record_edge(&edge(0, 0));
        acc.record_event(&event(DataChannel::Two, 1.0, None));
        acc.clear();
        assert!(!acc.has_block());
        assert_eq!(acc.events(), 0);
        assert_eq!(acc.blocks(), 0);
    }
}
