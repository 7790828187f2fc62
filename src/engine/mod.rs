//! Acquisition Engine - ingest/drain hand-off
//!
//! ```text
//! producer (tagger callback)            consumer (analysis / plots)
//!   process(&[Tag]) ──► EngineCore ──► BatchAccumulator ──► drain(timeout)
//!                          │                                   │
//!                   ArcSwap<TimeWalkTable>             Condvar wakes on
//!                   (read once per batch)              first clock edge
//! ```
//!
//! A single mutex guards all processing state. One `process` call is one
//! atomic unit: a drain never observes a partially processed batch. The
//! time-walk table lives outside the mutex so it can be replaced while a
//! batch is running; the new table applies from the next batch on.

mod ingest;

use arc_swap::ArcSwap;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

use self::ingest::EngineCore;
use crate::calibration::{TimeWalkError, TimeWalkTable};
use crate::config::{ConfigError, EngineConfig};
use crate::pll::LoopError;
use crate::types::{Snapshot, Tag};

pub use self::ingest::{BatchReport, EngineStats};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine stopped")]
    Stopped,

    #[error("batch aborted at tag {index}: {source}")]
    LoopUnstable {
        index: usize,
        #[source]
        source: LoopError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    TimeWalk(#[from] TimeWalkError),
}

// ============================================================================
// Engine Handle
// ============================================================================

struct Shared {
    config: EngineConfig,
    core: Mutex<EngineCore>,
    block_ready: Condvar,
    time_walk: ArcSwap<TimeWalkTable>,
    stopped: AtomicBool,
}

/// Cloneable handle to one acquisition engine.
///
/// Clones share state: hand one to the ingestion task and one to the
/// drain task.
#[derive(Clone)]
pub struct HistogramEngine {
    shared: Arc<Shared>,
}

impl HistogramEngine {
    /// Validate the configuration and allocate every block buffer.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;

        info!(
            clock = config.channels.clock,
            data_1 = config.channels.data_1,
            data_2 = config.channels.data_2,
            mult = config.phase.mult,
            n_bins = config.buffers.n_bins,
            "[Engine] Initialised"
        );

        let shared = Shared {
            core: Mutex::new(EngineCore::new(&config)),
            block_ready: Condvar::new(),
            time_walk: ArcSwap::from_pointee(TimeWalkTable::zero(config.time_walk.step_ps)),
            stopped: AtomicBool::new(false),
            config,
        };
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Process one batch of time-ordered tags.
    ///
    /// Data tags seen before the loop has locked are dropped. If the loop
    /// diverges the remainder of the batch is discarded, the loop restarts
    /// its bootstrap and [`EngineError::LoopUnstable`] is returned.
    pub fn process(&self, batch: &[Tag]) -> Result<BatchReport, EngineError> {
        if self.is_stopped() {
            return Err(EngineError::Stopped);
        }

        let table = self.shared.time_walk.load_full();
        let mut core = self.shared.core.lock();
        // stop() may have won the lock while we waited
        if self.is_stopped() {
            return Err(EngineError::Stopped);
        }

        let result = core.ingest(batch, &table);
        let ready = core.has_block();
        drop(core);

        if ready {
            self.shared.block_ready.notify_all();
        }
        result
    }

    /// Wait up to `timeout` for a block and hand it out.
    ///
    /// Returns `None` when no clock edge arrived since the previous drain,
    /// or when the processing lock could not be taken in time.
    pub fn drain(&self, timeout: Duration) -> Option<Snapshot> {
        let deadline = Instant::now() + timeout;
        let Some(mut core) = self.shared.core.try_lock_until(deadline) else {
            debug!("[Engine] Drain timed out waiting for processing lock");
            return None;
        };

        while !core.has_block() {
            if self.is_stopped() {
                return None;
            }
            if self
                .shared
                .block_ready
                .wait_until(&mut core, deadline)
                .timed_out()
            {
                if core.has_block() {
                    break;
                }
                return None;
            }
        }

        Some(core.take_snapshot())
    }

    /// Hand out the current block without waiting.
    pub fn try_drain(&self) -> Option<Snapshot> {
        let mut core = self.shared.core.try_lock()?;
        core.has_block().then(|| core.take_snapshot())
    }

    /// Install a time-walk table; applies from the next batch on.
    pub fn load_time_walk(
        &self,
        step: i64,
        offsets_1: Vec<f64>,
        offsets_2: Vec<f64>,
    ) -> Result<(), EngineError> {
        let table = TimeWalkTable::new(step, offsets_1, offsets_2, self.shared.config.time_walk.max_len)?;
        self.set_time_walk(table);
        Ok(())
    }

    /// Install an already-built table.
    pub fn set_time_walk(&self, table: TimeWalkTable) {
        info!(
            step_ps = table.step(),
            entries = table.len(),
            "[Engine] Time-walk table loaded"
        );
        self.shared.time_walk.store(Arc::new(table));
    }

    /// Zero every offset, keeping the table shape.
    pub fn clear_time_walk(&self) {
        let cleared = self.shared.time_walk.load().cleared();
        self.shared.time_walk.store(Arc::new(cleared));
        info!("[Engine] Time-walk table cleared");
    }

    /// The table the next batch will use.
    pub fn time_walk(&self) -> Arc<TimeWalkTable> {
        self.shared.time_walk.load_full()
    }

    /// Drop lock, pending coincidences and the current block.
    pub fn clear(&self) {
        self.shared.core.lock().clear();
        info!("[Engine] State cleared, re-bootstrapping");
    }

    /// Refuse further batches and wake any waiting drain.
    ///
    /// Waits for an in-flight batch to finish. A block already accumulated
    /// can still be drained afterwards.
    pub fn stop(&self) {
        let core = self.shared.core.lock();
        self.shared.stopped.store(true, Ordering::SeqCst);
        drop(core);
        self.shared.block_ready.notify_all();
        info!("[Engine] Stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> EngineStats {
        self.shared.core.lock().stats()
    }

    /// Current period estimate (ps), `None` until locked.
    pub fn period(&self) -> Option<f64> {
        self.shared.core.lock().period()
    }

    pub fn is_locked(&self) -> bool {
        self.shared.core.lock().is_locked()
    }
}

impl std::fmt::Debug for HistogramEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistogramEngine")
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BufferConfig, LoopFilterConfig};
    use std::thread;

    const PERIOD: i64 = 1_000_000;

    fn config(bootstrap_edges: usize) -> EngineConfig {
        EngineConfig {
            loop_filter: LoopFilterConfig {
                bootstrap_edges,
                ..LoopFilterConfig::default()
            },
            buffers: BufferConfig {
                n_bins: 10_000,
                ..BufferConfig::default()
            },
            ..EngineConfig::default()
        }
    }

    fn clock_batch(clock: i32, start: i64, edges: i64) -> Vec<Tag> {
        (0..edges)
            .map(|k| Tag::new(clock, start + k * PERIOD))
            .collect()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut cfg = config(10);
        cfg.phase.mult = 0;
        assert!(matches!(
            HistogramEngine::new(cfg),
            Err(EngineError::Config(ConfigError::Validation(_)))
        ));
    }

    #[test]
    fn test_data_dropped_until_locked() {
        let cfg = config(5);
        let ch = cfg.channels;
        let engine = HistogramEngine::new(cfg).expect("engine");

        let mut batch = clock_batch(ch.clock, PERIOD, 4);
        batch.push(Tag::new(ch.data_1, 4 * PERIOD + 10));
        let report = engine.process(&batch).expect("batch");
        assert_eq!(report.dropped_unlocked, 1);
        assert!(!engine.is_locked());
        assert!(engine.try_drain().is_none());

        let report = engine
            .process(&[Tag::new(ch.clock, 5 * PERIOD), Tag::new(ch.data_1, 5 * PERIOD + 10)])
            .expect("batch");
        assert_eq!(report.data_events, 1);
        assert!(engine.is_locked());

        let snap = engine.try_drain().expect("block");
        assert_eq!(snap.clock_edges.len(), 5);
        assert_eq!(snap.channel_1.len(), 1);
        assert_eq!(snap.period, PERIOD as f64);
    }

    #[test]
    fn test_second_drain_without_data_is_empty() {
        let cfg = config(3);
        let clock = cfg.channels.clock;
        let engine = HistogramEngine::new(cfg).expect("engine");
        engine.process(&clock_batch(clock, PERIOD, 10)).expect("batch");

        assert!(engine.drain(Duration::from_millis(50)).is_some());
        assert!(engine.drain(Duration::from_millis(50)).is_none());
        assert_eq!(engine.stats().blocks_drained, 1);
    }

    #[test]
    fn test_drain_wakes_on_new_block() {
        let cfg = config(3);
        let clock = cfg.channels.clock;
        let engine = HistogramEngine::new(cfg).expect("engine");

        let consumer = engine.clone();
        let handle = thread::spawn(move || consumer.drain(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        engine.process(&clock_batch(clock, PERIOD, 4)).expect("batch");

        let snap = handle.join().expect("drain thread");
        assert_eq!(snap.map(|s| s.clock_edges.len()), Some(4));
    }

    #[test]
    fn test_drain_gives_up_on_held_lock() {
        let cfg = config(3);
        let clock = cfg.channels.clock;
        let engine = HistogramEngine::new(cfg).expect("engine");
        engine.process(&clock_batch(clock, PERIOD, 4)).expect("batch");

        // A block is waiting, but ingestion never lets go of the lock
        let held = engine.shared.core.lock();
        let consumer = engine.clone();
        let handle = thread::spawn(move || {
            let started = Instant::now();
            let drained = consumer.drain(Duration::from_millis(20));
            (drained.is_none(), started.elapsed())
        });
        let (empty, waited) = handle.join().expect("drain thread");
        drop(held);

        assert!(empty);
        assert!(waited >= Duration::from_millis(20));
        assert!(waited < Duration::from_secs(2), "waited {waited:?}");

        // The block survives the missed drain
        assert_eq!(engine.try_drain().map(|s| s.clock_edges.len()), Some(4));
    }

    #[test]
    fn test_stop_rejects_batches_and_releases_drain() {
        let cfg = config(3);
        let clock = cfg.channels.clock;
        let engine = HistogramEngine::new(cfg).expect("engine");

        let consumer = engine.clone();
        let handle = thread::spawn(move || consumer.drain(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        engine.stop();
        assert!(handle.join().expect("drain thread").is_none());
        assert!(matches!(
            engine.process(&clock_batch(clock, PERIOD, 3)),
            Err(EngineError::Stopped)
        ));
    }

    #[test]
    fn test_time_walk_table_swap() {
        let engine = HistogramEngine::new(config(3)).expect("engine");
        assert!(engine.time_walk().is_empty());

        engine
            .load_time_walk(500, vec![3.0, 2.0], vec![1.0, 0.0])
            .expect("table");
        assert_eq!(engine.time_walk().len(), 2);

        assert!(matches!(
            engine.load_time_walk(500, vec![1.0], vec![]),
            Err(EngineError::TimeWalk(TimeWalkError::LengthMismatch(1, 0)))
        ));

        engine.clear_time_walk();
        let table = engine.time_walk();
        assert_eq!(table.len(), 2);
        assert!(table.is_zero());
    }

    #[test]
    fn test_clear_drops_lock() {
        let cfg = config(3);
        let clock = cfg.channels.clock;
        let engine = HistogramEngine::new(cfg).expect("engine");
        engine.process(&clock_batch(clock, PERIOD, 5)).expect("batch");
        assert!(engine.is_locked());
        engine.clear();
        assert!(!engine.is_locked());
        assert!(engine.try_drain().is_none());
    }
}
