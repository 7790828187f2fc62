//! Tag source abstraction for batch ingestion.
//!
//! Provides a unified trait for reading tag batches from different sources:
//! a seeded synthetic tagger (bench replay / tests) and stdin (JSON lines).

use crate::config::{defaults, ChannelConfig};
use crate::types::Tag;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// Events produced by a tag source.
pub enum BatchEvent {
    /// A time-ordered batch of tags.
    Batch(Vec<Tag>),
    /// Source reached end of data.
    Eof,
}

/// Trait abstracting where tag batches come from.
///
/// The ingestion loop calls [`next_batch`](TagSource::next_batch) in a
/// `select!` with cancellation.
#[async_trait]
pub trait TagSource: Send + 'static {
    /// Read the next batch from the source.
    ///
    /// Returns `BatchEvent::Eof` when no more data is available.
    async fn next_batch(&mut self) -> Result<BatchEvent>;

    /// Human-readable name for logging (e.g. "synthetic", "stdin").
    fn source_name(&self) -> &str;
}

// ============================================================================
// Synthetic Source
// ============================================================================

/// Parameters of the synthetic tagger.
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub channels: ChannelConfig,
    /// Nominal clock period (ps)
    pub period_ps: f64,
    /// Gaussian jitter on each clock edge (ps, 1σ)
    pub clock_jitter_ps: f64,
    pub edges_per_batch: usize,
    /// Stop after this many batches; `None` runs until cancelled
    pub batches: Option<u64>,
    /// Probability that a clock edge is not reported
    pub miss_probability: f64,
    /// Probability of a channel-1 event per clock cycle
    pub event_probability: f64,
    /// Probability that a channel-1 event has a channel-2 partner
    pub pair_probability: f64,
    /// Mean arrival of data events after the clock edge (ps)
    pub event_phase_ps: f64,
    /// Gaussian spread of data events (ps, 1σ)
    pub event_jitter_ps: f64,
    pub seed: u64,
    /// Sleep between batches
    pub delay_ms: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            channels: ChannelConfig::default(),
            period_ps: defaults::SYNTHETIC_PERIOD_PS as f64,
            clock_jitter_ps: 5.0,
            edges_per_batch: defaults::SYNTHETIC_EDGES_PER_BATCH,
            batches: None,
            miss_probability: 0.0,
            event_probability: 0.05,
            pair_probability: 0.5,
            event_phase_ps: 120.0,
            event_jitter_ps: 15.0,
            seed: 0,
            delay_ms: 0,
        }
    }
}

/// Generates a jittered clock with correlated detector events.
pub struct SyntheticSource {
    config: SyntheticConfig,
    rng: StdRng,
    clock_noise: Normal<f64>,
    event_noise: Normal<f64>,
    next_edge: u64,
    emitted: u64,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Result<Self> {
        let clock_noise = Normal::new(0.0, config.clock_jitter_ps)
            .with_context(|| format!("invalid clock jitter {}", config.clock_jitter_ps))?;
        let event_noise = Normal::new(0.0, config.event_jitter_ps)
            .with_context(|| format!("invalid event jitter {}", config.event_jitter_ps))?;
        anyhow::ensure!(
            config.period_ps > 0.0 && config.period_ps.is_finite(),
            "synthetic period must be positive, got {}",
            config.period_ps
        );

        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            clock_noise,
            event_noise,
            // Start a few periods in so jitter never yields negative times
            next_edge: 4,
            emitted: 0,
            config,
        })
    }

    /// Produce one batch synchronously.
    pub fn generate_batch(&mut self) -> Vec<Tag> {
        let c = &self.config;
        let miss = c.miss_probability.clamp(0.0, 1.0);
        let event = c.event_probability.clamp(0.0, 1.0);
        let pair = c.pair_probability.clamp(0.0, 1.0);

        let mut batch = Vec::with_capacity(c.edges_per_batch * 2);
        for _ in 0..c.edges_per_batch {
            let ideal = self.next_edge as f64 * c.period_ps;
            self.next_edge += 1;

            if !self.rng.gen_bool(miss) {
                let t = ideal + self.clock_noise.sample(&mut self.rng);
                batch.push(Tag::new(c.channels.clock, t.round() as i64));
            }

            if self.rng.gen_bool(event) {
                let t1 = ideal + c.event_phase_ps + self.event_noise.sample(&mut self.rng);
                batch.push(Tag::new(c.channels.data_1, t1.round() as i64));
                if self.rng.gen_bool(pair) {
                    let t2 = ideal + c.event_phase_ps + self.event_noise.sample(&mut self.rng);
                    batch.push(Tag::new(c.channels.data_2, t2.round() as i64));
                }
            }
        }

        batch.sort_by_key(|tag| tag.time);
        self.emitted += 1;
        batch
    }
}

#[async_trait]
impl TagSource for SyntheticSource {
    async fn next_batch(&mut self) -> Result<BatchEvent> {
        if self.config.batches.is_some_and(|limit| self.emitted >= limit) {
            return Ok(BatchEvent::Eof);
        }
        // No delay before the first batch
        if self.emitted > 0 && self.config.delay_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(self.config.delay_ms)).await;
        }
        Ok(BatchEvent::Batch(self.generate_batch()))
    }

    fn source_name(&self) -> &str {
        "synthetic"
    }
}

// ============================================================================
// Stdin Source (JSON tag batches, one per line)
// ============================================================================

/// Reads batches from stdin, one JSON array of `[channel, time]` pairs per
/// line.
///
/// `tagger_dump | ./pll-histogram --stdin`
pub struct StdinSource {
    reader: tokio::io::BufReader<tokio::io::Stdin>,
    line_buffer: String,
}

impl StdinSource {
    pub fn new() -> Self {
        Self {
            reader: tokio::io::BufReader::new(tokio::io::stdin()),
            line_buffer: String::with_capacity(64 * 1024),
        }
    }
}

impl Default for StdinSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse one line of `[[channel, time], ...]`.
pub fn parse_batch_line(line: &str) -> Result<Vec<Tag>> {
    let pairs: Vec<(i32, i64)> =
        serde_json::from_str(line).context("expected an array of [channel, time] pairs")?;
    Ok(pairs.into_iter().map(Tag::from).collect())
}

#[async_trait]
impl TagSource for StdinSource {
    async fn next_batch(&mut self) -> Result<BatchEvent> {
        use tokio::io::AsyncBufReadExt;
        loop {
            self.line_buffer.clear();
            let bytes = self.reader.read_line(&mut self.line_buffer).await?;
            if bytes == 0 {
                return Ok(BatchEvent::Eof);
            }
            let line = self.line_buffer.trim();
            if line.is_empty() {
                continue;
            }
            match parse_batch_line(line) {
                Ok(batch) => return Ok(BatchEvent::Batch(batch)),
                Err(e) => {
                    tracing::warn!("[StdinSource] Failed to parse batch: {:#}", e);
                    // Skip malformed lines and keep reading
                }
            }
        }
    }

    fn source_name(&self) -> &str {
        "stdin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_batch_line() {
        let batch = parse_batch_line("[[9, 1000], [-5, 1120]]").expect("valid line");
        assert_eq!(batch, vec![Tag::new(9, 1_000), Tag::new(-5, 1_120)]);
        assert!(parse_batch_line("{\"channel\": 9}").is_err());
    }

    #[test]
    fn test_synthetic_batches_are_time_ordered() {
        let mut source = SyntheticSource::new(SyntheticConfig {
            edges_per_batch: 500,
            event_probability: 0.5,
            seed: 11,
            ..SyntheticConfig::default()
        })
        .expect("source");

        let first = source.generate_batch();
        let second = source.generate_batch();
        assert!(first.windows(2).all(|w| w[0].time <= w[1].time));
        assert!(second.windows(2).all(|w| w[0].time <= w[1].time));
        assert!(first.last().map(|t| t.time) < second.first().map(|t| t.time));

        let clock = first.iter().filter(|t| t.channel == 9).count();
        assert_eq!(clock, 500);
        assert!(first.iter().any(|t| t.channel == -5));
    }

    #[test]
    fn test_synthetic_is_reproducible() {
        let config = SyntheticConfig {
            edges_per_batch: 100,
            seed: 3,
            ..SyntheticConfig::default()
        };
        let a = SyntheticSource::new(config.clone()).expect("source").generate_batch();
        let b = SyntheticSource::new(config).expect("source").generate_batch();
        assert_eq!(a, b);
    }

    #[test]
    fn test_missed_edges() {
        let mut source = SyntheticSource::new(SyntheticConfig {
            edges_per_batch: 1_000,
            miss_probability: 0.2,
            event_probability: 0.0,
            seed: 5,
            ..SyntheticConfig::default()
        })
        .expect("source");
        let clock = source.generate_batch().len();
        assert!(clock < 900 && clock > 700, "clock edges: {clock}");
    }

    #[tokio::test]
    async fn test_batch_limit_reaches_eof() {
        let mut source = SyntheticSource::new(SyntheticConfig {
            edges_per_batch: 10,
            batches: Some(2),
            ..SyntheticConfig::default()
        })
        .expect("source");
        assert!(matches!(source.next_batch().await, Ok(BatchEvent::Batch(_))));
        assert!(matches!(source.next_batch().await, Ok(BatchEvent::Batch(_))));
        assert!(matches!(source.next_batch().await, Ok(BatchEvent::Eof)));
    }
}
