//! Bitrate sampling from cumulative sender counters

use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Polling cadence of a live call
pub const SAMPLING_INTERVAL: Duration = Duration::from_secs(1);

/// One outbound sender report at a point in time
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSample {
    /// Sender-report identifier
    pub id: String,
    /// Milliseconds on a clock that is monotonic per source
    pub timestamp_ms: f64,
    pub bytes_sent: u64,
    pub header_bytes_sent: u64,
}

/// Bitrate computed from two consecutive samples of one sender
#[derive(Debug, Clone, PartialEq)]
pub struct BitrateReading {
    pub id: String,
    pub bitrate_bps: u64,
    pub header_rate_bps: u64,
    /// Counters went backwards; the values above are zero
    pub counter_reset: bool,
}

/// Something that can report outbound sender statistics
#[async_trait]
pub trait StatsSource: Send + Sync {
    /// Current outbound samples; empty when there are no senders
    async fn outbound_stats(&self) -> Result<Vec<StatsSample>>;
}

/// `8 * delta_bytes / elapsed_seconds`, with counter resets reported as zero
pub fn compute_bitrate(prev: &StatsSample, now: &StatsSample) -> Result<BitrateReading> {
    let elapsed_ms = now.timestamp_ms - prev.timestamp_ms;
    if elapsed_ms <= 0.0 || !elapsed_ms.is_finite() {
        return Err(Error::NoPreviousSampleError(format!(
            "no elapsed time since previous sample for {}",
            now.id
        )));
    }

    if now.bytes_sent < prev.bytes_sent || now.header_bytes_sent < prev.header_bytes_sent {
        return Ok(BitrateReading {
            id: now.id.clone(),
            bitrate_bps: 0,
            header_rate_bps: 0,
            counter_reset: true,
        });
    }

    let elapsed_secs = elapsed_ms / 1000.0;
    let rate = |delta: u64| (8.0 * delta as f64 / elapsed_secs).floor() as u64;

    Ok(BitrateReading {
        id: now.id.clone(),
        bitrate_bps: rate(now.bytes_sent - prev.bytes_sent),
        header_rate_bps: rate(now.header_bytes_sent - prev.header_bytes_sent),
        counter_reset: false,
    })
}

/// Keeps the previous sample per sender id, one step of history only
#[derive(Debug, Default)]
pub struct BitrateTracker {
    previous: HashMap<String, StatsSample>,
}

impl BitrateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one tick worth of samples and get the readings it produces.
    ///
    /// The retained history is replaced wholesale by `samples`, so senders
    /// that disappear are forgotten. Samples with no usable predecessor are
    /// skipped and only logged.
    pub fn update(&mut self, samples: Vec<StatsSample>) -> Vec<BitrateReading> {
        let mut readings = Vec::new();
        let mut next = HashMap::with_capacity(samples.len());

        for sample in samples {
            match self.previous.get(&sample.id) {
                Some(prev) => match compute_bitrate(prev, &sample) {
                    Ok(reading) => {
                        if reading.counter_reset {
                            warn!(id = %reading.id, "Sender counters went backwards, resetting baseline");
                        }
                        readings.push(reading);
                    }
                    Err(e) => debug!("Skipping bitrate tick: {}", e),
                },
                None => trace!(id = %sample.id, "First sample for sender"),
            }
            next.insert(sample.id.clone(), sample);
        }

        self.previous = next;
        readings
    }

    pub fn tracked_senders(&self) -> usize {
        self.previous.len()
    }
}

/// Handle to a running sampler task
pub struct StatsSampler {
    task: JoinHandle<()>,
}

impl StatsSampler {
    /// Poll `source` every `interval` until `closed` turns true or its
    /// sender is dropped. Readings are logged and forwarded to `sink` when
    /// one is given.
    pub fn spawn<S>(
        source: Arc<S>,
        interval: Duration,
        mut closed: watch::Receiver<bool>,
        sink: Option<mpsc::UnboundedSender<BitrateReading>>,
    ) -> Self
    where
        S: StatsSource + ?Sized + 'static,
    {
        let task = tokio::spawn(async move {
            let mut tracker = BitrateTracker::new();
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = closed.changed() => {
                        if changed.is_err() || *closed.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                // Liveness is re-checked before every poll
                if *closed.borrow() {
                    break;
                }

                let samples = match source.outbound_stats().await {
                    Ok(samples) => samples,
                    Err(e) => {
                        warn!("Failed to poll sender stats: {}", e);
                        continue;
                    }
                };

                if samples.is_empty() {
                    trace!("No outbound senders to sample");
                }

                for reading in tracker.update(samples) {
                    info!(
                        id = %reading.id,
                        bitrate_bps = reading.bitrate_bps,
                        header_rate_bps = reading.header_rate_bps,
                        "Outbound bitrate"
                    );
                    if let Some(sink) = &sink {
                        let _ = sink.send(reading);
                    }
                }
            }

            debug!("Stats sampler stopped");
        });

        Self { task }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop polling immediately
    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Drop for StatsSampler {
    fn drop(&mut self) {
        self.task.abort();
    }
}
