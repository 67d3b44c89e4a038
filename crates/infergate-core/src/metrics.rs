//! Latency and error accounting for backend calls.
//!
//! [`Metrics`] accumulates one latency sample per completed job, plus a
//! failure count, and turns them into point-in-time [`MetricsSnapshot`]s with
//! p50/p95/p99 latencies and throughput since the last reset.
//!
//! All state lives behind a single mutex, so `record`, `snapshot` and `reset`
//! are serialized against each other: a snapshot never observes a partially
//! applied record or reset, and no record is lost to a concurrent reset.
//!
//! The collector is an owned object, not a global. The dispatcher and every
//! strategy share it through an `Arc`.

use crate::Error;
use core::time::Duration;
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use tokio::time::Instant;

#[derive(Debug)]
struct Samples {
    latencies: Vec<Duration>,
    errors: usize,
    start: Instant,
}

impl Samples {
    fn new() -> Self {
        Self {
            latencies: Vec::new(),
            errors: 0,
            start: Instant::now(),
        }
    }
}

/// Thread-safe accumulator of per-job latency samples and failures.
#[derive(Debug)]
pub struct Metrics {
    inner: Mutex<Samples>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Creates an empty collector whose throughput clock starts now.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Samples::new()),
        }
    }

    /// Records one sample. A present `error` also counts as a failure.
    pub fn record(&self, latency: Duration, error: Option<&Error>) {
        self.record_batch(latency, error, 1);
    }

    /// Records `jobs` identical samples under a single lock acquisition.
    ///
    /// Used for batch fan-out, where every job of the batch shares the
    /// batch's latency and outcome.
    pub fn record_batch(&self, latency: Duration, error: Option<&Error>, jobs: usize) {
        let mut inner = self.inner.lock();
        inner.latencies.extend(core::iter::repeat_n(latency, jobs));
        if error.is_some() {
            inner.errors += jobs;
        }
    }

    /// Takes a consistent snapshot of the current samples.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock();

        if inner.latencies.is_empty() {
            return MetricsSnapshot::default();
        }

        let mut sorted = inner.latencies.clone();
        sorted.sort_unstable();

        let secs = inner.start.elapsed().as_secs_f64();
        let qps = if secs > 0.0 {
            sorted.len() as f64 / secs
        } else {
            0.0
        };

        MetricsSnapshot {
            samples: sorted.len(),
            qps,
            p50: percentile(&sorted, 0.50),
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
            errors: inner.errors,
        }
    }

    /// Clears all samples and failures and restarts the throughput clock.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        *inner = Samples::new();
    }

    #[cfg(test)]
    pub(crate) fn latencies(&self) -> Vec<Duration> {
        self.inner.lock().latencies.clone()
    }
}

/// Returns the sample at index `floor((n - 1) * q)`, clamped to the slice.
///
/// `sorted` must be sorted ascending and non-empty.
fn percentile(sorted: &[Duration], q: f64) -> Duration {
    let last = sorted.len().saturating_sub(1);
    // Truncation is the floor here: the product is never negative.
    let idx = ((last as f64) * q) as usize;
    sorted.get(idx.min(last)).copied().unwrap_or_default()
}

/// A point-in-time view of [`Metrics`].
///
/// Serialized as `{samples, qps, p50, p95, p99, errors}` with latencies as
/// integer nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub samples: usize,
    pub qps: f64,
    #[serde(serialize_with = "as_nanos")]
    pub p50: Duration,
    #[serde(serialize_with = "as_nanos")]
    pub p95: Duration,
    #[serde(serialize_with = "as_nanos")]
    pub p99: Duration,
    pub errors: usize,
}

fn as_nanos<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn empty_snapshot_is_zeroed() {
        let metrics = Metrics::new();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[tokio::test(start_paused = true)]
    async fn percentiles_follow_the_clamped_index() {
        let metrics = Metrics::new();
        // Record out of order: the snapshot sorts its copy.
        for v in [30, 100, 10, 80, 50, 20, 90, 40, 70, 60] {
            metrics.record(ms(v), None);
        }
        tokio::time::advance(Duration::from_secs(2)).await;

        let snap = metrics.snapshot();
        assert_eq!(snap.samples, 10);
        assert_eq!(snap.errors, 0);
        // floor(9 * 0.50) = 4, floor(9 * 0.95) = 8, floor(9 * 0.99) = 8
        assert_eq!(snap.p50, ms(50));
        assert_eq!(snap.p95, ms(90));
        assert_eq!(snap.p99, ms(90));
        assert!((snap.qps - 5.0).abs() < 1e-9, "qps {}", snap.qps);
    }

    #[test]
    fn percentiles_over_a_hundred_samples() {
        let metrics = Metrics::new();
        for v in 1..=100 {
            metrics.record(ms(v), None);
        }

        let snap = metrics.snapshot();
        assert_eq!(snap.p50, ms(50));
        assert_eq!(snap.p95, ms(95));
        assert_eq!(snap.p99, ms(99));
    }

    #[test]
    fn single_sample_fills_every_percentile() {
        let metrics = Metrics::new();
        metrics.record(ms(7), Some(&Error::backend("upstream_error")));

        let snap = metrics.snapshot();
        assert_eq!(snap.samples, 1);
        assert_eq!(snap.errors, 1);
        assert_eq!((snap.p50, snap.p95, snap.p99), (ms(7), ms(7), ms(7)));
    }

    #[test]
    fn reset_then_snapshot_is_zeroed() {
        let metrics = Metrics::new();
        metrics.record(ms(5), None);
        metrics.record(ms(6), Some(&Error::DeadlineExceeded));

        metrics.reset();

        let snap = metrics.snapshot();
        assert_eq!(snap.samples, 0);
        assert_eq!(snap.qps, 0.0);
        assert_eq!(snap.errors, 0);
    }

    #[test]
    fn batch_records_one_sample_per_job() {
        let metrics = Metrics::new();
        metrics.record_batch(ms(12), Some(&Error::backend("upstream_error")), 4);

        assert_eq!(metrics.latencies(), vec![ms(12); 4]);
        assert_eq!(metrics.snapshot().errors, 4);
    }

    #[test]
    fn concurrent_records_are_not_lost() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 1_000;

        let metrics = Arc::new(Metrics::new());
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        let err = (i % 10 == t % 10).then_some(Error::backend("upstream_error"));
                        metrics.record(ms(i as u64), err.as_ref());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("recorder thread panicked");
        }

        let snap = metrics.snapshot();
        assert_eq!(snap.samples, THREADS * PER_THREAD);
        assert_eq!(snap.errors, THREADS * PER_THREAD / 10);
    }

    #[test]
    fn snapshot_serializes_durations_as_nanos() {
        let snap = MetricsSnapshot {
            samples: 3,
            qps: 1.5,
            p50: ms(1),
            p95: ms(2),
            p99: ms(3),
            errors: 1,
        };

        let json = serde_json::to_value(snap).expect("serialize snapshot");
        assert_eq!(
            json,
            serde_json::json!({
                "samples": 3,
                "qps": 1.5,
                "p50": 1_000_000,
                "p95": 2_000_000,
                "p99": 3_000_000,
                "errors": 1,
            })
        );
    }
}
