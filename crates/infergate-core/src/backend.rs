//! The backend compute step ("the model") and a simulated implementation.
//!
//! The dispatch core treats inference as an opaque, possibly-failing,
//! latency-bearing call. [`Backend`] is that seam: the worker pool calls it
//! with a unit count of 1, the batching strategy with the size of the batch.
//!
//! [`SimulatedModel`] stands in for a real model server. It sleeps for a
//! mostly fixed per-call cost, so batching amortizes that cost across every
//! job in the batch.

use crate::{Deadline, Error, Result};
use bytes::Bytes;
use core::ops::RangeInclusive;
use core::time::Duration;
use rand::Rng;

/// An inference backend.
///
/// Implementations must honor the deadline: once it is done, the call should
/// return promptly (typically with [`Deadline::error`]) rather than run to
/// completion.
pub trait Backend: Send + Sync + 'static {
    /// Runs the model over `units` jobs at once and returns the shared result
    /// payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BackendFailure`] on a model failure, or the deadline's
    /// error if it is done before the call completes.
    fn call(&self, units: usize, deadline: &Deadline) -> impl Future<Output = Result<Bytes>> + Send;
}

/// Default range of the simulated core model latency, in milliseconds.
pub const DEFAULT_LATENCY_MS: RangeInclusive<u64> = 70..=100;

/// Range of the simulated per-call overhead, in milliseconds. Paid once per
/// call, not once per unit.
pub const CALL_OVERHEAD_MS: RangeInclusive<u64> = 3..=5;

/// Default probability that a simulated call fails.
pub const DEFAULT_FAILURE_RATE: f64 = 0.02;

/// A backend that simulates model latency and transient upstream failures.
///
/// On success the payload is a JSON object:
///
/// ```json
/// {"ok": true, "batch_processed": 8, "latency_ms": 84}
/// ```
#[derive(Debug, Clone)]
pub struct SimulatedModel {
    latency_ms: RangeInclusive<u64>,
    failure_rate: f64,
}

impl Default for SimulatedModel {
    fn default() -> Self {
        Self {
            latency_ms: DEFAULT_LATENCY_MS,
            failure_rate: DEFAULT_FAILURE_RATE,
        }
    }
}

impl SimulatedModel {
    /// Creates a simulated model with the given core latency range and failure
    /// probability.
    ///
    /// An inverted range is reordered and the failure rate is clamped to
    /// `[0, 1]`.
    pub fn new(latency_ms: RangeInclusive<u64>, failure_rate: f64) -> Self {
        let (lo, hi) = (*latency_ms.start(), *latency_ms.end());
        Self {
            latency_ms: lo.min(hi)..=lo.max(hi),
            failure_rate: if failure_rate.is_nan() {
                0.0
            } else {
                failure_rate.clamp(0.0, 1.0)
            },
        }
    }

    /// Draws the latency of one call and whether it fails.
    ///
    /// Kept synchronous so the thread-local RNG never lives across an await.
    fn draw(&self) -> (u64, bool) {
        let mut rng = rand::rng();
        let core_ms = rng.random_range(self.latency_ms.clone());
        let overhead_ms = rng.random_range(CALL_OVERHEAD_MS);
        (core_ms + overhead_ms, rng.random_bool(self.failure_rate))
    }
}

impl Backend for SimulatedModel {
    async fn call(&self, units: usize, deadline: &Deadline) -> Result<Bytes> {
        let (latency_ms, fails) = self.draw();

        tokio::select! {
            biased;
            () = deadline.done() => return Err(deadline.error()),
            () = tokio::time::sleep(Duration::from_millis(latency_ms)) => {}
        }

        if fails {
            return Err(Error::backend("upstream_error"));
        }

        let body = serde_json::json!({
            "ok": true,
            "batch_processed": units,
            "latency_ms": latency_ms,
        });
        serde_json::to_vec(&body)
            .map(Bytes::from)
            .map_err(|e| Error::backend(format!("failed to encode response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    #[tokio::test(start_paused = true)]
    async fn reports_batch_size_and_latency() {
        let model = SimulatedModel::new(70..=100, 0.0);
        let deadline = Deadline::new(&CancellationToken::new(), Duration::from_secs(1));

        let body = model.call(8, &deadline).await.expect("model call");
        let value: serde_json::Value = serde_json::from_slice(&body).expect("json body");

        assert_eq!(value["ok"], true);
        assert_eq!(value["batch_processed"], 8);
        let latency = value["latency_ms"].as_u64().expect("latency");
        assert!((73..=105).contains(&latency), "latency {latency}");
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_model_reports_upstream_error() {
        let model = SimulatedModel::new(1..=1, 1.0);
        let deadline = Deadline::new(&CancellationToken::new(), Duration::from_secs(1));

        let err = model.call(1, &deadline).await.expect_err("must fail");
        assert_eq!(err, Error::backend("upstream_error"));
    }

    #[tokio::test(start_paused = true)]
    async fn aborts_when_the_deadline_elapses() {
        let model = SimulatedModel::new(500..=500, 0.0);
        let deadline = Deadline::new(&CancellationToken::new(), Duration::from_millis(20));
        let start = tokio::time::Instant::now();

        let err = model.call(1, &deadline).await.expect_err("must time out");

        assert_eq!(err, Error::DeadlineExceeded);
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn normalizes_arguments() {
        let model = SimulatedModel::new(100..=70, 7.0);
        assert_eq!(model.latency_ms, 70..=100);
        assert_eq!(model.failure_rate, 1.0);
    }
}
