use crate::{Backend, Job, Metrics, queue::SharedReceiver, retry::with_retries};
use std::sync::Arc;
use tokio::time::Instant;

/// Worker task of the [`WorkerPool`](super::WorkerPool).
///
/// Pulls one [`Job`] at a time from the shared admission queue, runs the
/// backend for that job alone (unit count 1) under the retry policy, records
/// the outcome and delivers the response. The loop ends when the admission
/// queue is closed and drained.
///
/// A failing job never ends the loop: every outcome, including the job's own
/// deadline, is delivered to its caller and the worker moves on.
///
/// # Arguments
///
/// - `_worker_id`: Index of this worker, used for logs/tracing.
/// - `queue`: Admission queue shared with the other workers.
/// - `backend`: The model.
/// - `metrics`: Shared metrics collector.
/// - `retries`: Retry attempts after a failed backend call.
pub async fn worker_loop<B: Backend>(
    _worker_id: usize,
    queue: SharedReceiver<Job>,
    backend: Arc<B>,
    metrics: Arc<Metrics>,
    retries: usize,
) {
    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {_worker_id} started");

    let backend = backend.as_ref();
    while let Some(job) = queue.recv().await {
        let deadline = job.deadline();
        let start = Instant::now();
        let response = with_retries(deadline, retries, || backend.call(1, deadline)).await;
        metrics.record(start.elapsed(), response.as_ref().err());

        #[cfg(feature = "tracing")]
        {
            if let Err(ref _e) = response {
                tracing::debug!("Worker {_worker_id} job failed: {_e}");
            }
        }

        job.complete(response);
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {_worker_id} stopped");
}
