use super::Batch;
use crate::{Backend, Error, Metrics, queue::SharedReceiver, retry::with_retries};
use std::sync::Arc;
use tokio::{sync::Semaphore, time::Instant};

/// Batch processor task.
///
/// Takes the next [`Batch`] from the hand-off queue, waits for a permit of
/// the shared concurrency `limiter`, then calls the backend once for the
/// whole batch (unit count = batch length) under the retry policy. The single
/// outcome and elapsed time are fanned out to every job of the batch: each
/// job gets one identical metrics sample and the same response.
///
/// The backend call runs under the deadline of the batch's oldest job.
///
/// The loop ends when the aggregator has stopped and the hand-off queue is
/// drained.
///
/// # Arguments
///
/// - `_processor_id`: Index of this processor, used for logs/tracing.
/// - `batches`: Hand-off queue shared with the other processors.
/// - `limiter`: Caps the number of batches in flight across all processors.
/// - `backend`: The model.
/// - `metrics`: Shared metrics collector.
/// - `retries`: Retry attempts after a failed backend call.
pub async fn process_batches<B: Backend>(
    _processor_id: usize,
    batches: SharedReceiver<Batch>,
    limiter: Arc<Semaphore>,
    backend: Arc<B>,
    metrics: Arc<Metrics>,
    retries: usize,
) {
    #[cfg(feature = "tracing")]
    tracing::trace!("Batch processor {_processor_id} started");

    let backend = backend.as_ref();
    while let Some(batch) = batches.recv().await {
        let Ok(_permit) = limiter.acquire().await else {
            // The limiter is never closed while processors run; fail the
            // batch rather than dropping it.
            batch.fail(&Error::ServiceShutdown);
            break;
        };

        let units = batch.len();
        let deadline = batch.deadline().clone();
        let start = Instant::now();
        let response = with_retries(&deadline, retries, || backend.call(units, &deadline)).await;
        let elapsed = start.elapsed();

        #[cfg(feature = "tracing")]
        {
            if let Err(ref _e) = response {
                tracing::debug!("Batch processor {_processor_id} batch of {units} failed: {_e}");
            }
        }

        batch.complete(response, elapsed, &metrics);
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Batch processor {_processor_id} stopped");
}
