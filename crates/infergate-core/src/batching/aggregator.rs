use super::Batch;
use crate::{Error, Job};
use core::time::Duration;
use tokio::{
    sync::mpsc,
    time::{Instant, MissedTickBehavior, interval_at},
};

/// Groups admitted jobs into batches.
///
/// The aggregator is the sole owner of its working buffer. It waits on
/// whichever comes first: a new job on the admission queue or a tick of the
/// flush timer.
///
/// - A job is appended to the buffer; a buffer that reaches `max_batch_size`
///   is flushed at once.
/// - A tick flushes whatever the buffer holds (nothing, if it is empty).
/// - When the admission queue closes, the partial buffer is flushed one last
///   time and the aggregator stops, closing the hand-off queue behind it.
///
/// Flushing moves the buffer into a [`Batch`] and starts a fresh one, so the
/// next batch is built while the previous one is processed. Pushing onto a
/// full hand-off queue suspends the aggregator; the admission path is never
/// blocked by it.
///
/// # Arguments
///
/// - `admission`: The admission queue. The aggregator is its only consumer.
/// - `batches`: Hand-off queue to the batch processors.
/// - `max_batch_size`: Largest batch handed off (at least 1).
/// - `flush_interval`: Flush timer period (non-zero).
pub async fn aggregate(
    mut admission: mpsc::Receiver<Job>,
    batches: mpsc::Sender<Batch>,
    max_batch_size: usize,
    flush_interval: Duration,
) {
    #[cfg(feature = "tracing")]
    tracing::trace!("Aggregator started");

    let mut buf: Vec<Job> = Vec::with_capacity(max_batch_size);
    // The first tick fires one full period from now rather than immediately.
    let mut ticker = interval_at(Instant::now() + flush_interval, flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe_job = admission.recv() => match maybe_job {
                Some(job) => {
                    buf.push(job);
                    if buf.len() >= max_batch_size {
                        flush(&mut buf, &batches, max_batch_size).await;
                    }
                }
                None => {
                    flush(&mut buf, &batches, max_batch_size).await;
                    break;
                }
            },
            _ = ticker.tick() => flush(&mut buf, &batches, max_batch_size).await,
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Aggregator stopped");
}

/// Hands the buffered jobs off as one batch, leaving a fresh buffer behind.
///
/// If the processors are gone the batch's jobs are completed with
/// [`Error::ServiceShutdown`] so their callers do not wait for the deadline.
async fn flush(buf: &mut Vec<Job>, batches: &mpsc::Sender<Batch>, max_batch_size: usize) {
    if buf.is_empty() {
        return;
    }
    let Some(batch) = Batch::new(core::mem::replace(buf, Vec::with_capacity(max_batch_size)))
    else {
        return;
    };

    #[cfg(feature = "tracing")]
    tracing::trace!("Flushing batch of {} jobs", batch.len());

    if let Err(mpsc::error::SendError(batch)) = batches.send(batch).await {
        #[cfg(feature = "tracing")]
        tracing::warn!("Batch processors are gone, failing {} jobs", batch.len());
        batch.fail(&Error::ServiceShutdown);
    }
}
