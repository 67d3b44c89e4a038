//! Dynamic micro-batching.
//!
//! [`Batcher`] runs two cooperating roles connected by a bounded hand-off
//! queue of [`Batch`]es:
//!
//! - [`aggregate`]: a single task that groups admitted jobs into batches,
//!   flushing on size or on a timer.
//! - [`process_batches`]: a pool of processors, each calling the backend
//!   once per batch and fanning the outcome out to every job in it. A shared
//!   semaphore bounds how many batches are in flight at once.
//!
//! Jobs keep their arrival order inside a batch. Batches may complete out of
//! order when several processors run with skewed backend latencies.
//!
//! ## Fate sharing
//!
//! Every job of a batch receives the same latency sample and the same
//! outcome: one backend failure fails the whole batch.

mod aggregator;
mod processor;

use crate::{
    Backend, Deadline, DispatchConfig, Error, Job, Metrics, Result, queue::SharedReceiver,
};
pub use aggregator::aggregate;
use bytes::Bytes;
use core::time::Duration;
pub use processor::process_batches;
use std::sync::Arc;
use tokio::{
    sync::{Semaphore, mpsc},
    task::{AbortHandle, JoinHandle},
};

/// A non-empty group of jobs sent to the backend as one unit.
///
/// Produced by the aggregator and owned by exactly one processor after the
/// hand-off.
#[derive(Debug)]
pub struct Batch {
    jobs: Vec<Job>,
}

impl Batch {
    /// Wraps `jobs` in a batch, or returns `None` if there are none.
    pub fn new(jobs: Vec<Job>) -> Option<Self> {
        (!jobs.is_empty()).then_some(Self { jobs })
    }

    /// Number of jobs in the batch.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Always `false`: batches are never empty.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// The deadline of the oldest job, which governs the batch's backend call.
    pub fn deadline(&self) -> &Deadline {
        // `Batch::new` rejects empty job lists.
        self.jobs[0].deadline()
    }

    /// Records one identical sample per job and delivers the same response to
    /// each of them.
    pub fn complete(self, response: Result<Bytes>, elapsed: Duration, metrics: &Metrics) {
        metrics.record_batch(elapsed, response.as_ref().err(), self.jobs.len());
        for job in self.jobs {
            job.complete(response.clone());
        }
    }

    /// Completes every job with `err` without touching the metrics.
    pub fn fail(self, err: &Error) {
        for job in self.jobs {
            job.complete(Err(err.clone()));
        }
    }
}

/// The aggregator task plus its pool of batch processors.
#[derive(Debug)]
pub struct Batcher {
    aggregator: JoinHandle<()>,
    processors: Vec<JoinHandle<()>>,
}

impl Batcher {
    /// Spawns the aggregator and `config.concurrency()` batch processors on
    /// the current Tokio runtime.
    ///
    /// The aggregator is the only consumer of `admission`. Everything stops
    /// once every sender of `admission` is dropped and the final partial batch
    /// has been processed.
    pub fn spawn<B: Backend>(
        config: &DispatchConfig,
        admission: mpsc::Receiver<Job>,
        backend: Arc<B>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let concurrency = config.concurrency();
        let (batch_tx, batch_rx) = mpsc::channel(config.handoff_capacity());
        let batches = SharedReceiver::new(batch_rx);
        let limiter = Arc::new(Semaphore::new(concurrency));

        let processors = (0..concurrency)
            .map(|processor_id| {
                tokio::spawn(process_batches(
                    processor_id,
                    batches.clone(),
                    Arc::clone(&limiter),
                    Arc::clone(&backend),
                    Arc::clone(&metrics),
                    config.retries,
                ))
            })
            .collect();

        let aggregator = tokio::spawn(aggregate(
            admission,
            batch_tx,
            config.batch_limit(),
            config.flush_period(),
        ));

        Self {
            aggregator,
            processors,
        }
    }

    /// Handles that abort the aggregator and every processor, usable after
    /// [`Batcher::join`] has taken the batcher.
    pub fn abort_handles(&self) -> Vec<AbortHandle> {
        core::iter::once(&self.aggregator)
            .chain(&self.processors)
            .map(JoinHandle::abort_handle)
            .collect()
    }

    /// Waits for the aggregator's final flush and for the processors to drain
    /// the hand-off queue.
    pub async fn join(self) {
        if let Err(_e) = self.aggregator.await {
            #[cfg(feature = "tracing")]
            tracing::error!("Aggregator terminated abnormally: {_e}");
        }

        let results = futures::future::join_all(self.processors).await;
        for (_i, result) in results.into_iter().enumerate() {
            if let Err(_e) = result {
                #[cfg(feature = "tracing")]
                tracing::error!("Batch processor {_i} terminated abnormally: {_e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Dispatcher,
        test_support::{BlockingBackend, FailingBackend, GaugeBackend, RecordingBackend},
    };
    use std::collections::HashMap;
    use tokio::sync::oneshot;
    use tokio_util::sync::CancellationToken;

    type Waiter = oneshot::Receiver<Result<Bytes>>;

    fn job(timeout: Duration) -> (Job, Waiter) {
        let (tx, rx) = oneshot::channel();
        let deadline = Deadline::new(&CancellationToken::new(), timeout);
        (Job::new(deadline, Bytes::from_static(b"{}"), tx), rx)
    }

    fn batching(workers: usize, max_batch_size: usize, flush_interval: Duration) -> DispatchConfig {
        DispatchConfig {
            workers,
            batching: true,
            max_batch_size,
            flush_interval,
            timeout: Duration::from_secs(5),
            ..DispatchConfig::default()
        }
    }

    async fn enqueue(tx: &mpsc::Sender<Job>, count: usize) -> Vec<Waiter> {
        let mut waiters = Vec::with_capacity(count);
        for _ in 0..count {
            let (job, rx) = job(Duration::from_secs(5));
            tx.send(job).await.expect("enqueue");
            waiters.push(rx);
        }
        waiters
    }

    #[tokio::test(start_paused = true)]
    async fn batches_never_exceed_the_size_limit() {
        for (max_batch_size, arrivals) in [(1, 5), (3, 3), (4, 10), (8, 64), (5, 17)] {
            let config = batching(2, max_batch_size, Duration::from_millis(10));
            let backend = Arc::new(RecordingBackend::new(Duration::from_millis(5)));
            let metrics = Arc::new(Metrics::new());
            let (tx, rx) = mpsc::channel(1024);
            let batcher = Batcher::spawn(&config, rx, Arc::clone(&backend), Arc::clone(&metrics));

            let waiters = enqueue(&tx, arrivals).await;
            drop(tx);
            for rx in waiters {
                rx.await.expect("response").expect("success");
            }
            batcher.join().await;

            let calls = backend.calls();
            assert!(
                calls.iter().all(|&units| (1..=max_batch_size).contains(&units)),
                "batch sizes {calls:?} exceed {max_batch_size}"
            );
            assert_eq!(calls.iter().sum::<usize>(), arrivals);
            assert_eq!(metrics.snapshot().samples, arrivals);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn jobs_of_a_batch_share_their_fate() {
        let config = batching(2, 4, Duration::from_millis(10));
        let backend = Arc::new(RecordingBackend::new(Duration::from_millis(7)));
        let metrics = Arc::new(Metrics::new());
        let (tx, rx) = mpsc::channel(1024);
        let batcher = Batcher::spawn(&config, rx, Arc::clone(&backend), Arc::clone(&metrics));

        let waiters = enqueue(&tx, 10).await;
        drop(tx);

        // Group the responses by the backend call that produced them.
        let mut per_call: HashMap<Bytes, usize> = HashMap::new();
        for rx in waiters {
            let body = rx.await.expect("response").expect("success");
            *per_call.entry(body).or_default() += 1;
        }
        batcher.join().await;

        let calls = backend.calls();
        assert_eq!(per_call.len(), calls.len());
        for (body, jobs) in &per_call {
            let body: serde_json::Value = serde_json::from_slice(body).expect("json");
            assert_eq!(body["units"], *jobs);
        }

        // One sample per job, all sharing their batch's latency.
        let latencies = metrics.latencies();
        assert_eq!(latencies.len(), 10);
        assert!(latencies.iter().all(|l| *l == latencies[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn one_failure_fails_the_whole_batch() {
        let config = DispatchConfig {
            retries: 2,
            ..batching(1, 4, Duration::from_millis(10))
        };
        let backend = Arc::new(FailingBackend::default());
        let metrics = Arc::new(Metrics::new());
        let (tx, rx) = mpsc::channel(1024);
        let batcher = Batcher::spawn(&config, rx, Arc::clone(&backend), Arc::clone(&metrics));

        let waiters = enqueue(&tx, 4).await;
        drop(tx);
        for rx in waiters {
            assert_eq!(rx.await.expect("response"), Err(Error::backend("upstream_error")));
        }
        batcher.join().await;

        // A single batch of four, attempted three times.
        assert_eq!(backend.invocations(), 3);
        let snap = metrics.snapshot();
        assert_eq!(snap.samples, 4);
        assert_eq!(snap.errors, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_flushes_a_partial_batch() {
        let config = batching(1, 100, Duration::from_millis(10));
        let backend = Arc::new(RecordingBackend::new(Duration::from_millis(1)));
        let (tx, rx) = mpsc::channel(1024);
        let batcher = Batcher::spawn(&config, rx, Arc::clone(&backend), Arc::new(Metrics::new()));
        let start = tokio::time::Instant::now();

        let waiters = enqueue(&tx, 3).await;
        for rx in waiters {
            rx.await.expect("response").expect("success");
        }

        // Flushed by the first tick, with the admission queue still open.
        assert_eq!(backend.calls(), vec![3]);
        assert!(start.elapsed() >= Duration::from_millis(10));

        drop(tx);
        batcher.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn closing_admission_flushes_the_partial_batch() {
        let config = batching(1, 100, Duration::from_secs(3600));
        let backend = Arc::new(RecordingBackend::new(Duration::from_millis(1)));
        let (tx, rx) = mpsc::channel(1024);
        let batcher = Batcher::spawn(&config, rx, Arc::clone(&backend), Arc::new(Metrics::new()));

        let waiters = enqueue(&tx, 2).await;
        drop(tx);
        for rx in waiters {
            rx.await.expect("response").expect("success");
        }
        batcher.join().await;

        assert_eq!(backend.calls(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn backend_calls_never_exceed_the_concurrency_limit() {
        for workers in [1, 2, 4] {
            let config = batching(workers, 1, Duration::from_millis(10));
            let backend = Arc::new(GaugeBackend::new(Duration::from_millis(5)));
            let (tx, rx) = mpsc::channel(1024);
            let batcher = Batcher::spawn(&config, rx, Arc::clone(&backend), Arc::new(Metrics::new()));

            let waiters = enqueue(&tx, 16).await;
            drop(tx);
            for rx in waiters {
                rx.await.expect("response").expect("success");
            }
            batcher.join().await;

            let peak = backend.peak();
            assert!(
                (1..=config.concurrency()).contains(&peak),
                "{peak} concurrent calls with {workers} workers"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn full_handoff_queue_does_not_block_admission() {
        let config = DispatchConfig {
            workers: 1,
            batching: true,
            max_batch_size: 1,
            flush_interval: Duration::from_millis(10),
            timeout: Duration::from_millis(100),
            queue_capacity: 4,
            batch_queue_capacity: 1,
            ..DispatchConfig::default()
        };
        let backend = Arc::new(BlockingBackend::default());
        let dispatcher = Dispatcher::new(config, Arc::clone(&backend), Arc::new(Metrics::new()));
        let parent = CancellationToken::new();
        let payload = || Bytes::from_static(b"{}");
        let settle = || tokio::time::sleep(Duration::from_millis(1));

        // The only processor is stuck on the first batch.
        let mut pending = vec![dispatcher.enqueue(payload(), &parent).expect("admitted")];
        backend.wait_started().await;
        // The second batch fills the hand-off queue, and the third leaves the
        // aggregator suspended on it.
        for _ in 0..2 {
            pending.push(dispatcher.enqueue(payload(), &parent).expect("admitted"));
            settle().await;
        }

        // Admission still accepts work until its own queue is full.
        let start = tokio::time::Instant::now();
        for _ in 0..4 {
            pending.push(dispatcher.enqueue(payload(), &parent).expect("admitted"));
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        settle().await;
        assert_eq!(
            dispatcher.enqueue(payload(), &parent).err(),
            Some(Error::QueueFull)
        );

        // Every admitted job is still answered, by its deadline at the latest.
        assert_eq!(pending.len(), 7);
        for response in pending {
            assert_eq!(response.wait().await, Err(Error::DeadlineExceeded));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn closed_handoff_queue_fails_the_batch_with_shutdown() {
        let (batch_tx, batch_rx) = mpsc::channel::<Batch>(1);
        drop(batch_rx);
        let (tx, rx) = mpsc::channel(8);

        let waiters = enqueue(&tx, 3).await;
        drop(tx);
        aggregate(rx, batch_tx, 4, Duration::from_millis(10)).await;

        for rx in waiters {
            assert_eq!(rx.await.expect("response"), Err(Error::ServiceShutdown));
        }
    }

    #[test]
    fn empty_job_list_is_not_a_batch() {
        assert!(Batch::new(Vec::new()).is_none());
    }
}
