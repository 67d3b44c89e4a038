//! Request admission and the caller side of a job's lifecycle.
//!
//! The [`Dispatcher`] owns the bounded admission queue and the execution
//! strategy consuming it. A submission goes through two halves:
//!
//! 1. [`Dispatcher::enqueue`] derives the job's [`Deadline`] and pushes the
//!    job onto the admission queue without ever waiting for space. A full
//!    queue sheds the request with [`Error::QueueFull`].
//! 2. [`PendingResponse::wait`] suspends the caller until the job's result
//!    slot is filled or its deadline elapses, whichever comes first.
//!
//! [`Dispatcher::submit`] chains both.

use crate::{
    Backend, Deadline, DispatchConfig, DispatchMode, Error, Job, Metrics, Result,
    strategy::Strategy,
};
use bytes::Bytes;
use core::time::Duration;
use parking_lot::{Mutex, RwLock};
use portable_atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::{
    sync::{mpsc, oneshot},
    time::timeout,
};
use tokio_util::sync::{CancellationToken, DropGuard};

/// Admits requests and hands them to the configured execution strategy.
///
/// The strategy is chosen in [`Dispatcher::new`] and fixed for the
/// dispatcher's lifetime.
#[derive(Debug)]
pub struct Dispatcher {
    config: DispatchConfig,
    admission: RwLock<Option<mpsc::Sender<Job>>>,
    strategy: Mutex<Option<Strategy>>,
    metrics: Arc<Metrics>,
    inflight: Arc<AtomicUsize>,
    shutdown_token: CancellationToken,
}

impl Dispatcher {
    /// Creates the admission queue and starts the strategy selected by
    /// `config` against it.
    ///
    /// Must be called from within a Tokio runtime: the strategy's tasks are
    /// spawned immediately.
    pub fn new<B: Backend>(config: DispatchConfig, backend: Arc<B>, metrics: Arc<Metrics>) -> Self {
        let (tx, rx) = mpsc::channel(config.admission_capacity());
        let strategy = Strategy::start(&config, rx, backend, Arc::clone(&metrics));

        #[cfg(feature = "tracing")]
        tracing::info!(
            "Dispatcher started: mode={:?} concurrency={} queue_capacity={}",
            config.mode(),
            config.concurrency(),
            config.admission_capacity()
        );

        Self {
            config,
            admission: RwLock::new(Some(tx)),
            strategy: Mutex::new(Some(strategy)),
            metrics,
            inflight: Arc::new(AtomicUsize::new(0)),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Admits `payload` as a new job without waiting for queue space.
    ///
    /// The job's deadline is the configured timeout from now. Its token is a
    /// child of `parent`, so cancelling `parent` cancels the job.
    ///
    /// # Errors
    ///
    /// - [`Error::QueueFull`] if the admission queue is at capacity.
    /// - [`Error::ServiceShutdown`] once [`Dispatcher::shutdown`] has begun.
    pub fn enqueue(&self, payload: Bytes, parent: &CancellationToken) -> Result<PendingResponse> {
        let deadline = Deadline::new(parent, self.config.timeout);
        let (tx, rx) = oneshot::channel();
        let job = Job::new(deadline.clone(), payload, tx);

        {
            let admission = self.admission.read();
            let Some(sender) = admission.as_ref() else {
                return Err(Error::ServiceShutdown);
            };
            match sender.try_send(job) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Admission queue full, shedding request");
                    return Err(Error::QueueFull);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return Err(Error::ServiceShutdown),
            }
        }

        Ok(PendingResponse::new(
            deadline,
            rx,
            InflightGuard::new(Arc::clone(&self.inflight)),
            self.shutdown_token.clone(),
        ))
    }

    /// Admits `payload` and waits for its response.
    ///
    /// # Errors
    ///
    /// Any admission error of [`Dispatcher::enqueue`], then whatever the job
    /// resolved to: a backend failure that exhausted its retries,
    /// [`Error::DeadlineExceeded`], [`Error::Cancelled`], or
    /// [`Error::ServiceShutdown`] if a forced shutdown dropped the job.
    pub async fn submit(&self, payload: Bytes, parent: &CancellationToken) -> Result<Bytes> {
        self.enqueue(payload, parent)?.wait().await
    }

    /// The metrics collector shared with the strategy.
    pub const fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// The dispatcher's startup configuration.
    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// The execution strategy in use.
    pub const fn mode(&self) -> DispatchMode {
        self.config.mode()
    }

    /// Admitted jobs whose caller is still waiting.
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Relaxed)
    }

    /// Gracefully shuts the dispatcher down.
    ///
    /// - Refuses new submissions with [`Error::ServiceShutdown`].
    /// - Closes the admission queue: the worker pool drains it, the batching
    ///   aggregator flushes its partial batch.
    /// - Waits up to `grace` for the strategy's tasks to finish, then aborts
    ///   whatever is left. Callers of aborted jobs observe
    ///   [`Error::ServiceShutdown`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceShutdown`] if shutdown had already begun.
    pub async fn shutdown(&self, grace: Duration) -> Result<()> {
        // === Phase 0: Stop accepting new requests ===
        let Some(admission) = self.admission.write().take() else {
            return Err(Error::ServiceShutdown);
        };
        self.shutdown_token.cancel();
        #[cfg(feature = "tracing")]
        tracing::info!("Refusing new requests");

        // === Phase 1: Close the admission queue ===
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Draining admission queue ({} queued, {} in flight)",
            self.config.admission_capacity() - admission.capacity(),
            self.inflight()
        );
        drop(admission);

        // === Phase 2: Wait for the strategy to finish ===
        let Some(strategy) = self.strategy.lock().take() else {
            return Ok(());
        };
        let handles = strategy.abort_handles();
        match timeout(grace, strategy.join()).await {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Strategy drained successfully");
            }
            Err(_) => {
                // === Phase 3: Abort whatever is left ===
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Graceful drain timed out ({} requests still in flight)",
                    self.inflight()
                );
                for handle in handles {
                    handle.abort();
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Dispatcher shutdown complete");

        Ok(())
    }
}

/// The caller's half of an admitted job.
///
/// Dropping it before the job completes cancels the job's token, so a backend
/// call made on behalf of a caller that went away aborts promptly.
#[derive(Debug)]
pub struct PendingResponse {
    deadline: Deadline,
    rx: oneshot::Receiver<Result<Bytes>>,
    shutdown_token: CancellationToken,
    _cancel_on_drop: DropGuard,
    _inflight: InflightGuard,
}

impl PendingResponse {
    fn new(
        deadline: Deadline,
        rx: oneshot::Receiver<Result<Bytes>>,
        inflight: InflightGuard,
        shutdown_token: CancellationToken,
    ) -> Self {
        let cancel_on_drop = deadline.token().clone().drop_guard();
        Self {
            deadline,
            rx,
            shutdown_token,
            _cancel_on_drop: cancel_on_drop,
            _inflight: inflight,
        }
    }

    /// The job's deadline.
    pub const fn deadline(&self) -> &Deadline {
        &self.deadline
    }

    /// Waits for the job's response or its deadline.
    ///
    /// A response that is already delivered wins over a deadline that elapsed
    /// at the same time.
    ///
    /// # Errors
    ///
    /// The job's own error, or the deadline's error ([`Error::DeadlineExceeded`]
    /// or [`Error::Cancelled`]) if it fired first.
    pub async fn wait(mut self) -> Result<Bytes> {
        tokio::select! {
            biased;
            response = &mut self.rx => match response {
                Ok(response) => response,
                Err(_) if self.shutdown_token.is_cancelled() => Err(Error::ServiceShutdown),
                Err(_) => Err(Error::ChannelError {
                    context: "job dropped without a response".to_string(),
                }),
            },
            () = self.deadline.done() => Err(self.deadline.error()),
        }
    }
}

/// Counts a caller as in flight for as long as it is alive.
#[derive(Debug)]
struct InflightGuard(Arc<AtomicUsize>);

impl InflightGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}
