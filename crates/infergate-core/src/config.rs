//! Dispatch configuration and default sizing constants.
//!
//! [`DispatchConfig`] is fixed at startup: the execution strategy and every
//! size below are never changed while the dispatcher runs.
//!
//! ## Key Concepts
//! - **Admission**: The admission queue is bounded and finite. A full queue
//!   sheds new work instead of blocking the submitter.
//! - **Concurrency**: `workers` is the number of pool workers, or the number
//!   of batch processors (and concurrent backend calls) when batching.
//! - **Batching**: A batch is flushed when it reaches `max_batch_size` jobs or
//!   when the flush timer ticks, whichever comes first.
//!
//! ## Clamping
//! Accessors such as [`DispatchConfig::concurrency`] clamp every size to its
//! smallest workable value, so a config built with zeros still yields a
//! running dispatcher.

use core::time::Duration;

/// Capacity of the admission queue shared by every submitter.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Capacity of the hand-off queue between the aggregator and the batch
/// processors.
pub const DEFAULT_BATCH_QUEUE_CAPACITY: usize = 1024;

/// Number of concurrent workers (or batch processors).
pub const DEFAULT_WORKERS: usize = 32;

/// Largest number of jobs in a single batch.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 8;

/// Interval at which a partial batch is flushed.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Per-request deadline, measured from admission.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(400);

/// Startup configuration of a [`Dispatcher`](crate::Dispatcher).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Worker count in pool mode; processor count and concurrency limit in
    /// batching mode.
    pub workers: usize,
    /// Selects the batching strategy instead of the worker pool.
    pub batching: bool,
    /// Largest number of jobs handed to the backend in one call.
    pub max_batch_size: usize,
    /// Flush timer period for partial batches.
    pub flush_interval: Duration,
    /// Per-request deadline.
    pub timeout: Duration,
    /// Retry attempts after the first failed backend call.
    pub retries: usize,
    /// Admission queue capacity.
    pub queue_capacity: usize,
    /// Aggregator to processor hand-off queue capacity.
    pub batch_queue_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            batching: false,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            retries: 0,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            batch_queue_capacity: DEFAULT_BATCH_QUEUE_CAPACITY,
        }
    }
}

impl DispatchConfig {
    /// Number of workers or batch processors, never less than one.
    pub fn concurrency(&self) -> usize {
        self.workers.max(1)
    }

    /// Batch size limit, never less than one job.
    pub fn batch_limit(&self) -> usize {
        self.max_batch_size.max(1)
    }

    /// Flush timer period, never shorter than one millisecond.
    pub fn flush_period(&self) -> Duration {
        self.flush_interval.max(Duration::from_millis(1))
    }

    /// Admission queue capacity, never less than one slot.
    pub fn admission_capacity(&self) -> usize {
        self.queue_capacity.max(1)
    }

    /// Hand-off queue capacity, never less than one slot.
    pub fn handoff_capacity(&self) -> usize {
        self.batch_queue_capacity.max(1)
    }

    /// The execution strategy this config selects.
    pub const fn mode(&self) -> DispatchMode {
        if self.batching {
            DispatchMode::Batching
        } else {
            DispatchMode::WorkerPool
        }
    }
}

/// The execution strategy chosen once at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Independent workers, one job per backend call.
    WorkerPool,
    /// Aggregator plus batch processors, one batch per backend call.
    Batching,
}
