//! Per-request worker dispatch.
//!
//! [`WorkerPool`] spawns a fixed number of independent workers that all pull
//! from the same admission queue. Each job is consumed by exactly one worker,
//! exactly once, and is sent to the backend on its own (unit count 1). There
//! is no ordering guarantee between jobs handled by different workers.

mod worker;

use crate::{Backend, DispatchConfig, Job, Metrics, queue::SharedReceiver};
use std::sync::Arc;
use tokio::{
    sync::mpsc,
    task::{AbortHandle, JoinHandle},
};
pub use worker::worker_loop;

/// A fixed-size pool of workers draining the admission queue.
#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `config.concurrency()` workers on the current Tokio runtime.
    ///
    /// The workers stop once every sender of `admission` is dropped and the
    /// queue is drained.
    pub fn spawn<B: Backend>(
        config: &DispatchConfig,
        admission: mpsc::Receiver<Job>,
        backend: Arc<B>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let queue = SharedReceiver::new(admission);
        let workers = (0..config.concurrency())
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    queue.clone(),
                    Arc::clone(&backend),
                    Arc::clone(&metrics),
                    config.retries,
                ))
            })
            .collect();

        Self { workers }
    }

    /// Number of spawned workers.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether the pool has no workers.
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Handles that abort the workers, usable after [`WorkerPool::join`] has
    /// taken the pool.
    pub fn abort_handles(&self) -> Vec<AbortHandle> {
        self.workers.iter().map(JoinHandle::abort_handle).collect()
    }

    /// Waits for every worker to finish.
    pub async fn join(self) {
        let results = futures::future::join_all(self.workers).await;
        for (_i, result) in results.into_iter().enumerate() {
            if let Err(_e) = result {
                #[cfg(feature = "tracing")]
                tracing::error!("Worker {_i} terminated abnormally: {_e}");
            }
        }
    }
}
