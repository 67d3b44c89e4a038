use crate::{Backend, Batcher, DispatchConfig, DispatchMode, Job, Metrics, WorkerPool};
use std::sync::Arc;
use tokio::{sync::mpsc, task::AbortHandle};

/// The running execution strategy, selected once from the config.
#[derive(Debug)]
pub(crate) enum Strategy {
    WorkerPool(WorkerPool),
    Batching(Batcher),
}

impl Strategy {
    /// Starts the strategy `config` selects as the sole consumer of
    /// `admission`.
    pub(crate) fn start<B: Backend>(
        config: &DispatchConfig,
        admission: mpsc::Receiver<Job>,
        backend: Arc<B>,
        metrics: Arc<Metrics>,
    ) -> Self {
        match config.mode() {
            DispatchMode::WorkerPool => {
                Self::WorkerPool(WorkerPool::spawn(config, admission, backend, metrics))
            }
            DispatchMode::Batching => {
                Self::Batching(Batcher::spawn(config, admission, backend, metrics))
            }
        }
    }

    pub(crate) fn abort_handles(&self) -> Vec<AbortHandle> {
        match self {
            Self::WorkerPool(pool) => pool.abort_handles(),
            Self::Batching(batcher) => batcher.abort_handles(),
        }
    }

    /// Completes once every task of the strategy has stopped.
    pub(crate) async fn join(self) {
        match self {
            Self::WorkerPool(pool) => pool.join().await,
            Self::Batching(batcher) => batcher.join().await,
        }
    }
}
