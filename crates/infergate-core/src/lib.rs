//! Request admission, worker-pool and micro-batching dispatch for inference
//! serving.
//!
//! A [`Dispatcher`] sheds load with a bounded admission queue, bounds every
//! request with a [`Deadline`], and hands admitted [`Job`]s to one of two
//! strategies fixed at startup:
//!
//! - [`WorkerPool`]: independent workers, one backend call per job.
//! - [`Batcher`]: an aggregator grouping jobs by size or timer, and batch
//!   processors making one backend call per batch.
//!
//! Both strategies retry failed backend calls with [`with_retries`] and
//! record one latency sample per job into the shared [`Metrics`].
//!
//! ```no_run
//! use infergate_core::{DispatchConfig, Dispatcher, Metrics, SimulatedModel};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> infergate_core::Result<()> {
//! let config = DispatchConfig {
//!     batching: true,
//!     ..DispatchConfig::default()
//! };
//! let dispatcher = Dispatcher::new(
//!     config,
//!     Arc::new(SimulatedModel::default()),
//!     Arc::new(Metrics::new()),
//! );
//!
//! let body = dispatcher
//!     .submit(bytes::Bytes::from_static(b"{}"), &CancellationToken::new())
//!     .await?;
//! println!("{}", String::from_utf8_lossy(&body));
//! println!("{:?}", dispatcher.metrics().snapshot());
//! # Ok(())
//! # }
//! ```

mod backend;
mod batching;
mod config;
mod deadline;
mod dispatcher;
mod error;
mod job;
mod metrics;
mod pool;
mod queue;
mod retry;
mod strategy;
#[cfg(test)]
mod test_support;

pub use crate::backend::*;
pub use crate::batching::*;
pub use crate::config::*;
pub use crate::deadline::*;
pub use crate::dispatcher::*;
pub use crate::error::*;
pub use crate::job::*;
pub use crate::metrics::*;
pub use crate::pool::*;
pub use crate::queue::*;
pub use crate::retry::*;
