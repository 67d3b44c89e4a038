//! Error types for the dispatch core.
//!
//! This module defines the central [`Error`] enum, which captures every way a
//! submitted job can end without a result payload. Every variant is terminal
//! from the dispatcher's point of view: a job that fails is still completed,
//! and its caller observes exactly one of these.
//!
//! ## Error Cases
//! - `QueueFull`: The admission queue was at capacity. Never retried.
//! - `BackendFailure`: The backend call failed. Retried up to the configured
//!   attempt budget, then surfaced.
//! - `DeadlineExceeded`: The per-job deadline elapsed.
//! - `Cancelled`: The caller's context ended before the deadline.
//! - `ServiceShutdown`: A job arrived, or was still pending, while the
//!   dispatcher was shutting down.
//! - `ChannelError`: A result slot was closed without a value.

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the dispatch core.
///
/// `Clone` so that a single backend outcome can be fanned out to every job of
/// a batch.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The admission queue is full; the request was shed.
    #[error("queue_full")]
    QueueFull,

    /// The backend call failed after exhausting its retries.
    #[error("{reason}")]
    BackendFailure { reason: String },

    /// The job's deadline elapsed before a result was produced.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// The caller went away before a result was produced.
    #[error("context canceled")]
    Cancelled,

    /// The dispatcher is shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,

    /// Internal channel failure (e.g., a result slot dropped without a value).
    #[error("Channel error: {context}")]
    ChannelError { context: String },
}

impl Error {
    /// Convenience constructor for a backend failure.
    pub fn backend(reason: impl Into<String>) -> Self {
        Self::BackendFailure {
            reason: reason.into(),
        }
    }
}
