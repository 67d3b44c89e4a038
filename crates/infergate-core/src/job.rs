use crate::{Deadline, Result};
use bytes::Bytes;
use tokio::sync::oneshot;

/// A single admitted unit of work.
///
/// A job is created by the dispatcher at admission time and consumed exactly
/// once by whichever strategy pulls it off the admission queue. Its result
/// slot is a [`oneshot`] channel: completing a job never blocks, even if the
/// caller has not started waiting yet (or has already gone away).
#[derive(Debug)]
pub struct Job {
    deadline: Deadline,
    payload: Bytes,
    respond_to: oneshot::Sender<Result<Bytes>>,
}

impl Job {
    pub(crate) const fn new(
        deadline: Deadline,
        payload: Bytes,
        respond_to: oneshot::Sender<Result<Bytes>>,
    ) -> Self {
        Self {
            deadline,
            payload,
            respond_to,
        }
    }

    /// The job's deadline and cancellation token.
    pub const fn deadline(&self) -> &Deadline {
        &self.deadline
    }

    /// The opaque request payload. The core never interprets it.
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Delivers the job's single response.
    ///
    /// If the caller is no longer waiting the response is discarded.
    pub fn complete(self, response: Result<Bytes>) {
        if self.respond_to.send(response).is_err() {
            #[cfg(feature = "tracing")]
            tracing::trace!("Caller stopped waiting before job completion");
        }
    }
}
