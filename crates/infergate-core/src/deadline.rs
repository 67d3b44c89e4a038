use crate::Error;
use core::time::Duration;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

/// A cancellation token paired with an absolute deadline.
///
/// Every job carries one of these from admission to completion. It is done
/// when either the deadline instant passes or the token is cancelled, which
/// happens when the caller's parent token is cancelled or the caller stops
/// waiting.
///
/// Cloning is cheap and all clones observe the same state.
#[derive(Clone, Debug)]
pub struct Deadline {
    token: CancellationToken,
    at: Instant,
}

impl Deadline {
    /// Derives a deadline `timeout` from now whose token is a child of
    /// `parent`, so an early cancellation of the caller propagates to the job.
    pub fn new(parent: &CancellationToken, timeout: Duration) -> Self {
        Self {
            token: parent.child_token(),
            at: Instant::now() + timeout,
        }
    }

    /// The instant at which the deadline elapses.
    pub const fn at(&self) -> Instant {
        self.at
    }

    /// The job's cancellation token.
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancels the job early.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns `true` once the deadline has elapsed or the token is cancelled.
    pub fn is_done(&self) -> bool {
        Instant::now() >= self.at || self.token.is_cancelled()
    }

    /// Completes once the deadline elapses or the token is cancelled.
    pub async fn done(&self) {
        tokio::select! {
            biased;
            () = self.token.cancelled() => {}
            () = sleep_until(self.at) => {}
        }
    }

    /// The error describing why this deadline is done, or `None` while it is
    /// still live.
    ///
    /// An elapsed deadline takes precedence: a token cancelled after the
    /// deadline passed still reports [`Error::DeadlineExceeded`].
    pub fn err(&self) -> Option<Error> {
        if Instant::now() >= self.at {
            Some(Error::DeadlineExceeded)
        } else if self.token.is_cancelled() {
            Some(Error::Cancelled)
        } else {
            None
        }
    }

    /// Like [`Deadline::err`], for call sites that already know the deadline
    /// is done.
    pub fn error(&self) -> Error {
        self.err().unwrap_or(Error::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn elapses_with_deadline_exceeded() {
        let deadline = Deadline::new(&CancellationToken::new(), Duration::from_millis(50));
        assert!(!deadline.is_done());
        assert_eq!(deadline.err(), None);

        deadline.done().await;

        assert!(deadline.is_done());
        assert_eq!(deadline.err(), Some(Error::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn parent_cancellation_propagates() {
        let parent = CancellationToken::new();
        let deadline = Deadline::new(&parent, Duration::from_secs(60));

        parent.cancel();
        deadline.done().await;

        assert_eq!(deadline.error(), Error::Cancelled);
        assert!(Instant::now() < deadline.at());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_the_job_leaves_the_parent_alone() {
        let parent = CancellationToken::new();
        let deadline = Deadline::new(&parent, Duration::from_secs(60));

        deadline.cancel();

        assert!(deadline.is_done());
        assert!(!parent.is_cancelled());
    }
}
