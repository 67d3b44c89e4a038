use crate::{Deadline, Result};
use core::time::Duration;

/// Unit of the linear retry backoff. The wait before retry `n` (1-based) is
/// `n * BACKOFF_UNIT`.
pub const BACKOFF_UNIT: Duration = Duration::from_millis(20);

/// Runs `op` until it succeeds, at most `retries + 1` times.
///
/// Between failed attempts the wrapper waits a linearly growing backoff that
/// races the job's deadline. The deadline wins a tie, so a retry is never
/// started after the deadline has been reached. No backoff is slept after the
/// last attempt.
///
/// # Errors
///
/// - The deadline's error if it is done before an attempt or during a
///   backoff.
/// - Otherwise the error of the last attempt.
pub async fn with_retries<T, F, Fut>(deadline: &Deadline, retries: usize, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        if let Some(err) = deadline.err() {
            return Err(err);
        }

        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if attempt as usize >= retries {
            return Err(err);
        }
        attempt += 1;

        #[cfg(feature = "tracing")]
        tracing::debug!("Attempt {attempt} failed ({err}), retrying");

        tokio::select! {
            biased;
            () = deadline.done() => return Err(deadline.error()),
            () = tokio::time::sleep(BACKOFF_UNIT * attempt) => {}
        }
    }
}
