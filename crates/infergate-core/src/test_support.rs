//! Deterministic backends for tests.

use crate::{Backend, Deadline, Error, Result};
use bytes::Bytes;
use core::time::Duration;
use parking_lot::Mutex;
use portable_atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

/// Succeeds after a fixed latency and records the unit count of every call.
///
/// The body identifies the call: `{"call":<index>,"units":<units>}`.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    latency: Duration,
    calls: Mutex<Vec<usize>>,
}

impl RecordingBackend {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            calls: Mutex::default(),
        }
    }

    /// Unit counts, in call order.
    pub fn calls(&self) -> Vec<usize> {
        self.calls.lock().clone()
    }
}

impl Backend for RecordingBackend {
    async fn call(&self, units: usize, deadline: &Deadline) -> Result<Bytes> {
        let index = {
            let mut calls = self.calls.lock();
            calls.push(units);
            calls.len() - 1
        };

        tokio::select! {
            biased;
            () = deadline.done() => return Err(deadline.error()),
            () = tokio::time::sleep(self.latency) => {}
        }

        Ok(Bytes::from(format!(r#"{{"call":{index},"units":{units}}}"#)))
    }
}

/// Fails every call with `upstream_error` and counts invocations.
#[derive(Debug, Default)]
pub struct FailingBackend {
    invocations: AtomicUsize,
}

impl FailingBackend {
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

impl Backend for FailingBackend {
    async fn call(&self, _units: usize, _deadline: &Deadline) -> Result<Bytes> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Err(Error::backend("upstream_error"))
    }
}

/// Never finishes on its own: each call announces itself, then waits for the
/// deadline and returns its error.
#[derive(Debug, Default)]
pub struct BlockingBackend {
    started: Notify,
    invocations: AtomicUsize,
}

impl BlockingBackend {
    /// Completes once a call has started.
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

impl Backend for BlockingBackend {
    async fn call(&self, _units: usize, deadline: &Deadline) -> Result<Bytes> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        deadline.done().await;
        Err(deadline.error())
    }
}

/// Succeeds after a fixed latency and tracks the highest number of calls
/// running at the same time.
#[derive(Debug, Default)]
pub struct GaugeBackend {
    latency: Duration,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl GaugeBackend {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Highest number of overlapping calls seen so far.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Backend for GaugeBackend {
    async fn call(&self, units: usize, deadline: &Deadline) -> Result<Bytes> {
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        let outcome = tokio::select! {
            biased;
            () = deadline.done() => Err(deadline.error()),
            () = tokio::time::sleep(self.latency) => {
                Ok(Bytes::from(format!(r#"{{"units":{units}}}"#)))
            }
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}
