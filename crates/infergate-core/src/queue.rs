use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

/// A bounded MPSC receiver shared by several consumer tasks.
///
/// Consumers take turns on an async mutex, so each item is handed to exactly
/// one of them. The lock is released as soon as an item (or the closed
/// signal) is received.
#[derive(Debug)]
pub struct SharedReceiver<T> {
    inner: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for SharedReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> SharedReceiver<T> {
    pub fn new(rx: mpsc::Receiver<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(rx)),
        }
    }

    /// Receives the next item, or `None` once every sender is gone and the
    /// queue is drained.
    pub async fn recv(&self) -> Option<T> {
        self.inner.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn each_item_is_received_once() {
        let (tx, rx) = mpsc::channel(64);
        let shared = SharedReceiver::new(rx);

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                tokio::spawn(async move {
                    let mut seen = Vec::new();
                    while let Some(item) = shared.recv().await {
                        seen.push(item);
                    }
                    seen
                })
            })
            .collect();

        for i in 0..64 {
            tx.send(i).await.expect("send");
        }
        drop(tx);

        let mut all = Vec::new();
        for consumer in consumers {
            all.extend(consumer.await.expect("consumer panicked"));
        }
        all.sort_unstable();
        assert_eq!(all, (0..64).collect::<Vec<_>>());
    }
}
