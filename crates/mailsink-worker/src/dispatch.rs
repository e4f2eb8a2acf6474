//! Bounded dispatch queue between the orchestrator and the worker pool
//!
//! The queue is the system's backpressure mechanism: its capacity is counted
//! in batches, the orchestrator enqueues non-blocking (a full queue ends the
//! current tick), and every worker pulls from the shared receiver. A `None`
//! item is the shutdown sentinel; the orchestrator sends exactly one per
//! worker during termination.

use std::sync::Arc;
use std::time::Duration;

use mailsink_common::types::MailBatch;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;

/// Receiver half shared by all workers.
pub type SharedReceiver = Arc<Mutex<mpsc::Receiver<Option<MailBatch>>>>;

/// Non-blocking enqueue failure; the batch comes back to the caller.
#[derive(Debug)]
pub enum TryDispatchError {
    /// Queue is at capacity; stop enqueuing for this tick.
    Full(MailBatch),
    /// All workers are gone.
    Closed(MailBatch),
}

/// Sender half owned by the orchestrator.
#[derive(Debug, Clone)]
pub struct DispatchSender {
    tx: mpsc::Sender<Option<MailBatch>>,
    maxsize: usize,
}

impl DispatchSender {
    /// Number of additional batches the queue can take right now.
    pub fn remaining_capacity(&self) -> usize {
        self.tx.capacity()
    }

    /// Configured queue capacity, in batches.
    pub fn max_capacity(&self) -> usize {
        self.maxsize
    }

    /// Enqueue without blocking.
    pub fn try_dispatch(&self, batch: MailBatch) -> Result<(), TryDispatchError> {
        match self.tx.try_send(Some(batch)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(Some(batch))) => Err(TryDispatchError::Full(batch)),
            Err(TrySendError::Closed(Some(batch))) => Err(TryDispatchError::Closed(batch)),
            // Sentinels are never sent through this method.
            Err(TrySendError::Full(None)) | Err(TrySendError::Closed(None)) => unreachable!(),
        }
    }

    /// Send one shutdown sentinel, waiting for queue space up to `timeout`.
    ///
    /// Returns `false` when the sentinel could not be delivered (queue still
    /// full after the timeout, or all receivers gone); termination proceeds
    /// anyway since workers also observe the cancellation token.
    pub async fn send_stop(&self, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, self.tx.send(None)).await,
            Ok(Ok(()))
        )
    }
}

/// Build the bounded queue; the receiver is shared by all workers.
pub fn channel(maxsize: usize) -> (DispatchSender, SharedReceiver) {
    let (tx, rx) = mpsc::channel(maxsize);
    (
        DispatchSender { tx, maxsize },
        Arc::new(Mutex::new(rx)),
    )
}

/// Pull the next queue item for one worker.
///
/// Outer `None` means the channel is closed; `Some(None)` is a shutdown
/// sentinel; `Some(Some(batch))` is work.
pub async fn recv_next(rx: &SharedReceiver) -> Option<Option<MailBatch>> {
    rx.lock().await.recv().await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn batch(domain: &str) -> MailBatch {
        MailBatch::new(domain, vec![PathBuf::from("a.json")])
    }

    #[tokio::test]
    async fn test_capacity_tracks_in_flight_batches() {
        let (tx, rx) = channel(2);
        assert_eq!(tx.remaining_capacity(), 2);

        tx.try_dispatch(batch("a.com")).unwrap();
        assert_eq!(tx.remaining_capacity(), 1);

        tx.try_dispatch(batch("b.com")).unwrap();
        assert_eq!(tx.remaining_capacity(), 0);

        let item = recv_next(&rx).await.unwrap().unwrap();
        assert_eq!(item.domain, "a.com");
        assert_eq!(tx.remaining_capacity(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_returns_batch() {
        let (tx, _rx) = channel(1);
        tx.try_dispatch(batch("a.com")).unwrap();
        match tx.try_dispatch(batch("b.com")) {
            Err(TryDispatchError::Full(b)) => assert_eq!(b.domain, "b.com"),
            other => panic!("expected Full, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_closed_queue_returns_batch() {
        let (tx, rx) = channel(1);
        drop(rx);
        match tx.try_dispatch(batch("a.com")) {
            Err(TryDispatchError::Closed(b)) => assert_eq!(b.domain, "a.com"),
            other => panic!("expected Closed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_stop_delivers_sentinel() {
        let (tx, rx) = channel(1);
        assert!(tx.send_stop(Duration::from_millis(100)).await);
        let item = recv_next(&rx).await.unwrap();
        assert!(item.is_none(), "expected a shutdown sentinel");
    }

    #[tokio::test]
    async fn test_send_stop_times_out_when_full() {
        let (tx, _rx) = channel(1);
        tx.try_dispatch(batch("a.com")).unwrap();
        assert!(!tx.send_stop(Duration::from_millis(50)).await);
    }
}
