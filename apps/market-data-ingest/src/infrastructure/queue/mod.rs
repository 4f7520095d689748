//! Bounded Output Queue
//!
//! Single FIFO queue shared by every monitor and drained by downstream
//! consumers. Capacity is bounded; a put on a full queue suspends the
//! producer until a consumer takes an item, so a slow consumer throttles
//! every producer uniformly and nothing is dropped.
//!
//! FIFO order holds per producer. Interleaving across concurrent producers
//! is unspecified.
//!
//! Closing is a flag shared by the queue and every producer handle. It never
//! needs the receive side, so a consumer parked in [`OutputQueue::get`] does
//! not hold up [`OutputQueue::close`]; the parked consumer wakes, takes what
//! is still buffered and then sees `None`.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::streaming::MarketDataEvent;
use crate::infrastructure::metrics;

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// The queue was closed; no further puts are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("output queue closed")]
pub struct QueueClosed;

// =============================================================================
// Queue
// =============================================================================

/// The multiplexed output queue.
#[derive(Debug)]
pub struct OutputQueue {
    tx: mpsc::Sender<MarketDataEvent>,
    rx: Mutex<mpsc::Receiver<MarketDataEvent>>,
    closed: CancellationToken,
    capacity: usize,
}

impl OutputQueue {
    /// Create a queue holding at most `capacity` events (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            closed: CancellationToken::new(),
            capacity,
        }
    }

    /// Create a shared queue.
    #[must_use]
    pub fn shared(capacity: usize) -> Arc<Self> {
        Arc::new(Self::new(capacity))
    }

    /// Write-only handle for a producer.
    #[must_use]
    pub fn producer(&self) -> QueueProducer {
        QueueProducer {
            tx: self.tx.clone(),
            closed: self.closed.clone(),
        }
    }

    /// Put an event, suspending while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] after [`OutputQueue::close`].
    pub async fn put(&self, event: MarketDataEvent) -> Result<(), QueueClosed> {
        put_with_backpressure(&self.tx, &self.closed, event).await
    }

    /// Take the oldest event, suspending while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and fully drained.
    pub async fn get(&self) -> Option<MarketDataEvent> {
        let mut rx = self.rx.lock().await;
        let event = tokio::select! {
            biased;
            event = rx.recv() => event,
            () = self.closed.cancelled() => rx.try_recv().ok(),
        };
        drop(rx);
        metrics::set_queue_depth(self.len());
        event
    }

    /// Take the oldest event without waiting.
    ///
    /// Returns `None` when the queue is empty or another consumer currently
    /// holds the receive side.
    #[must_use]
    pub fn try_get(&self) -> Option<MarketDataEvent> {
        let event = self.rx.try_lock().ok()?.try_recv().ok();
        if event.is_some() {
            metrics::set_queue_depth(self.len());
        }
        event
    }

    /// Stop accepting puts. Events already queued can still be taken.
    ///
    /// Producers suspended on a full queue fail with [`QueueClosed`].
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether [`OutputQueue::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Number of queued events.
    #[must_use]
    pub fn len(&self) -> usize {
        queued(&self.tx)
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued events.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for OutputQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

// =============================================================================
// Producer Handle
// =============================================================================

/// Write-only handle held by monitors and request operations.
#[derive(Debug, Clone)]
pub struct QueueProducer {
    tx: mpsc::Sender<MarketDataEvent>,
    closed: CancellationToken,
}

impl QueueProducer {
    /// Put an event, suspending while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] when the queue no longer accepts events.
    pub async fn put(&self, event: MarketDataEvent) -> Result<(), QueueClosed> {
        put_with_backpressure(&self.tx, &self.closed, event).await
    }

    /// Number of queued events.
    #[must_use]
    pub fn len(&self) -> usize {
        queued(&self.tx)
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn put_with_backpressure(
    tx: &mpsc::Sender<MarketDataEvent>,
    closed: &CancellationToken,
    event: MarketDataEvent,
) -> Result<(), QueueClosed> {
    if closed.is_cancelled() {
        return Err(QueueClosed);
    }
    match tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(event)) => {
            let started = Instant::now();
            tokio::select! {
                biased;
                () = closed.cancelled() => return Err(QueueClosed),
                sent = tx.send(event) => sent.map_err(|_| QueueClosed)?,
            }
            metrics::record_queue_backpressure(started.elapsed());
        }
        Err(mpsc::error::TrySendError::Closed(_)) => return Err(QueueClosed),
    }
    metrics::set_queue_depth(queued(tx));
    Ok(())
}

fn queued(tx: &mpsc::Sender<MarketDataEvent>) -> usize {
    tx.max_capacity().saturating_sub(tx.capacity())
}

// =============================================================================
// Tests
// =============================================================================
