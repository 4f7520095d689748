//! Sink Port (Driven Port)
//!
//! Interface to the downstream storage collaborator. Persistence,
//! partitioning and retention are the sink's concern.

use async_trait::async_trait;

use crate::domain::streaming::MarketDataEvent;

/// Errors reported by a sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// I/O failure while writing.
    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Event could not be encoded.
    #[error("sink encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Storage backend rejected the batch.
    #[error("sink rejected batch: {0}")]
    Rejected(String),
}

/// Consumer of normalized market data.
#[async_trait]
pub trait MarketDataSink: Send + Sync {
    /// Persist a batch of events in queue order.
    async fn write_batch(&self, events: &[MarketDataEvent]) -> Result<(), SinkError>;

    /// Flush buffered writes. Default is a no-op.
    async fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
