//! Storage Sinks
//!
//! Implementations of [`MarketDataSink`]. The storage engine itself is an
//! external collaborator; these sinks cover local runs and tests.
//!
//! - [`LogSink`]: one structured log line per batch
//! - [`JsonLinesSink`]: one JSON object per event, appended to a file
//! - [`MemorySink`]: keeps every event in memory

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::info;

use crate::application::ports::{MarketDataSink, SinkError};
use crate::domain::streaming::MarketDataEvent;

// =============================================================================
// Log Sink
// =============================================================================

/// Logs a per-type summary of every batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl MarketDataSink for LogSink {
    async fn write_batch(&self, events: &[MarketDataEvent]) -> Result<(), SinkError> {
        let mut counts = [0usize; 5];
        for event in events {
            let slot = match event {
                MarketDataEvent::TopOfBook(_) => 0,
                MarketDataEvent::TickByTick(_) => 1,
                MarketDataEvent::MarketDepth(_) => 2,
                MarketDataEvent::HistoricalData(_) => 3,
                MarketDataEvent::FundamentalData(_) => 4,
            };
            counts[slot] += 1;
        }
        info!(
            events = events.len(),
            top_of_book = counts[0],
            tick_by_tick = counts[1],
            market_depth = counts[2],
            historical = counts[3],
            fundamentals = counts[4],
            "Batch received"
        );
        Ok(())
    }
}

// =============================================================================
// JSON Lines Sink
// =============================================================================

/// Appends events as newline-delimited JSON.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    writer: tokio::sync::Mutex<BufWriter<File>>,
}

impl JsonLinesSink {
    /// Open (or create) the file for appending.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Io`] if the file cannot be opened.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            writer: tokio::sync::Mutex::new(BufWriter::new(file)),
        })
    }

    /// File being written.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MarketDataSink for JsonLinesSink {
    async fn write_batch(&self, events: &[MarketDataEvent]) -> Result<(), SinkError> {
        let mut buffer = Vec::with_capacity(events.len() * 128);
        for event in events {
            serde_json::to_writer(&mut buffer, event)?;
            buffer.push(b'\n');
        }
        self.writer.lock().await.write_all(&buffer).await?;
        Ok(())
    }

    async fn flush(&self) -> Result<(), SinkError> {
        self.writer.lock().await.flush().await?;
        Ok(())
    }
}

// =============================================================================
// Memory Sink
// =============================================================================

/// Collects events in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    events: Arc<parking_lot::Mutex<Vec<MarketDataEvent>>>,
    batches: Arc<parking_lot::Mutex<Vec<usize>>>,
}

impl MemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event written so far.
    #[must_use]
    pub fn events(&self) -> Vec<MarketDataEvent> {
        self.events.lock().clone()
    }

    /// Size of every batch written so far.
    #[must_use]
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().clone()
    }
}

#[async_trait]
impl MarketDataSink for MemorySink {
    async fn write_batch(&self, events: &[MarketDataEvent]) -> Result<(), SinkError> {
        self.events.lock().extend_from_slice(events);
        self.batches.lock().push(events.len());
        Ok(())
    }
}
