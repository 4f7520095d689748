//! Prometheus Metrics Module
//!
//! Exposes ingestion metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Events**: Normalized events emitted per stream, snapshots suppressed
//! - **Feed**: Transient read errors, capability fallbacks, cursor resets,
//!   connection state
//! - **Queue**: Depth, backpressure waits and wait time
//! - **Sink**: Batches written downstream
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! functions are safe to call before [`init_metrics`]; the `metrics` facade
//! discards samples until a recorder is installed.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::subscription::StreamKind;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Event counters
    describe_counter!(
        "market_ingest_events_emitted_total",
        "Normalized events placed on the output queue"
    );
    describe_counter!(
        "market_ingest_snapshots_suppressed_total",
        "Quote snapshots dropped by the change filter"
    );

    // Feed counters
    describe_counter!(
        "market_ingest_transient_read_errors_total",
        "Malformed or unavailable reads skipped by monitors"
    );
    describe_counter!(
        "market_ingest_capability_fallbacks_total",
        "Requests served by a fallback capability"
    );
    describe_counter!(
        "market_ingest_tick_cursor_resets_total",
        "Tick lists observed shrinking below the read cursor"
    );
    describe_counter!(
        "market_ingest_connect_attempts_total",
        "Connection attempts to the upstream feed"
    );

    // Queue
    describe_gauge!(
        "market_ingest_queue_depth",
        "Events waiting in the output queue"
    );
    describe_counter!(
        "market_ingest_queue_backpressure_total",
        "Puts that found the output queue full"
    );
    describe_histogram!(
        "market_ingest_queue_put_wait_seconds",
        "Time producers waited for queue space"
    );

    // Subscriptions and connection
    describe_gauge!(
        "market_ingest_active_subscriptions",
        "Active subscriptions by stream kind"
    );
    describe_gauge!(
        "market_ingest_feed_connected",
        "1 when the upstream session is connected"
    );

    // Sink
    describe_counter!(
        "market_ingest_sink_batches_total",
        "Batches handed to the sink by outcome"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for sink writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOutcome {
    /// Batch written.
    Written,
    /// Batch rejected or failed.
    Failed,
}

impl SinkOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Written => "written",
            Self::Failed => "failed",
        }
    }
}

/// Record events emitted by a monitor or request.
pub fn record_events_emitted(stream: &'static str, count: u64) {
    counter!(
        "market_ingest_events_emitted_total",
        "stream" => stream
    )
    .increment(count);
}

/// Record a snapshot suppressed by the change filter.
pub fn record_snapshot_suppressed() {
    counter!("market_ingest_snapshots_suppressed_total").increment(1);
}

/// Record a transient read error.
pub fn record_transient_read_error(stream: &'static str) {
    counter!(
        "market_ingest_transient_read_errors_total",
        "stream" => stream
    )
    .increment(1);
}

/// Record a capability fallback (e.g. smart depth served as standard).
pub fn record_capability_fallback(capability: &'static str) {
    counter!(
        "market_ingest_capability_fallbacks_total",
        "capability" => capability
    )
    .increment(1);
}

/// Record a tick cursor reset.
pub fn record_tick_cursor_reset() {
    counter!("market_ingest_tick_cursor_resets_total").increment(1);
}

/// Record a connection attempt.
pub fn record_connect_attempt(success: bool) {
    counter!(
        "market_ingest_connect_attempts_total",
        "outcome" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

/// Record a put that found the queue full and how long it waited.
pub fn record_queue_backpressure(waited: Duration) {
    counter!("market_ingest_queue_backpressure_total").increment(1);
    histogram!("market_ingest_queue_put_wait_seconds").record(waited.as_secs_f64());
}

/// Update the output queue depth.
#[allow(clippy::cast_precision_loss)]
pub fn set_queue_depth(depth: usize) {
    gauge!("market_ingest_queue_depth").set(depth as f64);
}

/// Update the active subscription count for one stream kind.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_subscriptions(kind: StreamKind, count: usize) {
    gauge!(
        "market_ingest_active_subscriptions",
        "stream" => kind.label()
    )
    .set(count as f64);
}

/// Update the feed connection state.
pub fn set_feed_connected(connected: bool) {
    gauge!("market_ingest_feed_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record a sink batch outcome.
pub fn record_sink_batch(outcome: SinkOutcome) {
    counter!(
        "market_ingest_sink_batches_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_outcome_as_str() {
        assert_eq!(SinkOutcome::Written.as_str(), "written");
        assert_eq!(SinkOutcome::Failed.as_str(), "failed");
    }

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        record_events_emitted("quotes", 3);
        record_snapshot_suppressed();
        record_queue_backpressure(Duration::from_millis(5));
        set_feed_connected(true);
    }
}
