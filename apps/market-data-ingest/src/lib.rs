#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )
)]

//! Market Data Ingest - Broker Feed Normalizer
//!
//! Maintains one upstream broker connection, runs one monitor task per
//! (symbol, stream kind) subscription and multiplexes normalized market
//! data events into a single bounded queue drained by the storage layer.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Event model and pure logic
//!   - `streaming`: Quote snapshots, trade ticks, depth levels, bars, reports
//!   - `filter`: Change filter suppressing repeated snapshots
//!   - `instrument`: Symbols and contracts
//!   - `subscription`: Registry keys and stream parameters
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Upstream feed capability, downstream storage sink
//!   - `monitors`: Poll-based quote, incremental tick list, push-driven depth
//!   - `services`: Orchestrator, subscription registry, queue drain
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `queue`: Bounded output queue with blocking backpressure
//!   - `feed`: Mock and simulated feeds
//!   - `sink`: Log, JSON-lines and in-memory sinks
//!   - `config`, `reconnect`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!                 ┌──────────────┐
//! quote state ───►│ QuoteMonitor │──┐
//!                 └──────────────┘  │
//!                 ┌──────────────┐  │   ┌──────────────┐   ┌────────────┐
//! tick list ─────►│ TickMonitor  │──┼──►│ Output Queue │──►│ QueueDrain │──► sink
//!                 └──────────────┘  │   └──────────────┘   └────────────┘
//!                 ┌──────────────┐  │          ▲
//! depth pushes ──►│ DepthMonitor │──┘          │
//!                 └──────────────┘    historical / fundamentals
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Event model with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::filter::ChangeFilter;
pub use domain::instrument::{Contract, ContractSpec, Symbol};
pub use domain::streaming::{
    BookSide, DepthLevel, DepthOperation, EventError, FundamentalReport, HistoricalBar,
    HistoricalBarBatch, MarketDataEvent, QuoteSnapshot, TickKind, TradeTick,
};
pub use domain::subscription::{DepthMode, StreamKind, StreamParams, SubscriptionKey};

// Ports
pub use application::ports::{
    ConnectionParams, FeedConnector, FeedError, FeedSession, HistoricalRequest, MarketDataSink,
    SinkError,
};

// Services
pub use application::services::{
    AdapterSettings, AdapterStatus, ConnectionError, DrainStats, IngestError, MarketDataAdapter,
    QueueDrain, SubscriptionInfo, TeardownReport,
};

// Queue
pub use infrastructure::queue::{OutputQueue, QueueClosed};

// Infrastructure config
pub use infrastructure::config::{ConfigError, IngestConfig};

// Feeds and sinks
pub use infrastructure::feed::{MockFeed, SimulatedFeed, SimulationConfig};
pub use infrastructure::sink::{JsonLinesSink, LogSink, MemorySink};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{
    TelemetryConfig, TelemetryError, TelemetryGuard, init as init_telemetry,
};
