//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `FeedConnector` / `FeedSession`: the upstream broker feed
//! - `MarketDataSink`: the downstream storage collaborator

mod feed_port;
mod sink_port;

pub use feed_port::{
    ConnectionParams, DepthBook, DepthFeed, FeedConnector, FeedError, FeedHandle, FeedSession,
    HistoricalRequest, QuoteSource, RawBar, RawLevel, RawQuote, RawTick, TickSource, TickWindow,
};
pub use sink_port::{MarketDataSink, SinkError};
