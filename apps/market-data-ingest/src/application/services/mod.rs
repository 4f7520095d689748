//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - [`MarketDataAdapter`]: connection lifecycle, contracts, subscriptions
//!   and request/response calls
//! - [`SubscriptionRegistry`]: one entry per (symbol, stream kind)
//! - [`QueueDrain`]: moves queued events to a storage sink in batches

mod adapter;
mod drain;
mod registry;

pub use adapter::{
    AdapterSettings, AdapterStatus, ConnectionError, FUNDAMENTAL_RATIOS_REPORT, IngestError,
    MarketDataAdapter, StatusSnapshot,
};
pub use drain::{DrainStats, QueueDrain};
pub use registry::{Subscription, SubscriptionInfo, SubscriptionRegistry, TeardownReport};
