//! Feed Adapters
//!
//! Implementations of the feed ports:
//!
//! - [`MockFeed`]: manually driven, with failure injection and a call log
//! - [`SimulatedFeed`]: random-walk generators for running without a broker
//!
//! Both write into the in-memory [`QuoteCell`] and [`TickList`] handles.

mod memory;
mod mock;
mod simulated;

pub use memory::{QuoteCell, TickList};
pub use mock::{FeedCall, MockFeed};
pub use simulated::{SimulatedFeed, SimulationConfig};
