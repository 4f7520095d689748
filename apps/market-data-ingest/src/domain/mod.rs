//! Domain Layer - Core market data types.
//!
//! This layer contains the event model, the change filter and the
//! identifiers used to key subscriptions. Types here have no runtime
//! dependencies beyond serialization, time and decimal arithmetic.

/// Change filter suppressing redundant snapshots.
pub mod filter;

/// Symbols and contracts.
pub mod instrument;

/// Market data event model (quotes, ticks, depth, bars, fundamentals).
pub mod streaming;

/// Subscription keys and stream kinds.
pub mod subscription;
