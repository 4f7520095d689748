//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services, the stream monitors and
//! the port interfaces that define how the domain interacts with the
//! upstream feed and downstream storage.

/// Port interfaces for external systems (feed, storage sink).
pub mod ports;

/// Per-subscription stream monitors.
pub mod monitors;

/// Application services: orchestrator, registry and queue drain.
pub mod services;
