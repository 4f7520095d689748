//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the shared output queue.

/// Upstream feed implementations (mock, simulated).
pub mod feed;

/// Storage sink implementations.
pub mod sink;

/// Bounded output queue shared by all monitors.
pub mod queue;

/// Connect retry backoff.
pub mod reconnect;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
