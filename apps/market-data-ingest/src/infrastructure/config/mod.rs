//! Configuration Module
//!
//! Configuration loading for the ingestion service.

mod settings;

pub use settings::{
    ConfigError, DrainSettings, FeedKind, FeedSettings, IngestConfig, ReconnectSettings, RequestSettings,
    StreamSettings,
};
