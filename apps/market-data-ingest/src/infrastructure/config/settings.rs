//! Ingestion Configuration Settings
//!
//! Configuration types for the ingestion service, loaded from environment
//! variables. Every value has a default; unparsable values silently fall
//! back to it. Only values that leave the service with nothing to do, or
//! name a feed connector the binary does not have, are rejected.

use std::path::PathBuf;
use std::time::Duration;

use crate::application::ports::ConnectionParams;
use crate::domain::instrument::{DEFAULT_CURRENCY, DEFAULT_EXCHANGE, Symbol, normalize_symbol};
use crate::domain::streaming::TickKind;
use crate::infrastructure::queue::DEFAULT_QUEUE_CAPACITY;

/// Feed connector the binary runs against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FeedKind {
    /// In-process random-walk feed. Endpoint settings are passed to it on
    /// connect and only logged.
    #[default]
    Simulated,
}

impl FeedKind {
    /// Parse a connector name, ignoring case.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "simulated" | "sim" => Some(Self::Simulated),
            _ => None,
        }
    }

    /// Name used in logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Simulated => "simulated",
        }
    }
}

impl std::fmt::Display for FeedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream feed connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSettings {
    /// Connector selected by `INGEST_FEED`.
    pub kind: FeedKind,
    /// Feed host.
    pub host: String,
    /// Feed port.
    pub port: u16,
    /// Client id presented to the feed.
    pub client_id: i32,
    /// Connect timeout.
    pub connect_timeout: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            kind: FeedKind::default(),
            host: "127.0.0.1".to_string(),
            port: 7497,
            client_id: 1,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl FeedSettings {
    /// Connection parameters for the feed connector.
    #[must_use]
    pub fn connection_params(&self) -> ConnectionParams {
        ConnectionParams {
            host: self.host.clone(),
            port: self.port,
            client_id: self.client_id,
            timeout: self.connect_timeout,
        }
    }
}

/// What to subscribe to at startup and how often monitors poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    /// Normalized symbols to ingest.
    pub symbols: Vec<Symbol>,
    /// Contract exchange.
    pub exchange: String,
    /// Contract currency.
    pub currency: String,
    /// Tick-by-tick stream kind.
    pub tick_kind: TickKind,
    /// Standard depth rows per side.
    pub depth_rows: usize,
    /// Subscribe smart depth instead of standard depth.
    pub smart_depth: bool,
    /// Smart depth rows per side.
    pub smart_depth_rows: usize,
    /// Quote sampling interval.
    pub quote_interval: Duration,
    /// Tick list poll interval.
    pub tick_interval: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            symbols: vec!["AAPL".to_string(), "MSFT".to_string()],
            exchange: DEFAULT_EXCHANGE.to_string(),
            currency: DEFAULT_CURRENCY.to_string(),
            tick_kind: TickKind::Last,
            depth_rows: 5,
            smart_depth: false,
            smart_depth_rows: 10,
            quote_interval: Duration::from_millis(100),
            tick_interval: Duration::from_millis(10),
        }
    }
}

/// One-shot requests issued at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSettings {
    /// Historical lookback duration.
    pub history_duration: String,
    /// Historical bar size.
    pub history_bar_size: String,
    /// Fundamental report kind.
    pub fundamental_report: String,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            history_duration: "1 D".to_string(),
            history_bar_size: "1 min".to_string(),
            fundamental_report: "ReportSnapshot".to_string(),
        }
    }
}

/// Output queue and downstream drain settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainSettings {
    /// Output queue capacity.
    pub queue_capacity: usize,
    /// Maximum events per sink batch.
    pub batch_size: usize,
    /// Maximum time a partial batch waits before being written.
    pub flush_interval: Duration,
    /// JSON-lines sink file; the log sink is used when unset.
    pub sink_path: Option<PathBuf>,
}

impl Default for DrainSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            batch_size: 5_000,
            flush_interval: Duration::from_secs(2),
            sink_path: None,
        }
    }
}

/// Connect retry settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectSettings {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Total attempts (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 0,
        }
    }
}

/// Complete ingestion service configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestConfig {
    /// Upstream connection.
    pub feed: FeedSettings,
    /// Startup subscriptions and poll intervals.
    pub streams: StreamSettings,
    /// Startup requests.
    pub requests: RequestSettings,
    /// Queue and drain.
    pub drain: DrainSettings,
    /// Connect retry.
    pub reconnect: ReconnectSettings,
    /// Health/metrics HTTP port.
    pub health_port: u16,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            feed: FeedSettings::default(),
            streams: StreamSettings::default(),
            requests: RequestSettings::default(),
            drain: DrainSettings::default(),
            reconnect: ReconnectSettings::default(),
            health_port: 8083,
        }
    }
}

impl IngestConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the symbol list is empty or invalid, a size that
    /// must be positive is zero, or `INGEST_FEED` names an unknown connector.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`IngestConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = Self::default();

        let kind = match env.get("INGEST_FEED").filter(|v| !v.trim().is_empty()) {
            None => defaults.feed.kind,
            Some(raw) => FeedKind::from_str_case_insensitive(&raw).ok_or_else(|| {
                ConfigError::InvalidValue {
                    key: "INGEST_FEED",
                    reason: format!("unknown feed connector {:?}", raw.trim()),
                }
            })?,
        };
        let feed = FeedSettings {
            kind,
            host: env.string("INGEST_FEED_HOST", &defaults.feed.host),
            port: env.parse("INGEST_FEED_PORT", defaults.feed.port),
            client_id: env.parse("INGEST_CLIENT_ID", defaults.feed.client_id),
            connect_timeout: env.duration_secs(
                "INGEST_CONNECT_TIMEOUT_SECS",
                defaults.feed.connect_timeout,
            ),
        };

        let symbols = parse_symbols(&env.string("INGEST_SYMBOLS", "AAPL,MSFT"))?;
        let streams = StreamSettings {
            symbols,
            exchange: env.string("INGEST_EXCHANGE", &defaults.streams.exchange),
            currency: env.string("INGEST_CURRENCY", &defaults.streams.currency),
            tick_kind: env
                .get("INGEST_TICK_KIND")
                .and_then(|s| TickKind::from_str_case_insensitive(&s))
                .unwrap_or(defaults.streams.tick_kind),
            depth_rows: env.parse("INGEST_DEPTH_ROWS", defaults.streams.depth_rows),
            smart_depth: env.flag("INGEST_SMART_DEPTH", defaults.streams.smart_depth),
            smart_depth_rows: env.parse(
                "INGEST_SMART_DEPTH_ROWS",
                defaults.streams.smart_depth_rows,
            ),
            quote_interval: env.duration_millis(
                "INGEST_QUOTE_POLL_MS",
                defaults.streams.quote_interval,
            ),
            tick_interval: env.duration_millis(
                "INGEST_TICK_POLL_MS",
                defaults.streams.tick_interval,
            ),
        };

        let requests = RequestSettings {
            history_duration: env.string(
                "INGEST_HISTORY_DURATION",
                &defaults.requests.history_duration,
            ),
            history_bar_size: env.string(
                "INGEST_HISTORY_BAR_SIZE",
                &defaults.requests.history_bar_size,
            ),
            fundamental_report: env.string(
                "INGEST_FUNDAMENTAL_REPORT",
                &defaults.requests.fundamental_report,
            ),
        };

        let drain = DrainSettings {
            queue_capacity: env.parse("INGEST_QUEUE_CAPACITY", defaults.drain.queue_capacity),
            batch_size: env.parse("INGEST_DRAIN_BATCH_SIZE", defaults.drain.batch_size),
            flush_interval: env.duration_millis(
                "INGEST_DRAIN_FLUSH_MS",
                defaults.drain.flush_interval,
            ),
            sink_path: env
                .get("INGEST_SINK_PATH")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
        };

        if drain.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "INGEST_QUEUE_CAPACITY",
                reason: "must be greater than zero".to_string(),
            });
        }
        if drain.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "INGEST_DRAIN_BATCH_SIZE",
                reason: "must be greater than zero".to_string(),
            });
        }

        let reconnect = ReconnectSettings {
            initial_delay: env.duration_millis(
                "INGEST_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect.initial_delay,
            ),
            max_delay: env.duration_secs(
                "INGEST_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect.max_delay,
            ),
            multiplier: env.parse(
                "INGEST_RECONNECT_DELAY_MULTIPLIER",
                defaults.reconnect.multiplier,
            ),
            max_attempts: env.parse(
                "INGEST_MAX_CONNECT_ATTEMPTS",
                defaults.reconnect.max_attempts,
            ),
        };

        Ok(Self {
            feed,
            streams,
            requests,
            drain,
            reconnect,
            health_port: env.parse("INGEST_HEALTH_PORT", defaults.health_port),
        })
    }
}

/// Configuration error.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has an empty value where one is required.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(&'static str),
    /// Environment variable holds a value the service cannot run with.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

fn parse_symbols(raw: &str) -> Result<Vec<Symbol>, ConfigError> {
    let mut symbols = Vec::new();
    for part in raw.split(',').filter(|s| !s.trim().is_empty()) {
        let symbol = normalize_symbol(part).map_err(|e| ConfigError::InvalidValue {
            key: "INGEST_SYMBOLS",
            reason: e.to_string(),
        })?;
        if !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }
    if symbols.is_empty() {
        return Err(ConfigError::EmptyValue("INGEST_SYMBOLS"));
    }
    Ok(symbols)
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .map_or(default, |v| match v.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => default,
            })
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<IngestConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        IngestConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, IngestConfig::default());
        assert_eq!(config.drain.queue_capacity, 10_000);
        assert_eq!(config.drain.batch_size, 5_000);
        assert_eq!(config.drain.flush_interval, Duration::from_secs(2));
        assert_eq!(config.streams.quote_interval, Duration::from_millis(100));
        assert_eq!(config.streams.tick_interval, Duration::from_millis(10));
        assert_eq!(config.health_port, 8083);
    }

    #[test]
    fn values_are_read_and_normalized() {
        let config = config_from(&[
            ("INGEST_FEED_HOST", "gateway.local"),
            ("INGEST_FEED_PORT", "4002"),
            ("INGEST_SYMBOLS", " pltr, nvda ,PLTR,, "),
            ("INGEST_TICK_KIND", "BidAsk"),
            ("INGEST_SMART_DEPTH", "yes"),
            ("INGEST_QUEUE_CAPACITY", "64"),
            ("INGEST_SINK_PATH", "/tmp/ingest.jsonl"),
        ])
        .unwrap();

        assert_eq!(config.feed.host, "gateway.local");
        assert_eq!(config.feed.connection_params().port, 4002);
        assert_eq!(config.streams.symbols, vec!["PLTR", "NVDA"]);
        assert_eq!(config.streams.tick_kind, TickKind::Last);
        assert!(config.streams.smart_depth);
        assert_eq!(config.drain.queue_capacity, 64);
        assert_eq!(
            config.drain.sink_path,
            Some(PathBuf::from("/tmp/ingest.jsonl"))
        );
    }

    #[test]
    fn unparsable_values_fall_back_to_defaults() {
        let config = config_from(&[
            ("INGEST_FEED_PORT", "not-a-port"),
            ("INGEST_QUOTE_POLL_MS", "-5"),
            ("INGEST_SMART_DEPTH", "maybe"),
        ])
        .unwrap();
        assert_eq!(config.feed.port, 7497);
        assert_eq!(config.streams.quote_interval, Duration::from_millis(100));
        assert!(!config.streams.smart_depth);
    }

    #[test]
    fn empty_symbol_list_is_rejected() {
        assert_eq!(
            config_from(&[("INGEST_SYMBOLS", " , ,")]).unwrap_err(),
            ConfigError::EmptyValue("INGEST_SYMBOLS")
        );
    }

    #[test]
    fn overlong_symbol_is_rejected() {
        let err = config_from(&[("INGEST_SYMBOLS", "ABCDEFGHIJKLMNOPQRSTUVWXYZ")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "INGEST_SYMBOLS",
                ..
            }
        ));
    }

    #[test]
    fn feed_connector_is_selected_explicitly() {
        assert_eq!(config_from(&[]).unwrap().feed.kind, FeedKind::Simulated);
        assert_eq!(
            config_from(&[("INGEST_FEED", " Simulated ")]).unwrap().feed.kind,
            FeedKind::Simulated
        );

        let err = config_from(&[
            ("INGEST_FEED", "gateway"),
            ("INGEST_FEED_HOST", "gateway.local"),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "INGEST_FEED",
                ..
            }
        ));
    }

    #[test]
    fn zero_queue_capacity_is_rejected() {
        let err = config_from(&[("INGEST_QUEUE_CAPACITY", "0")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "INGEST_QUEUE_CAPACITY",
                ..
            }
        ));
    }
}
