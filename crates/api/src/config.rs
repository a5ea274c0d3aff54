//! Application configuration loaded from environment variables.

use std::time::Duration;

use event_bus::{ConsumerConfig, InitialOffset};
use saga::{Channel, parse_channels};

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Server, bus and notification settings.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `json` for JSON lines, anything else for human-readable output
/// - `DATABASE_URL`: PostgreSQL for the event log and payments; in-memory when unset
/// - `EVENT_STREAM`: stream name (default `order-events`)
/// - `STREAM_PARTITIONS`: partitions for a newly created stream (default 4)
/// - `CONSUMER_WORKERS`, `CONSUMER_BATCH_SIZE`, `CONSUMER_POLL_MS`,
///   `CONSUMER_RETRY_BACKOFF_SECS`, `CONSUMER_INITIAL_OFFSET` (`earliest` or `latest`)
/// - `DEAD_LETTER`: republish malformed and failed records to `<stream>.dlq`
/// - `IDENTITY_URL`, `IDENTITY_TIMEOUT_MS`: user service lookups
/// - `NOTIFY_CHANNELS`: comma-separated list of `email`, `sms`, `push`
/// - `NOTIFY_SEND_TIMEOUT_MS`: per-channel send timeout
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub event_stream: String,
    pub stream_partitions: u32,
    pub consumer_workers: usize,
    pub consumer_batch_size: usize,
    pub consumer_poll_interval: Duration,
    pub consumer_retry_backoff: Duration,
    pub consumer_initial_offset: InitialOffset,
    pub dead_letter: bool,
    pub identity_url: String,
    pub identity_timeout: Duration,
    pub notify_channels: Vec<Channel>,
    pub notify_send_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary variable source. Unparseable
    /// values fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref().map(str::trim) {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            event_stream: lookup("EVENT_STREAM")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.event_stream),
            stream_partitions: parsed("STREAM_PARTITIONS")
                .and_then(|n| u32::try_from(n).ok())
                .filter(|&n| n > 0)
                .unwrap_or(defaults.stream_partitions),
            consumer_workers: parsed("CONSUMER_WORKERS")
                .map(|n| n as usize)
                .filter(|&n| n > 0)
                .unwrap_or(defaults.consumer_workers),
            consumer_batch_size: parsed("CONSUMER_BATCH_SIZE")
                .map(|n| n as usize)
                .filter(|&n| n > 0)
                .unwrap_or(defaults.consumer_batch_size),
            consumer_poll_interval: parsed("CONSUMER_POLL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.consumer_poll_interval),
            consumer_retry_backoff: parsed("CONSUMER_RETRY_BACKOFF_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.consumer_retry_backoff),
            consumer_initial_offset: lookup("CONSUMER_INITIAL_OFFSET")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.consumer_initial_offset),
            dead_letter: lookup("DEAD_LETTER")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.dead_letter),
            identity_url: lookup("IDENTITY_URL").unwrap_or(defaults.identity_url),
            identity_timeout: parsed("IDENTITY_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.identity_timeout),
            notify_channels: lookup("NOTIFY_CHANNELS")
                .and_then(|v| parse_channels(&v).ok())
                .filter(|channels| !channels.is_empty())
                .unwrap_or(defaults.notify_channels),
            notify_send_timeout: parsed("NOTIFY_SEND_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.notify_send_timeout),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Consumer settings for one service's group on the event stream.
    pub fn consumer(&self, group: &str) -> ConsumerConfig {
        ConsumerConfig::new(group, self.event_stream.as_str())
            .with_partitions(self.stream_partitions)
            .with_workers(self.consumer_workers)
            .with_batch_size(self.consumer_batch_size)
            .with_poll_interval(self.consumer_poll_interval)
            .with_retry_backoff(self.consumer_retry_backoff)
            .with_initial_offset(self.consumer_initial_offset)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            event_stream: "order-events".to_string(),
            stream_partitions: 4,
            consumer_workers: 1,
            consumer_batch_size: 100,
            consumer_poll_interval: Duration::from_millis(100),
            consumer_retry_backoff: Duration::from_secs(5),
            consumer_initial_offset: InitialOffset::Earliest,
            dead_letter: false,
            identity_url: "http://localhost:8081".to_string(),
            identity_timeout: Duration::from_secs(5),
            notify_channels: vec![Channel::Email, Channel::Sms],
            notify_send_timeout: Duration::from_secs(5),
        }
    }
}
