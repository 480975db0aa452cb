//! Relay Configuration Settings
//!
//! Configuration types for the price relay, loaded from environment variables.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use crate::domain::instrument::{InstrumentCode, InstrumentRegistry};
use crate::domain::store::RetentionPolicy;
use crate::infrastructure::broadcast::DEFAULT_POOL_CAPACITY;
use crate::infrastructure::fanout::DEFAULT_CAPACITY;
use crate::infrastructure::supervisor::{StreamingMode, SupervisorConfig};
use crate::infrastructure::upstream::{ConnectorConfig, DEFAULT_UPSTREAM_URL, ReconnectConfig};

/// Reconnect delay schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectStrategy {
    /// Same delay before every attempt, forever.
    #[default]
    Fixed,
    /// Doubling delay with jitter, capped, optionally limited in attempts.
    Exponential,
}

impl ReconnectStrategy {
    /// Parse strategy from string. Unknown values fall back to fixed.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "exponential" => Self::Exponential,
            _ => Self::Fixed,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parse format from string. Unknown values fall back to text.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Accepted downstream API keys.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKeys(HashSet<String>);

impl ApiKeys {
    /// Build from individual keys. Blank entries are dropped.
    #[must_use]
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            keys.into_iter()
                .map(|k| k.as_ref().trim().to_string())
                .filter(|k| !k.is_empty())
                .collect(),
        )
    }

    /// Parse a comma-separated list.
    #[must_use]
    pub fn parse(list: &str) -> Self {
        Self::new(list.split(','))
    }

    /// Whether `key` is accepted.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains(key)
    }

    /// Number of accepted keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no key is accepted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeys")
            .field("count", &self.0.len())
            .field("keys", &"[REDACTED]")
            .finish()
    }
}

/// Downstream access settings.
#[derive(Debug, Clone)]
pub struct AccessSettings {
    /// Accepted API keys.
    pub api_keys: ApiKeys,
    /// Per-key call ceiling; `None` is unlimited.
    pub daily_call_limit: Option<u64>,
}

/// Upstream connection settings.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// WebSocket URL of the price streamer.
    pub url: String,
    /// Reconnect delay schedule.
    pub strategy: ReconnectStrategy,
    /// Fixed delay, or initial delay for exponential backoff.
    pub reconnect_delay: Duration,
    /// Exponential backoff cap.
    pub reconnect_delay_max: Duration,
    /// Maximum reconnect attempts (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Read timeout (zero = none).
    pub idle_timeout: Duration,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_UPSTREAM_URL.to_string(),
            strategy: ReconnectStrategy::Fixed,
            reconnect_delay: Duration::from_millis(1000),
            reconnect_delay_max: Duration::from_secs(64),
            max_reconnect_attempts: 0,
            idle_timeout: Duration::ZERO,
        }
    }
}

impl UpstreamSettings {
    /// Reconnect schedule for these settings.
    #[must_use]
    pub const fn reconnect_config(&self) -> ReconnectConfig {
        match self.strategy {
            ReconnectStrategy::Fixed => ReconnectConfig::fixed(self.reconnect_delay),
            ReconnectStrategy::Exponential => ReconnectConfig::exponential(
                self.reconnect_delay,
                self.reconnect_delay_max,
                self.max_reconnect_attempts,
            ),
        }
    }

    /// Connector template for these settings.
    #[must_use]
    pub fn connector_config(&self) -> ConnectorConfig {
        let idle_timeout = (!self.idle_timeout.is_zero()).then_some(self.idle_timeout);
        ConnectorConfig::new(self.url.clone())
            .with_reconnect(self.reconnect_config())
            .with_idle_timeout(idle_timeout)
    }
}

/// Streaming and storage settings.
#[derive(Debug, Clone)]
pub struct StreamingSettings {
    /// Bounded fan-out queue size per connector.
    pub fanout_capacity: usize,
    /// Ticks retained per instrument (0 = unbounded).
    pub history_max_ticks: usize,
    /// Live client feeding strategy.
    pub mode: StreamingMode,
    /// Tick hub capacity per instrument.
    pub pool_capacity: usize,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            fanout_capacity: DEFAULT_CAPACITY,
            history_max_ticks: RetentionPolicy::DEFAULT_MAX_TICKS,
            mode: StreamingMode::Dedicated,
            pool_capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// HTTP/WebSocket listener port.
    pub http_port: u16,
    /// Downstream access settings.
    pub access: AccessSettings,
    /// Upstream connection settings.
    pub upstream: UpstreamSettings,
    /// Streaming and storage settings.
    pub streaming: StreamingSettings,
    /// Instruments to monitor; `None` monitors every built-in pair.
    pub instruments: Option<Vec<InstrumentCode>>,
    /// Log output format.
    pub log_format: LogFormat,
}

/// Default HTTP listener port.
pub const DEFAULT_HTTP_PORT: u16 = 8080;

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or a
    /// listed instrument is unknown.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Same as [`RelayConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw_keys = lookup("RELAY_API_KEYS")
            .ok_or_else(|| ConfigError::MissingEnvVar("RELAY_API_KEYS".to_string()))?;
        let api_keys = ApiKeys::parse(&raw_keys);
        if api_keys.is_empty() {
            return Err(ConfigError::EmptyValue("RELAY_API_KEYS".to_string()));
        }

        let access = AccessSettings {
            api_keys,
            daily_call_limit: lookup("RELAY_DAILY_CALL_LIMIT")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|limit| *limit > 0),
        };

        let defaults = UpstreamSettings::default();
        let upstream = UpstreamSettings {
            url: lookup("RELAY_UPSTREAM_URL")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.url),
            strategy: lookup("RELAY_RECONNECT_STRATEGY")
                .map(|s| ReconnectStrategy::from_str_case_insensitive(&s))
                .unwrap_or_default(),
            reconnect_delay: parse_duration_millis(
                &lookup,
                "RELAY_RECONNECT_DELAY_MS",
                defaults.reconnect_delay,
            ),
            reconnect_delay_max: parse_duration_secs(
                &lookup,
                "RELAY_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect_delay_max,
            ),
            max_reconnect_attempts: parse_or(
                &lookup,
                "RELAY_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            idle_timeout: parse_duration_secs(
                &lookup,
                "RELAY_IDLE_TIMEOUT_SECS",
                defaults.idle_timeout,
            ),
        };

        let defaults = StreamingSettings::default();
        let streaming = StreamingSettings {
            fanout_capacity: parse_or(&lookup, "RELAY_FANOUT_CAPACITY", defaults.fanout_capacity),
            history_max_ticks: parse_or(
                &lookup,
                "RELAY_HISTORY_MAX_TICKS",
                defaults.history_max_ticks,
            ),
            mode: match lookup("RELAY_STREAMING_MODE") {
                Some(raw) => raw
                    .trim()
                    .parse::<StreamingMode>()
                    .map_err(|_| ConfigError::InvalidValue("RELAY_STREAMING_MODE".to_string(), raw))?,
                None => defaults.mode,
            },
            pool_capacity: parse_or(&lookup, "RELAY_POOL_CAPACITY", defaults.pool_capacity),
        };

        let instruments = match lookup("RELAY_INSTRUMENTS") {
            Some(raw) if !raw.trim().is_empty() => Some(parse_instruments(&raw)?),
            _ => None,
        };

        Ok(Self {
            http_port: parse_or(&lookup, "RELAY_HTTP_PORT", DEFAULT_HTTP_PORT),
            access,
            upstream,
            streaming,
            instruments,
            log_format: lookup("RELAY_LOG_FORMAT")
                .map(|s| LogFormat::from_str_case_insensitive(&s))
                .unwrap_or_default(),
        })
    }

    /// Instrument registry used to validate requests.
    ///
    /// Always the full built-in set; `RELAY_INSTRUMENTS` only narrows which
    /// pairs get a monitor.
    #[must_use]
    pub fn registry(&self) -> InstrumentRegistry {
        InstrumentRegistry::builtin()
    }

    /// Store retention policy.
    #[must_use]
    pub const fn retention(&self) -> RetentionPolicy {
        RetentionPolicy::bounded(self.streaming.history_max_ticks)
    }

    /// Supervisor configuration.
    #[must_use]
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            connector: self.upstream.connector_config(),
            fanout_capacity: self.streaming.fanout_capacity,
            mode: self.streaming.mode,
            pool_capacity: self.streaming.pool_capacity,
            monitored: self.instruments.clone(),
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be interpreted.
    #[error("environment variable {0} has invalid value: {1}")]
    InvalidValue(String, String),
    /// Listed instrument is not in the built-in registry.
    #[error("unknown instrument in RELAY_INSTRUMENTS: {0}")]
    UnknownInstrument(String),
}

fn parse_instruments(raw: &str) -> Result<Vec<InstrumentCode>, ConfigError> {
    let builtin = InstrumentRegistry::builtin();
    raw.split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(|code| {
            builtin
                .lookup(code)
                .map(|(code, _)| code.clone())
                .ok_or_else(|| ConfigError::UnknownInstrument(code.to_string()))
        })
        .collect()
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_duration_secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<RelayConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        RelayConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn api_keys_are_required() {
        assert!(matches!(load(&[]), Err(ConfigError::MissingEnvVar(_))));
        assert!(matches!(
            load(&[("RELAY_API_KEYS", " , ")]),
            Err(ConfigError::EmptyValue(_))
        ));
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("RELAY_API_KEYS", "k1,k2")]).unwrap();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.access.api_keys.len(), 2);
        assert_eq!(config.access.daily_call_limit, None);
        assert_eq!(config.upstream.url, DEFAULT_UPSTREAM_URL);
        assert_eq!(config.upstream.strategy, ReconnectStrategy::Fixed);
        assert_eq!(config.upstream.reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.streaming.fanout_capacity, 10);
        assert_eq!(config.streaming.history_max_ticks, 100_000);
        assert_eq!(config.streaming.mode, StreamingMode::Dedicated);
        assert_eq!(config.streaming.pool_capacity, 1024);
        assert!(config.instruments.is_none());
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.registry().len(), InstrumentRegistry::builtin().len());
    }

    #[test]
    fn fixed_strategy_builds_fixed_schedule() {
        let config = load(&[("RELAY_API_KEYS", "k"), ("RELAY_RECONNECT_DELAY_MS", "250")]).unwrap();
        let connector = config.supervisor_config().connector;
        assert_eq!(connector.reconnect, ReconnectConfig::fixed(Duration::from_millis(250)));
        assert_eq!(connector.idle_timeout, None);
    }

    #[test]
    fn exponential_strategy_builds_capped_schedule() {
        let config = load(&[
            ("RELAY_API_KEYS", "k"),
            ("RELAY_RECONNECT_STRATEGY", "Exponential"),
            ("RELAY_RECONNECT_DELAY_MS", "500"),
            ("RELAY_RECONNECT_DELAY_MAX_SECS", "30"),
            ("RELAY_MAX_RECONNECT_ATTEMPTS", "5"),
            ("RELAY_IDLE_TIMEOUT_SECS", "20"),
        ])
        .unwrap();
        let connector = config.upstream.connector_config();
        assert_eq!(
            connector.reconnect,
            ReconnectConfig::exponential(Duration::from_millis(500), Duration::from_secs(30), 5)
        );
        assert_eq!(connector.idle_timeout, Some(Duration::from_secs(20)));
    }

    #[test]
    fn streaming_mode_must_be_known() {
        let config = load(&[("RELAY_API_KEYS", "k"), ("RELAY_STREAMING_MODE", "POOLED")]).unwrap();
        assert_eq!(config.streaming.mode, StreamingMode::Pooled);

        assert!(matches!(
            load(&[("RELAY_API_KEYS", "k"), ("RELAY_STREAMING_MODE", "shared")]),
            Err(ConfigError::InvalidValue(..))
        ));
    }

    #[test]
    fn instrument_subset_narrows_monitoring_only() {
        let config = load(&[
            ("RELAY_API_KEYS", "k"),
            ("RELAY_INSTRUMENTS", "EUR/USD, BTC/USD"),
        ])
        .unwrap();
        let registry = config.registry();
        assert_eq!(registry.len(), InstrumentRegistry::builtin().len());
        assert!(registry.contains(&"USD/JPY".into()));
        assert_eq!(
            config.supervisor_config().monitored,
            Some(vec!["EUR/USD".into(), "BTC/USD".into()])
        );
        assert_eq!(load(&[("RELAY_API_KEYS", "k")]).unwrap().supervisor_config().monitored, None);

        assert!(matches!(
            load(&[("RELAY_API_KEYS", "k"), ("RELAY_INSTRUMENTS", "XYZ/ABC")]),
            Err(ConfigError::UnknownInstrument(code)) if code == "XYZ/ABC"
        ));
    }

    #[tokio::test]
    async fn unmonitored_builtin_pair_streams_live() {
        use std::sync::Arc;

        use tokio_util::sync::CancellationToken;

        use crate::domain::store::TickStore;
        use crate::infrastructure::supervisor::Supervisor;

        let config = load(&[
            ("RELAY_API_KEYS", "k"),
            ("RELAY_INSTRUMENTS", "EUR/USD"),
            ("RELAY_UPSTREAM_URL", "ws://127.0.0.1:9"),
        ])
        .unwrap();
        let supervisor = Supervisor::new(
            Arc::new(config.registry()),
            Arc::new(TickStore::new(config.retention())),
            config.supervisor_config(),
            CancellationToken::new(),
        );

        let feed = supervisor.open_live_stream(&"BTC/USD".into()).unwrap();
        assert_eq!(feed.instrument().as_str(), "BTC/USD");
        assert!(!supervisor.monitors_instrument(&"BTC/USD".into()));
        assert!(supervisor.monitors_instrument(&"EUR/USD".into()));
        drop(feed);
        supervisor.shutdown().await;
    }

    #[test]
    fn zero_history_means_unbounded() {
        let config = load(&[("RELAY_API_KEYS", "k"), ("RELAY_HISTORY_MAX_TICKS", "0")]).unwrap();
        assert_eq!(config.retention(), RetentionPolicy::unbounded());
    }

    #[test]
    fn unparsable_numbers_fall_back() {
        let config = load(&[
            ("RELAY_API_KEYS", "k"),
            ("RELAY_HTTP_PORT", "not-a-port"),
            ("RELAY_DAILY_CALL_LIMIT", "0"),
        ])
        .unwrap();
        assert_eq!(config.http_port, DEFAULT_HTTP_PORT);
        assert_eq!(config.access.daily_call_limit, None);
    }

    #[test]
    fn api_keys_redacted_debug() {
        let keys = ApiKeys::parse("secret-one,secret-two");
        let debug = format!("{keys:?}");
        assert!(!debug.contains("secret-one"));
        assert!(debug.contains("[REDACTED]"));
        assert!(keys.contains("secret-two"));
        assert!(!keys.contains("secret"));
    }

    #[test]
    fn log_format_parsing() {
        assert_eq!(LogFormat::from_str_case_insensitive("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::from_str_case_insensitive("pretty"), LogFormat::Text);
    }
}
