//! Client Configuration Settings
//!
//! Configuration for the stream client, loaded from environment variables.
//! Unset or unparsable numeric and boolean values fall back to their
//! defaults; malformed URLs and symbol ids are rejected.

use std::time::Duration;

use crate::application::services::{HeartbeatConfig, ReconnectConfig, StreamManagerConfig};
use crate::domain::subscription::StreamOptions;
use crate::infrastructure::bitkub::DEFAULT_STREAM_URL;

/// WebSocket connection settings.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Heartbeat sweep interval.
    pub heartbeat_interval: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0, // Unlimited
        }
    }
}

/// Streams the binary subscribes at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupSubscriptions {
    /// Ticker symbols.
    pub tickers: Vec<String>,
    /// Trade symbols.
    pub trades: Vec<String>,
    /// Order-book symbol ids.
    pub order_books: Vec<u32>,
}

impl StartupSubscriptions {
    /// Whether nothing is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty() && self.trades.is_empty() && self.order_books.is_empty()
    }
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Stream base URL, ending in `/`.
    pub stream_url: String,
    /// Caller options.
    pub options: StreamOptions,
    /// WebSocket connection settings.
    pub websocket: WebSocketSettings,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
    /// Streams to open at startup.
    pub subscriptions: StartupSubscriptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            stream_url: DEFAULT_STREAM_URL.to_string(),
            options: StreamOptions::default(),
            websocket: WebSocketSettings::default(),
            metrics_port: 0,
            subscriptions: StartupSubscriptions::default(),
        }
    }
}

impl ClientConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream URL or an order-book id is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream URL or an order-book id is malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);
        let defaults = Self::default();

        let stream_url = match env.get("BITKUB_WS_URL") {
            None => defaults.stream_url,
            Some(url) if url.trim().is_empty() => {
                return Err(ConfigError::EmptyValue("BITKUB_WS_URL".to_string()));
            }
            Some(url) => normalize_stream_url(url.trim())?,
        };

        let options = StreamOptions {
            reconnect: env.bool("BITKUB_RECONNECT", defaults.options.reconnect),
            verbose: env.bool("BITKUB_VERBOSE", defaults.options.verbose),
            sanitize: env.bool("BITKUB_SANITIZE", defaults.options.sanitize),
            ignore_tickers: env.bool("BITKUB_IGNORE_TICKERS", defaults.options.ignore_tickers),
            ignore_global_tickers: env.bool(
                "BITKUB_IGNORE_GLOBAL_TICKERS",
                defaults.options.ignore_global_tickers,
            ),
        };

        let websocket = WebSocketSettings {
            heartbeat_interval: env.duration_secs(
                "BITKUB_HEARTBEAT_INTERVAL_SECS",
                defaults.websocket.heartbeat_interval,
            ),
            reconnect_delay_initial: env.duration_millis(
                "BITKUB_RECONNECT_DELAY_INITIAL_MS",
                defaults.websocket.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.duration_secs(
                "BITKUB_RECONNECT_DELAY_MAX_SECS",
                defaults.websocket.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env.parse(
                "BITKUB_RECONNECT_DELAY_MULTIPLIER",
                defaults.websocket.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: env.parse(
                "BITKUB_MAX_RECONNECT_ATTEMPTS",
                defaults.websocket.max_reconnect_attempts,
            ),
        };

        if websocket.heartbeat_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "BITKUB_HEARTBEAT_INTERVAL_SECS".to_string(),
                value: "0".to_string(),
            });
        }

        let subscriptions = StartupSubscriptions {
            tickers: env.list("BITKUB_TICKERS"),
            trades: env.list("BITKUB_TRADES"),
            order_books: env
                .list("BITKUB_ORDER_BOOKS")
                .into_iter()
                .map(|id| {
                    id.parse().map_err(|_| ConfigError::InvalidValue {
                        key: "BITKUB_ORDER_BOOKS".to_string(),
                        value: id,
                    })
                })
                .collect::<Result<_, _>>()?,
        };

        Ok(Self {
            stream_url,
            options,
            websocket,
            metrics_port: env.parse("BITKUB_METRICS_PORT", defaults.metrics_port),
            subscriptions,
        })
    }

    /// Stream manager configuration derived from these settings.
    #[must_use]
    pub fn manager_config(&self) -> StreamManagerConfig {
        StreamManagerConfig {
            base_url: self.stream_url.clone(),
            options: self.options,
            heartbeat: HeartbeatConfig::from_websocket_settings(&self.websocket),
            reconnect: ReconnectConfig::from_websocket_settings(&self.websocket),
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has a value that cannot be used.
    #[error("environment variable {key} has invalid value `{value}`")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

fn normalize_stream_url(url: &str) -> Result<String, ConfigError> {
    if !(url.starts_with("wss://") || url.starts_with("ws://")) {
        return Err(ConfigError::InvalidValue {
            key: "BITKUB_WS_URL".to_string(),
            value: url.to_string(),
        });
    }
    if url.ends_with('/') {
        Ok(url.to_string())
    } else {
        Ok(format!("{url}/"))
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn bool(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .and_then(|v| match v.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            })
            .unwrap_or(default)
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

    fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ClientConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ClientConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.stream_url, "wss://api.bitkub.com/websocket-api/");
        assert_eq!(config.options, StreamOptions::default());
        assert_eq!(config.metrics_port, 0);
        assert!(config.subscriptions.is_empty());
    }

    #[test]
    fn websocket_settings_defaults() {
        let settings = WebSocketSettings::default();
        assert_eq!(settings.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(settings.reconnect_delay_initial, Duration::from_millis(500));
        assert_eq!(settings.reconnect_delay_max, Duration::from_secs(30));
        assert!((settings.reconnect_delay_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(settings.max_reconnect_attempts, 0);
    }

    #[test]
    fn options_read_from_flags() {
        let config = config(&[
            ("BITKUB_RECONNECT", "false"),
            ("BITKUB_VERBOSE", "1"),
            ("BITKUB_SANITIZE", "yes"),
            ("BITKUB_IGNORE_TICKERS", "TRUE"),
            ("BITKUB_IGNORE_GLOBAL_TICKERS", "off"),
        ])
        .unwrap();

        assert_eq!(
            config.options,
            StreamOptions {
                reconnect: false,
                verbose: true,
                sanitize: true,
                ignore_tickers: true,
                ignore_global_tickers: false,
            }
        );
    }

    #[test]
    fn unparsable_flag_keeps_default() {
        let config = config(&[("BITKUB_RECONNECT", "maybe")]).unwrap();
        assert!(config.options.reconnect);
    }

    #[test]
    fn stream_url_gets_trailing_slash() {
        let config = config(&[("BITKUB_WS_URL", "ws://localhost:9000/ws")]).unwrap();
        assert_eq!(config.stream_url, "ws://localhost:9000/ws/");
    }

    #[test]
    fn stream_url_must_be_websocket() {
        assert!(matches!(
            config(&[("BITKUB_WS_URL", "https://api.bitkub.com")]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            config(&[("BITKUB_WS_URL", "  ")]),
            Err(ConfigError::EmptyValue(_))
        ));
    }

    #[test]
    fn zero_heartbeat_interval_rejected() {
        assert!(matches!(
            config(&[("BITKUB_HEARTBEAT_INTERVAL_SECS", "0")]),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn startup_subscriptions_parsed() {
        let config = config(&[
            ("BITKUB_TICKERS", "BTC/THB, ETH/THB,"),
            ("BITKUB_TRADES", "market.trade.thb_btc"),
            ("BITKUB_ORDER_BOOKS", "1,2"),
        ])
        .unwrap();

        assert_eq!(config.subscriptions.tickers, vec!["BTC/THB", "ETH/THB"]);
        assert_eq!(config.subscriptions.trades, vec!["market.trade.thb_btc"]);
        assert_eq!(config.subscriptions.order_books, vec![1, 2]);
    }

    #[test]
    fn bad_order_book_id_rejected() {
        let err = config(&[("BITKUB_ORDER_BOOKS", "1,btc")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref value, .. } if value == "btc"));
    }

    #[test]
    fn manager_config_carries_backoff() {
        let config = config(&[
            ("BITKUB_RECONNECT_DELAY_INITIAL_MS", "0"),
            ("BITKUB_MAX_RECONNECT_ATTEMPTS", "5"),
            ("BITKUB_HEARTBEAT_INTERVAL_SECS", "10"),
        ])
        .unwrap();

        let manager = config.manager_config();
        assert_eq!(manager.reconnect.initial_delay, Duration::ZERO);
        assert_eq!(manager.reconnect.max_attempts, 5);
        assert_eq!(manager.heartbeat.interval, Duration::from_secs(10));
        assert_eq!(manager.base_url, config.stream_url);
    }
}
