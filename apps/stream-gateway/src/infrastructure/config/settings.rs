//! Gateway Configuration Settings
//!
//! Configuration types for the stream gateway, loaded from environment
//! variables.

use std::time::Duration;

use crate::infrastructure::cache::{CacheConfig, DEFAULT_SWEEP_INTERVAL, EvictionStrategy};

/// Streaming connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// WebSocket URL of the data provider.
    pub url: String,
    /// Maximum reconnect attempts after an unexpected close (0 = never
    /// reconnect automatically).
    pub reconnect_attempts: u32,
    /// Base reconnect delay; doubles per attempt up to the 30s cap.
    pub reconnect_interval: Duration,
    /// Interval between heartbeat pings.
    pub heartbeat_interval: Duration,
    /// Capacity of the outbound queue used while disconnected.
    pub max_message_queue: usize,
    /// Whether to request permessage-deflate compression.
    pub enable_compression: bool,
    /// Subprotocols offered during the handshake.
    pub protocols: Vec<String>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8844/stream".to_string(),
            reconnect_attempts: 5,
            reconnect_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(30),
            max_message_queue: 100,
            enable_compression: false,
            protocols: Vec::new(),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8082 }
    }
}

/// Default subscriptions the gateway opens at startup.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Symbols for the price stream.
    pub price_symbols: Vec<String>,
    /// Wallet address to watch, if any.
    pub wallet_address: Option<String>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            price_symbols: vec!["BTC".to_string(), "ETH".to_string()],
            wallet_address: None,
        }
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Streaming connection settings.
    pub connection: ConnectionSettings,
    /// Cache settings.
    pub cache: CacheConfig,
    /// Expiry sweep interval (TTL strategy only).
    pub sweep_interval: Duration,
    /// Server port settings.
    pub server: ServerSettings,
    /// Startup subscriptions.
    pub streams: StreamSettings,
}

impl GatewayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `DSKY_STREAM_URL` is missing or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = std::env::var("DSKY_STREAM_URL")
            .map_err(|_| ConfigError::MissingEnvVar("DSKY_STREAM_URL".to_string()))?;
        if url.is_empty() {
            return Err(ConfigError::EmptyValue("DSKY_STREAM_URL".to_string()));
        }

        let connection_defaults = ConnectionSettings::default();
        let connection = ConnectionSettings {
            url,
            reconnect_attempts: parse_env_u32(
                "DSKY_RECONNECT_ATTEMPTS",
                connection_defaults.reconnect_attempts,
            ),
            reconnect_interval: parse_env_duration_millis(
                "DSKY_RECONNECT_INTERVAL_MS",
                connection_defaults.reconnect_interval,
            ),
            heartbeat_interval: parse_env_duration_secs(
                "DSKY_HEARTBEAT_INTERVAL_SECS",
                connection_defaults.heartbeat_interval,
            ),
            max_message_queue: parse_env_usize(
                "DSKY_MAX_MESSAGE_QUEUE",
                connection_defaults.max_message_queue,
            ),
            enable_compression: parse_env_bool("DSKY_ENABLE_COMPRESSION", false),
            protocols: parse_env_list("DSKY_PROTOCOLS"),
        };

        let cache = CacheConfig {
            max_size: parse_env_usize("DSKY_CACHE_MAX_SIZE", 1_000),
            default_ttl: match parse_env_u64("DSKY_CACHE_DEFAULT_TTL_MS", 60_000) {
                0 => None,
                millis => Some(Duration::from_millis(millis)),
            },
            strategy: std::env::var("DSKY_CACHE_STRATEGY")
                .map(|s| EvictionStrategy::from_str_case_insensitive(&s))
                .unwrap_or_default(),
            enable_metrics: parse_env_bool("DSKY_CACHE_ENABLE_METRICS", true),
        };

        let server = ServerSettings {
            health_port: parse_env_u16("DSKY_HEALTH_PORT", ServerSettings::default().health_port),
        };

        let stream_defaults = StreamSettings::default();
        let streams = StreamSettings {
            price_symbols: {
                let symbols = parse_env_list("DSKY_PRICE_SYMBOLS");
                if symbols.is_empty() {
                    stream_defaults.price_symbols
                } else {
                    symbols
                }
            },
            wallet_address: std::env::var("DSKY_WALLET_ADDRESS")
                .ok()
                .filter(|address| !address.is_empty()),
        };

        Ok(Self {
            connection,
            cache,
            sweep_interval: parse_env_duration_secs(
                "DSKY_CACHE_SWEEP_INTERVAL_SECS",
                DEFAULT_SWEEP_INTERVAL,
            ),
            server,
            streams,
        })
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
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

fn parse_env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}
