//! Configuration Infrastructure
//!
//! Environment-driven settings for the gateway.

pub mod settings;

pub use settings::{
    ConfigError, ConnectionSettings, GatewayConfig, ServerSettings, StreamSettings,
};
