#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::default_trait_access
    )
)]

//! DSKY Stream Gateway - Dashboard Transport Core
//!
//! Maintains a single WebSocket connection to the panel's data provider,
//! multiplexes many logical subscriptions over it and keeps a
//! capacity-bounded cache of every stream's last known value for the
//! Apollo-DSKY-styled wallet dashboard.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: stream data types and subscription tracking
//!   - `streaming`: price/block/transaction/gas/network/wallet events
//!   - `subscription`: registry with replay and isolated fan-out
//!
//! - **Application**: use cases
//!   - `dispatch`: frame classification, cache update, subscriber fan-out
//!
//! - **Infrastructure**: adapters and external integrations
//!   - `socket`: WebSocket client with heartbeat and backoff reconnection
//!   - `cache`: LRU/FIFO/TTL last-value store
//!   - `config`: environment-driven settings
//!   - `health`: health check HTTP endpoint
//!   - `metrics` / `telemetry`: Prometheus and tracing setup
//!
//! # Data Flow
//!
//! ```text
//!                  ┌──────────────┐    ┌────────────┐    ┌───────────────┐
//! Provider WS ────►│ Connection   │───►│ Dispatcher │─┬─►│ CacheStore    │
//!                  │ Manager      │    └────────────┘ │  └───────────────┘
//!                  └──────────────┘                   │  ┌───────────────┐
//!                        ▲ replay on reconnect        └─►│ Subscriptions │
//!                        └────────────────────────────── │ (fan-out)     │
//!                                                        └───────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no external dependencies.
pub mod domain;

/// Application layer - Use cases.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{
    BlockUpdate, GasUpdate, NetworkStatus, PriceUpdate, StreamEvent, SubscriptionType,
    TransactionUpdate, WalletUpdate,
};
pub use domain::subscription::{
    ErrorCallback, EventCallback, SubscriberError, SubscriptionId, SubscriptionRegistry,
    SubscriptionSnapshot,
};

// Application services
pub use application::dispatch::{MessageDispatcher, StreamCache};

// Transport
pub use infrastructure::socket::{
    ConnectError, ConnectionEvent, ConnectionManager, ConnectionState, ConnectionStats, Envelope,
    MessageType, SendOutcome, StreamPayload,
};

// Cache
pub use infrastructure::cache::{
    CacheConfig, CacheMetrics, CacheStore, CacheSweeper, CacheWriteOptions, EvictionStrategy,
};

// Configuration
pub use infrastructure::config::{
    ConfigError, ConnectionSettings, GatewayConfig, ServerSettings, StreamSettings,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
