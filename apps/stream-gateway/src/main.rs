//! DSKY Stream Gateway Binary
//!
//! Starts the dashboard's streaming gateway: connects to the data
//! provider, opens the configured subscriptions and keeps the last-value
//! cache warm behind the health endpoint.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin dsky-stream-gateway
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `DSKY_STREAM_URL`: WebSocket URL of the data provider
//!
//! ## Optional
//! - `DSKY_RECONNECT_ATTEMPTS`: reconnect budget (default: 5)
//! - `DSKY_RECONNECT_INTERVAL_MS`: base backoff delay (default: 1000)
//! - `DSKY_HEARTBEAT_INTERVAL_SECS`: ping interval (default: 30)
//! - `DSKY_MAX_MESSAGE_QUEUE`: outbound queue capacity (default: 100)
//! - `DSKY_CACHE_MAX_SIZE`: cache capacity (default: 1000)
//! - `DSKY_CACHE_DEFAULT_TTL_MS`: default entry TTL, 0 = none (default: 60000)
//! - `DSKY_CACHE_STRATEGY`: lru | fifo | ttl (default: lru)
//! - `DSKY_PRICE_SYMBOLS`: comma-separated symbols (default: BTC,ETH)
//! - `DSKY_WALLET_ADDRESS`: wallet to watch (default: none)
//! - `DSKY_HEALTH_PORT`: health/metrics HTTP port (default: 8082)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: log level (default: info)

use std::collections::BTreeMap;
use std::sync::Arc;

use dsky_stream_gateway::{
    CacheSweeper, ConnectionEvent, ConnectionManager, EvictionStrategy, GatewayConfig,
    HealthServer, HealthServerState, MessageDispatcher, StreamCache, StreamEvent, StreamSettings,
    SubscriptionRegistry, SubscriptionType, init_metrics, init_telemetry,
};
use tokio::signal;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

#[tokio::main]
#[allow(clippy::expect_used)]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = init_telemetry();

    tracing::info!("Starting DSKY Stream Gateway");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = GatewayConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Core wiring: cache + registry + dispatcher + connection manager.
    let cache = Arc::new(StreamCache::new(config.cache.clone()));
    let registry = Arc::new(SubscriptionRegistry::new());
    let dispatcher = Arc::new(MessageDispatcher::new(
        Arc::clone(&cache),
        Arc::clone(&registry),
    ));
    let manager = ConnectionManager::new(config.connection.clone(), registry, dispatcher);

    // Expiry sweeper only runs for the TTL strategy; the other strategies
    // expire lazily on read.
    if config.cache.strategy == EvictionStrategy::Ttl {
        let sweeper = CacheSweeper::new(Arc::clone(&cache), config.sweep_interval);
        tokio::spawn(sweeper.run());
    }

    // Log lifecycle events.
    let events = manager.events();
    tokio::spawn(log_connection_events(events));

    // Health server.
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&manager),
        Arc::clone(&cache),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(error) = health_server.run().await {
            tracing::error!(error = %error, "Health server error");
        }
    });

    // Subscriptions registered before connecting are sent by the replay
    // pass as soon as the connection is up.
    register_panel_subscriptions(&manager, &config.streams);

    // The manager only reconnects on unexpected closes; the initial
    // connect is retried here until it succeeds or we are shut down.
    loop {
        tokio::select! {
            () = shutdown_token.cancelled() => {
                tracing::info!("Shutdown before stream came up");
                return Ok(());
            }
            result = manager.connect() => {
                match result {
                    Ok(()) => break,
                    Err(error) => {
                        tracing::warn!(error = %error, "Initial connect failed; retrying");
                        tokio::time::sleep(config.connection.reconnect_interval).await;
                    }
                }
            }
        }
    }

    tracing::info!("Stream gateway ready");

    await_shutdown(shutdown_token).await;

    manager.disconnect();
    cache.dispose();

    tracing::info!("Stream gateway stopped");
    Ok(())
}

/// Open the panel's default subscriptions.
fn register_panel_subscriptions(manager: &Arc<ConnectionManager>, streams: &StreamSettings) {
    for symbol in &streams.price_symbols {
        let mut params = BTreeMap::new();
        params.insert("symbol".to_string(), symbol.clone());

        let symbol_for_log = symbol.clone();
        manager.subscribe(
            SubscriptionType::CryptoPrices,
            params,
            Box::new(move |event| {
                if let StreamEvent::Price(price) = event {
                    tracing::debug!(
                        symbol = %symbol_for_log,
                        price = %price.price,
                        change = %price.change,
                        "Price tick"
                    );
                }
                Ok(())
            }),
            None,
        );
    }

    manager.subscribe(
        SubscriptionType::BlockHeaders,
        BTreeMap::new(),
        Box::new(|event| {
            if let StreamEvent::Block(block) = event {
                tracing::debug!(number = block.number, hash = %block.hash, "New block");
            }
            Ok(())
        }),
        None,
    );

    manager.subscribe(
        SubscriptionType::GasPrices,
        BTreeMap::new(),
        Box::new(|event| {
            if let StreamEvent::Gas(gas) = event {
                tracing::debug!(standard_gwei = %gas.standard_gwei, "Gas update");
            }
            Ok(())
        }),
        None,
    );

    manager.subscribe(
        SubscriptionType::NetworkStats,
        BTreeMap::new(),
        Box::new(|_| Ok(())),
        None,
    );

    if let Some(address) = &streams.wallet_address {
        let mut params = BTreeMap::new();
        params.insert("address".to_string(), address.clone());

        manager.subscribe(
            SubscriptionType::WalletTransactions,
            params,
            Box::new(|event| {
                if let StreamEvent::Wallet(wallet) = event {
                    tracing::info!(
                        address = %wallet.address,
                        balance = %wallet.balance,
                        "Wallet update"
                    );
                }
                Ok(())
            }),
            None,
        );
    }

    tracing::info!(
        subscriptions = manager.subscription_count(),
        "Panel subscriptions registered"
    );
}

/// Log lifecycle events from the connection manager.
async fn log_connection_events(mut events: broadcast::Receiver<ConnectionEvent>) {
    loop {
        match events.recv().await {
            Ok(ConnectionEvent::StateChanged(state)) => {
                tracing::info!(state = state.as_str(), "Connection state changed");
            }
            Ok(ConnectionEvent::Reconnecting { attempt }) => {
                tracing::info!(attempt, "Reconnecting to stream");
            }
            Ok(ConnectionEvent::Reconnected) => {
                tracing::info!("Stream reconnected");
            }
            Ok(ConnectionEvent::Error(message)) => {
                tracing::warn!(error = %message, "Stream error");
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::debug!(missed, "Event log lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &GatewayConfig) {
    tracing::info!(
        url = %config.connection.url,
        reconnect_attempts = config.connection.reconnect_attempts,
        heartbeat_secs = config.connection.heartbeat_interval.as_secs(),
        cache_strategy = config.cache.strategy.as_str(),
        cache_max_size = config.cache.max_size,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
