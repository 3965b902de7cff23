//! Streaming Connection Manager
//!
//! Owns the single physical WebSocket to the panel's data provider and
//! multiplexes every logical subscription over it.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──► Connected
//!       ▲                          │             │ socket close/error
//!       │                          ▼             ▼
//!       └─────── budget spent ── Error      Reconnecting ──► Connected
//! ```
//!
//! One session task per connection reads frames in arrival order and
//! drains the outbound channel; a reconnect task walks the backoff
//! schedule after an unexpected close. Both are tied to cancellation
//! tokens so `disconnect()` tears everything down synchronously before
//! returning.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::codec::JsonCodec;
use super::envelope::{Envelope, MessageType, StreamPayload};
use super::heartbeat::HeartbeatTracker;
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::dispatch::MessageDispatcher;
use crate::domain::streaming::SubscriptionType;
use crate::domain::subscription::{
    ErrorCallback, EventCallback, SubscriptionId, SubscriptionRegistry,
};
use crate::infrastructure::config::ConnectionSettings;
use crate::infrastructure::metrics;

/// Handshake deadline for `connect()`.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// State, Events, Errors
// =============================================================================

/// Connection state machine value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No socket; nothing scheduled.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Socket open, subscriptions live.
    Connected,
    /// Backoff timer pending after an unexpected close.
    Reconnecting,
    /// Initial handshake failed; waiting for a manual `connect()`.
    Error,
}

impl ConnectionState {
    /// Lowercase state name for logs and health output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        }
    }
}

/// Lifecycle events emitted by the manager.
///
/// Consumers attach via [`ConnectionManager::events`]; each receiver gets
/// every event independently, so multiple observers never overwrite each
/// other.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The state machine moved to a new state.
    StateChanged(ConnectionState),
    /// A reconnect attempt is scheduled.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
    },
    /// A reconnect attempt succeeded.
    Reconnected,
    /// A recoverable connection error occurred.
    Error(String),
}

/// Errors surfaced synchronously by `connect()`.
///
/// Everything after a successful handshake is reported asynchronously as
/// [`ConnectionEvent::Error`].
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The configured stream URL could not be turned into a request.
    #[error("invalid stream URL: {0}")]
    InvalidUrl(String),

    /// WebSocket handshake failed.
    #[error("WebSocket handshake failed: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Handshake did not complete within [`CONNECT_TIMEOUT`].
    #[error("connection timed out after {0:?}")]
    Timeout(Duration),
}

/// What happened to a message handed to [`ConnectionManager::send`].
///
/// The outbound queue policy is drop-newest: once the queue holds
/// `max_message_queue` messages, further sends while disconnected are
/// dropped and reported as such rather than silently discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum SendOutcome {
    /// Handed to the live session for immediate write.
    Sent,
    /// Queued; flushed in FIFO order on the next successful connect.
    Queued,
    /// Dropped because the queue is full.
    Dropped,
}

// =============================================================================
// Stats
// =============================================================================

/// Read-only snapshot of connection statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    /// Current state machine value.
    pub state: ConnectionState,
    /// Time of the last successful connect.
    pub connect_time: Option<DateTime<Utc>>,
    /// Time of the last disconnect.
    pub disconnect_time: Option<DateTime<Utc>>,
    /// Reconnect attempts since the last successful connect.
    pub reconnect_attempts: u32,
    /// Frames received on the current and previous sessions.
    pub messages_received: u64,
    /// Frames written.
    pub messages_sent: u64,
    /// Payload bytes received.
    pub bytes_received: u64,
    /// Payload bytes written.
    pub bytes_sent: u64,
    /// Time of the last heartbeat echo.
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Last measured round-trip latency in milliseconds.
    pub latency_ms: Option<u64>,
}

#[derive(Debug)]
struct StatsTracker {
    state: RwLock<ConnectionState>,
    connect_time: RwLock<Option<DateTime<Utc>>>,
    disconnect_time: RwLock<Option<DateTime<Utc>>>,
    reconnect_attempts: AtomicU32,
    messages_received: AtomicU64,
    messages_sent: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
}

impl StatsTracker {
    fn new() -> Self {
        Self {
            state: RwLock::new(ConnectionState::Disconnected),
            connect_time: RwLock::new(None),
            disconnect_time: RwLock::new(None),
            reconnect_attempts: AtomicU32::new(0),
            messages_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        metrics::set_connection_state(state.as_str());
    }

    fn record_connected(&self) {
        self.set_state(ConnectionState::Connected);
        *self.connect_time.write() = Some(Utc::now());
        self.reconnect_attempts.store(0, Ordering::Relaxed);
    }

    fn record_disconnected(&self) {
        self.set_state(ConnectionState::Disconnected);
        *self.disconnect_time.write() = Some(Utc::now());
    }

    fn record_reconnect_attempt(&self) -> u32 {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn record_received(&self, bytes: u64) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_sent(&self, bytes: u64) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }
}

// =============================================================================
// Manager
// =============================================================================

struct SessionHandle {
    outbound: mpsc::UnboundedSender<Envelope>,
    cancel: CancellationToken,
    epoch: u64,
}

struct ManagerInner {
    session: Option<SessionHandle>,
    reconnect: Option<CancellationToken>,
    pending: VecDeque<Envelope>,
    epoch: u64,
}

/// Owns one physical streaming connection and multiplexes logical
/// subscriptions over it.
pub struct ConnectionManager {
    settings: ConnectionSettings,
    codec: JsonCodec,
    registry: Arc<SubscriptionRegistry>,
    dispatcher: Arc<MessageDispatcher>,
    stats: StatsTracker,
    heartbeat: HeartbeatTracker,
    events: broadcast::Sender<ConnectionEvent>,
    inner: Mutex<ManagerInner>,
    // Back-reference handed to spawned session/reconnect tasks.
    self_ref: Weak<Self>,
}

impl ConnectionManager {
    /// Create a manager over a registry and dispatcher.
    ///
    /// The manager starts Disconnected; nothing happens until
    /// [`connect`](Self::connect) is called.
    #[must_use]
    pub fn new(
        settings: ConnectionSettings,
        registry: Arc<SubscriptionRegistry>,
        dispatcher: Arc<MessageDispatcher>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new_cyclic(|self_ref| Self {
            settings,
            codec: JsonCodec::new(),
            registry,
            dispatcher,
            stats: StatsTracker::new(),
            heartbeat: HeartbeatTracker::new(),
            events,
            inner: Mutex::new(ManagerInner {
                session: None,
                reconnect: None,
                pending: VecDeque::new(),
                epoch: 0,
            }),
            self_ref: self_ref.clone(),
        })
    }

    /// Current state machine value.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.stats.state()
    }

    /// Attach a new lifecycle-event receiver.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Read-only statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            state: self.stats.state(),
            connect_time: *self.stats.connect_time.read(),
            disconnect_time: *self.stats.disconnect_time.read(),
            reconnect_attempts: self.stats.reconnect_attempts.load(Ordering::Relaxed),
            messages_received: self.stats.messages_received.load(Ordering::Relaxed),
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            bytes_received: self.stats.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.stats.bytes_sent.load(Ordering::Relaxed),
            last_heartbeat: self.heartbeat.last_heartbeat(),
            latency_ms: self
                .heartbeat
                .latency()
                .map(|latency| u64::try_from(latency.as_millis()).unwrap_or(u64::MAX)),
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.registry.len()
    }

    /// Open the physical connection.
    ///
    /// No-op when already Connecting or Connected. On success the manager
    /// is Connected, queued outbound messages are flushed in FIFO order
    /// and every live subscription is replayed with its original id.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectError`] when the handshake fails or exceeds
    /// [`CONNECT_TIMEOUT`]; the manager is left in the Error state and
    /// does not retry on its own.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        match self.state() {
            ConnectionState::Connecting | ConnectionState::Connected => return Ok(()),
            _ => {}
        }

        self.stats.set_state(ConnectionState::Connecting);
        self.emit(ConnectionEvent::StateChanged(ConnectionState::Connecting));
        tracing::info!(url = %self.settings.url, "Connecting to stream");

        match self.open_socket().await {
            Ok(socket) => {
                self.install_session(socket);
                Ok(())
            }
            Err(error) => {
                self.stats.set_state(ConnectionState::Error);
                self.emit(ConnectionEvent::StateChanged(ConnectionState::Error));
                self.emit(ConnectionEvent::Error(error.to_string()));
                Err(error)
            }
        }
    }

    /// Tear the connection down.
    ///
    /// Idempotent. Cancels the session, heartbeat and any pending
    /// reconnect before returning, closes the socket, and clears both the
    /// subscription registry and the queued outbound messages.
    pub fn disconnect(&self) {
        let (session, reconnect) = {
            let mut inner = self.inner.lock();
            inner.epoch += 1;
            inner.pending.clear();
            (inner.session.take(), inner.reconnect.take())
        };

        if let Some(session) = session {
            session.cancel.cancel();
        }
        if let Some(token) = reconnect {
            token.cancel();
        }

        self.registry.clear();

        if self.state() != ConnectionState::Disconnected {
            self.stats.record_disconnected();
            self.emit(ConnectionEvent::StateChanged(ConnectionState::Disconnected));
            tracing::info!("Stream disconnected");
        }
    }

    /// Send an envelope.
    ///
    /// Connected: handed to the session task for immediate serialization
    /// and write (FIFO with everything else sent). Otherwise the message
    /// is queued up to `max_message_queue` entries; overflow drops the
    /// newest message and says so in the returned outcome.
    pub fn send(&self, envelope: Envelope) -> SendOutcome {
        let mut inner = self.inner.lock();

        let envelope = if self.state() == ConnectionState::Connected {
            match &inner.session {
                Some(session) => match session.outbound.send(envelope) {
                    Ok(()) => return SendOutcome::Sent,
                    // Session is tearing down; treat as disconnected.
                    Err(failed) => failed.0,
                },
                None => envelope,
            }
        } else {
            envelope
        };

        if inner.pending.len() >= self.settings.max_message_queue {
            drop(inner);
            metrics::record_dropped_send();
            tracing::warn!(
                capacity = self.settings.max_message_queue,
                "Outbound queue full; dropping newest message"
            );
            return SendOutcome::Dropped;
        }

        inner.pending.push_back(envelope);
        SendOutcome::Queued
    }

    /// Register a subscription.
    ///
    /// Always succeeds locally. When Connected the SUBSCRIBE frame goes
    /// out immediately; otherwise registration alone is enough, since
    /// every live subscription is replayed on (re)connect.
    pub fn subscribe(
        &self,
        stream: SubscriptionType,
        params: BTreeMap<String, String>,
        callback: EventCallback,
        error_callback: Option<ErrorCallback>,
    ) -> SubscriptionId {
        let id = self
            .registry
            .register(stream, params.clone(), callback, error_callback);

        if self.state() == ConnectionState::Connected {
            let _ = self.send(Envelope::subscribe(id.clone(), stream, params));
        }
        id
    }

    /// Remove a subscription. No-op for unknown ids.
    pub fn unsubscribe(&self, id: &str) -> bool {
        let removed = self.registry.remove(id);
        if removed && self.state() == ConnectionState::Connected {
            let _ = self.send(Envelope::unsubscribe(id));
        }
        removed
    }

    // =========================================================================
    // Connection internals
    // =========================================================================

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }

    async fn open_socket(&self) -> Result<WsStream, ConnectError> {
        let mut request = self
            .settings
            .url
            .as_str()
            .into_client_request()
            .map_err(|error| ConnectError::InvalidUrl(error.to_string()))?;

        if !self.settings.protocols.is_empty() {
            let protocols = self.settings.protocols.join(", ");
            let value = HeaderValue::from_str(&protocols)
                .map_err(|error| ConnectError::InvalidUrl(error.to_string()))?;
            request.headers_mut().insert("Sec-WebSocket-Protocol", value);
        }

        if self.settings.enable_compression {
            request.headers_mut().insert(
                "Sec-WebSocket-Extensions",
                HeaderValue::from_static("permessage-deflate"),
            );
        }

        match tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(request))
            .await
        {
            Ok(Ok((socket, _response))) => Ok(socket),
            Ok(Err(error)) => Err(error.into()),
            Err(_) => Err(ConnectError::Timeout(CONNECT_TIMEOUT)),
        }
    }

    /// Promote a fresh socket to the live session: flush the queue, replay
    /// subscriptions and spawn the session task.
    fn install_session(&self, socket: WsStream) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let (epoch, backlog) = {
            let mut inner = self.inner.lock();
            if let Some(old) = inner.session.take() {
                old.cancel.cancel();
            }
            if let Some(token) = inner.reconnect.take() {
                token.cancel();
            }
            inner.epoch += 1;
            let backlog: Vec<Envelope> = inner.pending.drain(..).collect();
            inner.session = Some(SessionHandle {
                outbound: outbound_tx.clone(),
                cancel: cancel.clone(),
                epoch: inner.epoch,
            });
            (inner.epoch, backlog)
        };

        self.heartbeat.reset();
        self.stats.record_connected();
        self.emit(ConnectionEvent::StateChanged(ConnectionState::Connected));
        tracing::info!("Stream connected");

        // Queued messages first (FIFO), then one SUBSCRIBE per live
        // subscription in registration order, with the original ids.
        for envelope in backlog {
            let _ = outbound_tx.send(envelope);
        }
        let snapshots = self.registry.replay_snapshots();
        if !snapshots.is_empty() {
            tracing::info!(count = snapshots.len(), "Replaying subscriptions");
        }
        for snapshot in snapshots {
            let _ = outbound_tx.send(Envelope::subscribe(
                snapshot.id,
                snapshot.stream,
                snapshot.params,
            ));
        }

        let Some(manager) = self.self_ref.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            manager
                .run_session(socket, outbound_tx, outbound_rx, cancel, epoch)
                .await;
        });
    }

    /// Per-connection task: drains the outbound channel, ticks the
    /// heartbeat and processes inbound frames strictly in arrival order.
    async fn run_session(
        self: Arc<Self>,
        socket: WsStream,
        outbound_tx: mpsc::UnboundedSender<Envelope>,
        mut outbound_rx: mpsc::UnboundedReceiver<Envelope>,
        cancel: CancellationToken,
        epoch: u64,
    ) {
        let (mut write, mut read) = socket.split();

        let mut heartbeat_interval = tokio::time::interval(self.settings.heartbeat_interval);
        heartbeat_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // Consume the immediate first tick so pings start one interval in.
        heartbeat_interval.tick().await;

        let failure: Option<String> = loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    break None;
                }
                maybe_envelope = outbound_rx.recv() => {
                    let Some(envelope) = maybe_envelope else { break None };
                    match self.codec.encode(&envelope) {
                        Ok(text) => {
                            let frame_bytes = text.len() as u64;
                            let message_type = envelope.message_type();
                            if let Err(error) = write.send(Message::Text(text.into())).await {
                                break Some(error.to_string());
                            }
                            self.stats.record_sent(frame_bytes);
                            metrics::record_message_sent(message_type.as_str());
                            if message_type == MessageType::Heartbeat {
                                let unanswered = self.heartbeat.record_ping_sent();
                                if unanswered > 1 {
                                    tracing::warn!(unanswered, "Heartbeat echoes overdue");
                                }
                            }
                        }
                        Err(error) => {
                            tracing::warn!(error = %error, "Dropping unencodable outbound frame");
                        }
                    }
                }
                _ = heartbeat_interval.tick() => {
                    let _ = outbound_tx.send(Envelope::heartbeat());
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            self.stats.record_received(text.len() as u64);
                            match self.codec.decode(text.as_str()) {
                                Ok(envelopes) => {
                                    for envelope in envelopes {
                                        self.handle_inbound(envelope);
                                    }
                                }
                                Err(error) => {
                                    // Malformed frames are dropped; the
                                    // connection and other streams go on.
                                    tracing::warn!(error = %error, "Dropping malformed frame");
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(error) = write.send(Message::Pong(data)).await {
                                break Some(error.to_string());
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {}
                        Some(Ok(Message::Close(_))) => {
                            break Some("server closed the connection".to_string());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(error)) => break Some(error.to_string()),
                        None => break Some("stream ended".to_string()),
                    }
                }
            }
        };

        if let Some(reason) = failure {
            self.on_connection_lost(epoch, &reason);
        }
    }

    fn handle_inbound(&self, envelope: Envelope) {
        metrics::record_message_received(envelope.message_type().as_str());

        match &envelope.payload {
            StreamPayload::Heartbeat(_) => {
                let latency = self.heartbeat.record_echo(envelope.timestamp);
                tracing::trace!(latency_ms = latency.as_millis() as u64, "Heartbeat echo");
            }
            StreamPayload::Subscribe(_) | StreamPayload::Unsubscribe(_) => {
                tracing::trace!("Ignoring control acknowledgement");
            }
            _ => {
                let _ = self.dispatcher.dispatch(envelope);
            }
        }
    }

    /// Unexpected socket closure: record it and, within budget, start the
    /// backoff schedule.
    fn on_connection_lost(&self, epoch: u64, reason: &str) {
        {
            let mut inner = self.inner.lock();
            match &inner.session {
                Some(session) if session.epoch == epoch => inner.session = None,
                // disconnect() ran or a newer session took over.
                _ => return,
            }
        }

        tracing::warn!(reason, "Stream connection lost");
        self.stats.record_disconnected();
        self.emit(ConnectionEvent::StateChanged(ConnectionState::Disconnected));
        self.emit(ConnectionEvent::Error(reason.to_string()));

        self.schedule_reconnect();
    }

    fn schedule_reconnect(&self) {
        let policy = ReconnectPolicy::new(ReconnectConfig {
            interval: self.settings.reconnect_interval,
            max_attempts: self.settings.reconnect_attempts,
            jitter_factor: 0.0,
        });

        if !policy.should_retry() {
            tracing::warn!("Reconnection disabled; staying disconnected");
            return;
        }

        let token = CancellationToken::new();
        {
            let mut inner = self.inner.lock();
            // Never two overlapping reconnect schedules.
            if let Some(existing) = inner.reconnect.take() {
                existing.cancel();
            }
            inner.reconnect = Some(token.clone());
        }

        let Some(manager) = self.self_ref.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            manager.run_reconnect(policy, token).await;
        });
    }

    async fn run_reconnect(self: Arc<Self>, mut policy: ReconnectPolicy, cancel: CancellationToken) {
        while let Some(delay) = policy.next_delay() {
            let attempt = self.stats.record_reconnect_attempt();
            self.stats.set_state(ConnectionState::Reconnecting);
            self.emit(ConnectionEvent::StateChanged(ConnectionState::Reconnecting));
            self.emit(ConnectionEvent::Reconnecting { attempt });
            metrics::record_reconnect();
            tracing::info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Reconnect scheduled"
            );

            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }

            match self.open_socket().await {
                Ok(socket) => {
                    if cancel.is_cancelled() {
                        // disconnect() or a manual connect() won the race.
                        return;
                    }
                    self.install_session(socket);
                    self.emit(ConnectionEvent::Reconnected);
                    return;
                }
                Err(error) => {
                    tracing::warn!(attempt, error = %error, "Reconnect attempt failed");
                    self.emit(ConnectionEvent::Error(error.to_string()));
                }
            }
        }

        tracing::warn!("Reconnect budget exhausted; staying disconnected");
        self.stats.set_state(ConnectionState::Disconnected);
        self.emit(ConnectionEvent::StateChanged(ConnectionState::Disconnected));
        self.inner.lock().reconnect = None;
    }
}

// =============================================================================
// Tests
// =============================================================================
