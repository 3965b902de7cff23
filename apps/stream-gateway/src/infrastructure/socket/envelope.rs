//! Wire Message Model
//!
//! Defines the envelope exchanged with the panel's streaming server:
//!
//! ```json
//! { "type": "PRICE_UPDATE", "data": { ... }, "timestamp": 1712345678901, "id": "..." }
//! ```
//!
//! The `data` payload is a tagged union keyed by `type`, so every inbound
//! frame is matched exhaustively instead of being passed around as untyped
//! JSON. Encoding/decoding of the envelope lives in the codec.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::domain::streaming::{
    BlockUpdate, GasUpdate, NetworkStatus, PriceUpdate, StreamEvent, SubscriptionType,
    TransactionUpdate, WalletUpdate,
};

// =============================================================================
// Message Types
// =============================================================================

/// Wire-level message kinds (client↔server control + server→client data).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Keep-alive ping/echo.
    Heartbeat,
    /// Client control frame opening a logical stream.
    Subscribe,
    /// Client control frame closing a logical stream.
    Unsubscribe,
    /// Crypto price tick.
    PriceUpdate,
    /// New block header.
    BlockUpdate,
    /// Pending transaction observed in the mempool.
    TransactionUpdate,
    /// Gas price tiers.
    GasUpdate,
    /// Network-wide status snapshot.
    NetworkStatus,
    /// Watched-wallet balance change.
    WalletUpdate,
}

impl MessageType {
    /// Wire tag for this message type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Heartbeat => "HEARTBEAT",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::PriceUpdate => "PRICE_UPDATE",
            Self::BlockUpdate => "BLOCK_UPDATE",
            Self::TransactionUpdate => "TRANSACTION_UPDATE",
            Self::GasUpdate => "GAS_UPDATE",
            Self::NetworkStatus => "NETWORK_STATUS",
            Self::WalletUpdate => "WALLET_UPDATE",
        }
    }

    /// Parse a wire tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "HEARTBEAT" => Some(Self::Heartbeat),
            "SUBSCRIBE" => Some(Self::Subscribe),
            "UNSUBSCRIBE" => Some(Self::Unsubscribe),
            "PRICE_UPDATE" => Some(Self::PriceUpdate),
            "BLOCK_UPDATE" => Some(Self::BlockUpdate),
            "TRANSACTION_UPDATE" => Some(Self::TransactionUpdate),
            "GAS_UPDATE" => Some(Self::GasUpdate),
            "NETWORK_STATUS" => Some(Self::NetworkStatus),
            "WALLET_UPDATE" => Some(Self::WalletUpdate),
            _ => None,
        }
    }

    /// The logical stream a data frame of this type is routed to.
    ///
    /// Control frames (heartbeat, subscribe, unsubscribe) have no stream.
    #[must_use]
    pub const fn subscription_type(self) -> Option<SubscriptionType> {
        match self {
            Self::PriceUpdate => Some(SubscriptionType::CryptoPrices),
            Self::BlockUpdate => Some(SubscriptionType::BlockHeaders),
            Self::TransactionUpdate => Some(SubscriptionType::PendingTransactions),
            Self::GasUpdate => Some(SubscriptionType::GasPrices),
            Self::WalletUpdate => Some(SubscriptionType::WalletTransactions),
            Self::NetworkStatus => Some(SubscriptionType::NetworkStats),
            Self::Heartbeat | Self::Subscribe | Self::Unsubscribe => None,
        }
    }
}

// =============================================================================
// Control Payloads
// =============================================================================

/// Heartbeat payload; the envelope timestamp carries the send time that the
/// server echoes back for latency measurement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatPayload {}

/// SUBSCRIBE control payload: `{id, type, params}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Client-generated subscription id, stable across reconnects.
    pub id: String,
    /// Logical stream being opened.
    #[serde(rename = "type")]
    pub stream: SubscriptionType,
    /// Opaque key-value parameters forwarded to the server.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

/// UNSUBSCRIBE control payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscribeRequest {
    /// Subscription id being closed.
    pub id: String,
}

// =============================================================================
// Envelope
// =============================================================================

/// Typed `data` payload, tagged by the envelope's `type` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamPayload {
    /// Keep-alive ping/echo.
    Heartbeat(HeartbeatPayload),
    /// Open a logical stream.
    Subscribe(SubscribeRequest),
    /// Close a logical stream.
    Unsubscribe(UnsubscribeRequest),
    /// Crypto price tick.
    Price(PriceUpdate),
    /// New block header.
    Block(BlockUpdate),
    /// Pending transaction.
    Transaction(TransactionUpdate),
    /// Gas price tiers.
    Gas(GasUpdate),
    /// Network status snapshot.
    Network(NetworkStatus),
    /// Wallet balance change.
    Wallet(WalletUpdate),
}

impl StreamPayload {
    /// Wire-level kind of this payload.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        match self {
            Self::Heartbeat(_) => MessageType::Heartbeat,
            Self::Subscribe(_) => MessageType::Subscribe,
            Self::Unsubscribe(_) => MessageType::Unsubscribe,
            Self::Price(_) => MessageType::PriceUpdate,
            Self::Block(_) => MessageType::BlockUpdate,
            Self::Transaction(_) => MessageType::TransactionUpdate,
            Self::Gas(_) => MessageType::GasUpdate,
            Self::Network(_) => MessageType::NetworkStatus,
            Self::Wallet(_) => MessageType::WalletUpdate,
        }
    }

    /// Convert a data frame into its domain stream event.
    ///
    /// Control frames return `None`.
    #[must_use]
    pub fn into_event(self) -> Option<StreamEvent> {
        match self {
            Self::Price(price) => Some(StreamEvent::Price(price)),
            Self::Block(block) => Some(StreamEvent::Block(block)),
            Self::Transaction(tx) => Some(StreamEvent::Transaction(tx)),
            Self::Gas(gas) => Some(StreamEvent::Gas(gas)),
            Self::Network(network) => Some(StreamEvent::Network(network)),
            Self::Wallet(wallet) => Some(StreamEvent::Wallet(wallet)),
            Self::Heartbeat(_) | Self::Subscribe(_) | Self::Unsubscribe(_) => None,
        }
    }
}

/// Wire envelope wrapping every frame in both directions.
///
/// Ephemeral: constructed per frame and only retained inside the cache
/// (as its unwrapped stream event).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Typed payload (`type` + `data` on the wire).
    pub payload: StreamPayload,
    /// Send time, epoch milliseconds.
    pub timestamp: i64,
    /// Optional correlation id.
    pub id: Option<String>,
}

impl Envelope {
    /// Wrap a payload with the current timestamp.
    #[must_use]
    pub fn new(payload: StreamPayload) -> Self {
        Self {
            payload,
            timestamp: Utc::now().timestamp_millis(),
            id: None,
        }
    }

    /// Build a heartbeat ping frame.
    #[must_use]
    pub fn heartbeat() -> Self {
        Self::new(StreamPayload::Heartbeat(HeartbeatPayload::default()))
    }

    /// Build a SUBSCRIBE control frame.
    #[must_use]
    pub fn subscribe(
        id: impl Into<String>,
        stream: SubscriptionType,
        params: BTreeMap<String, String>,
    ) -> Self {
        Self::new(StreamPayload::Subscribe(SubscribeRequest {
            id: id.into(),
            stream,
            params,
        }))
    }

    /// Build an UNSUBSCRIBE control frame.
    #[must_use]
    pub fn unsubscribe(id: impl Into<String>) -> Self {
        Self::new(StreamPayload::Unsubscribe(UnsubscribeRequest {
            id: id.into(),
        }))
    }

    /// Wire-level kind of the wrapped payload.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }
}

// =============================================================================
// Tests
// =============================================================================
