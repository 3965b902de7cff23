//! Streaming Socket Infrastructure
//!
//! WebSocket transport for the panel's data provider: wire envelope,
//! JSON codec, heartbeat tracking, reconnect policy and the connection
//! manager that ties them together.

pub mod codec;
pub mod connection;
pub mod envelope;
pub mod heartbeat;
pub mod reconnect;

pub use codec::{CodecError, JsonCodec};
pub use connection::{
    CONNECT_TIMEOUT, ConnectError, ConnectionEvent, ConnectionManager, ConnectionState,
    ConnectionStats, SendOutcome,
};
pub use envelope::{Envelope, MessageType, StreamPayload, SubscribeRequest, UnsubscribeRequest};
pub use heartbeat::HeartbeatTracker;
pub use reconnect::{MAX_BACKOFF, ReconnectConfig, ReconnectPolicy};
