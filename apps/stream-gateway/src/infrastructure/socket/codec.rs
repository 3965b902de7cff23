//! Stream Codec
//!
//! JSON encoding and decoding for the gateway's wire envelope. The server
//! sends one envelope per text frame; batches arrive as a JSON array of
//! envelopes. Payloads are decoded into the tagged union by dispatching
//! on the envelope's `type` field.

use serde_json::Value;

use super::envelope::{
    Envelope, HeartbeatPayload, MessageType, StreamPayload, SubscribeRequest, UnsubscribeRequest,
};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Envelope carried an unrecognized `type` tag.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// Frame was structurally invalid.
    #[error("invalid frame format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for the streaming connection.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame into one or more envelopes.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not valid JSON, carries an unknown
    /// `type` tag, or its `data` does not match the tag's payload shape.
    pub fn decode(&self, text: &str) -> Result<Vec<Envelope>, CodecError> {
        let trimmed = text.trim();

        if trimmed.starts_with('[') {
            let values: Vec<Value> = serde_json::from_str(trimmed)?;
            values.into_iter().map(Self::decode_value).collect()
        } else if trimmed.starts_with('{') {
            let value: Value = serde_json::from_str(trimmed)?;
            Ok(vec![Self::decode_value(value)?])
        } else {
            Err(CodecError::InvalidFormat(format!(
                "expected JSON object or array, got: {}...",
                &trimmed[..trimmed.len().min(50)]
            )))
        }
    }

    /// Encode an envelope to a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self, envelope: &Envelope) -> Result<String, CodecError> {
        let data = match &envelope.payload {
            StreamPayload::Heartbeat(payload) => serde_json::to_value(payload)?,
            StreamPayload::Subscribe(payload) => serde_json::to_value(payload)?,
            StreamPayload::Unsubscribe(payload) => serde_json::to_value(payload)?,
            StreamPayload::Price(payload) => serde_json::to_value(payload)?,
            StreamPayload::Block(payload) => serde_json::to_value(payload)?,
            StreamPayload::Transaction(payload) => serde_json::to_value(payload)?,
            StreamPayload::Gas(payload) => serde_json::to_value(payload)?,
            StreamPayload::Network(payload) => serde_json::to_value(payload)?,
            StreamPayload::Wallet(payload) => serde_json::to_value(payload)?,
        };

        let mut frame = serde_json::json!({
            "type": envelope.message_type().as_str(),
            "data": data,
            "timestamp": envelope.timestamp,
        });
        if let Some(id) = &envelope.id {
            frame["id"] = Value::String(id.clone());
        }

        Ok(serde_json::to_string(&frame)?)
    }

    /// Decode a single envelope object.
    fn decode_value(value: Value) -> Result<Envelope, CodecError> {
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| CodecError::InvalidFormat("missing \"type\" field".to_string()))?;

        let message_type = MessageType::from_tag(tag)
            .ok_or_else(|| CodecError::UnknownMessageType(tag.to_string()))?;

        let timestamp = value
            .get("timestamp")
            .and_then(Value::as_i64)
            .ok_or_else(|| CodecError::InvalidFormat("missing \"timestamp\" field".to_string()))?;

        let id = value
            .get("id")
            .and_then(Value::as_str)
            .map(ToString::to_string);

        // Heartbeats may arrive without a data object at all.
        let data = match value.get("data") {
            Some(data) => data.clone(),
            None => Value::Object(serde_json::Map::new()),
        };

        let payload = match message_type {
            MessageType::Heartbeat => {
                StreamPayload::Heartbeat(serde_json::from_value::<HeartbeatPayload>(data)?)
            }
            MessageType::Subscribe => {
                StreamPayload::Subscribe(serde_json::from_value::<SubscribeRequest>(data)?)
            }
            MessageType::Unsubscribe => {
                StreamPayload::Unsubscribe(serde_json::from_value::<UnsubscribeRequest>(data)?)
            }
            MessageType::PriceUpdate => StreamPayload::Price(serde_json::from_value(data)?),
            MessageType::BlockUpdate => StreamPayload::Block(serde_json::from_value(data)?),
            MessageType::TransactionUpdate => {
                StreamPayload::Transaction(serde_json::from_value(data)?)
            }
            MessageType::GasUpdate => StreamPayload::Gas(serde_json::from_value(data)?),
            MessageType::NetworkStatus => StreamPayload::Network(serde_json::from_value(data)?),
            MessageType::WalletUpdate => StreamPayload::Wallet(serde_json::from_value(data)?),
        };

        Ok(Envelope {
            payload,
            timestamp,
            id,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rust_decimal::Decimal;

    use super::*;

    #[test]
    fn decode_single_heartbeat() {
        let codec = JsonCodec::new();
        let json = r#"{"type":"HEARTBEAT","data":{},"timestamp":1712345678901}"#;

        let envelopes = codec.decode(json).unwrap();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].message_type(), MessageType::Heartbeat);
        assert_eq!(envelopes[0].timestamp, 1_712_345_678_901);
    }

    #[test]
    fn decode_heartbeat_without_data_field() {
        let codec = JsonCodec::new();
        let json = r#"{"type":"HEARTBEAT","timestamp":5}"#;

        let envelopes = codec.decode(json).unwrap();
        assert_eq!(envelopes[0].message_type(), MessageType::Heartbeat);
    }

    #[test]
    fn decode_price_update() {
        let codec = JsonCodec::new();
        let json = r#"{
            "type": "PRICE_UPDATE",
            "data": {"symbol":"BTC","price":50000,"change":1.2,"volume":900},
            "timestamp": 1712345678901,
            "id": "frame-7"
        }"#;

        let envelopes = codec.decode(json).unwrap();
        let envelope = &envelopes[0];
        assert_eq!(envelope.id.as_deref(), Some("frame-7"));

        let StreamPayload::Price(price) = &envelope.payload else {
            panic!("expected price payload, got {:?}", envelope.payload);
        };
        assert_eq!(price.symbol, "BTC");
        assert_eq!(price.price, Decimal::from(50_000));
        assert_eq!(price.change, Decimal::from_str("1.2").unwrap());
    }

    #[test]
    fn decode_array_of_frames() {
        let codec = JsonCodec::new();
        let json = r#"[
            {"type":"PRICE_UPDATE","data":{"symbol":"BTC","price":50000,"change":1.2,"volume":900},"timestamp":1},
            {"type":"GAS_UPDATE","data":{"slowGwei":10,"standardGwei":15,"fastGwei":25,"baseFeeGwei":9},"timestamp":2}
        ]"#;

        let envelopes = codec.decode(json).unwrap();
        assert_eq!(envelopes.len(), 2);
        assert!(matches!(envelopes[0].payload, StreamPayload::Price(_)));
        assert!(matches!(envelopes[1].payload, StreamPayload::Gas(_)));
    }

    #[test]
    fn decode_empty_array() {
        let codec = JsonCodec::new();
        let envelopes = codec.decode("[]").unwrap();
        assert!(envelopes.is_empty());
    }

    #[test]
    fn decode_unknown_type_fails() {
        let codec = JsonCodec::new();
        let json = r#"{"type":"TELEMETRY_DUMP","data":{},"timestamp":1}"#;

        assert!(matches!(
            codec.decode(json),
            Err(CodecError::UnknownMessageType(tag)) if tag == "TELEMETRY_DUMP"
        ));
    }

    #[test]
    fn decode_missing_type_fails() {
        let codec = JsonCodec::new();
        let json = r#"{"data":{},"timestamp":1}"#;

        assert!(matches!(
            codec.decode(json),
            Err(CodecError::InvalidFormat(_))
        ));
    }

    #[test]
    fn decode_garbage_fails() {
        let codec = JsonCodec::new();
        assert!(matches!(
            codec.decode("not json at all"),
            Err(CodecError::InvalidFormat(_))
        ));
    }

    #[test]
    fn decode_mismatched_payload_fails() {
        let codec = JsonCodec::new();
        // Price tag with a block body.
        let json = r#"{"type":"PRICE_UPDATE","data":{"number":1,"hash":"0x"},"timestamp":1}"#;

        assert!(matches!(codec.decode(json), Err(CodecError::Json(_))));
    }

    #[test]
    fn encode_subscribe_wire_shape() {
        let codec = JsonCodec::new();
        let mut params = std::collections::BTreeMap::new();
        params.insert("symbol".to_string(), "BTC".to_string());

        let envelope = Envelope::subscribe(
            "sub-1",
            crate::domain::streaming::SubscriptionType::CryptoPrices,
            params,
        );
        let text = codec.encode(&envelope).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["type"], "SUBSCRIBE");
        assert_eq!(value["data"]["id"], "sub-1");
        assert_eq!(value["data"]["type"], "CRYPTO_PRICES");
        assert_eq!(value["data"]["params"]["symbol"], "BTC");
        assert!(value["timestamp"].is_i64());
        assert!(value.get("id").is_none());
    }

    #[test]
    fn encode_then_decode_round_trips() {
        let codec = JsonCodec::new();
        let envelope = Envelope::heartbeat();

        let text = codec.encode(&envelope).unwrap();
        let decoded = codec.decode(&text).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0], envelope);
    }
}
