//! JSON text encoding for [`Packet`]s.
//!
//! A packet on the wire looks like
//! `{"type":"key_exchange","timestamp":"2026-01-01T00:00:00Z","data":{"key":"..."}}`.
//! Decoding is two-stage: the outer object is read first so an unknown
//! `type` can be reported separately from a `data` object of the wrong shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::packet::{Packet, PacketType, Payload};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The text is not a JSON packet object.
    #[error("invalid packet json: {0}")]
    Json(#[from] serde_json::Error),
    /// The `type` field names no known packet type.
    #[error("unknown packet type: {0:?}")]
    UnknownType(String),
    /// `data` does not match the shape required by `type`.
    #[error("malformed {kind} data: {source}")]
    MalformedData {
        /// Declared type of the packet.
        kind: PacketType,
        /// Underlying deserialization error.
        source: serde_json::Error,
    },
    /// A binary field is not valid base64.
    #[error("field `{field}` is not valid base64: {source}")]
    Base64 {
        /// Name of the offending field.
        field: &'static str,
        /// Underlying decode error.
        source: base64::DecodeError,
    },
}

#[derive(Serialize, Deserialize)]
struct RawPacket {
    #[serde(rename = "type")]
    kind: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    data: Value,
}

/// Encodes a [`Packet`] as a JSON text frame.
///
/// # Errors
///
/// Returns `CodecError::Json` if the payload cannot be serialized.
pub fn encode(packet: &Packet) -> Result<String, CodecError> {
    let data = match &packet.payload {
        Payload::Auth(d) => serde_json::to_value(d)?,
        Payload::KeyExchange(d) => serde_json::to_value(d)?,
        Payload::KeyConfirm(d) => serde_json::to_value(d)?,
        Payload::Message(d) => serde_json::to_value(d)?,
        Payload::Error(d) => serde_json::to_value(d)?,
    };
    let raw = RawPacket {
        kind: packet.packet_type().as_str().to_string(),
        timestamp: packet.timestamp,
        data,
    };
    Ok(serde_json::to_string(&raw)?)
}

/// Decodes a JSON text frame into a [`Packet`].
///
/// # Errors
///
/// Returns `CodecError::Json` for text that is not a packet object,
/// `CodecError::UnknownType` for an unrecognized `type`, and
/// `CodecError::MalformedData` when `data` has the wrong shape.
pub fn decode(text: &str) -> Result<Packet, CodecError> {
    let raw: RawPacket = serde_json::from_str(text)?;
    let kind = PacketType::from_wire(&raw.kind).ok_or(CodecError::UnknownType(raw.kind))?;
    let malformed = |source| CodecError::MalformedData { kind, source };
    let payload = match kind {
        PacketType::Auth => Payload::Auth(serde_json::from_value(raw.data).map_err(malformed)?),
        PacketType::KeyExchange => {
            Payload::KeyExchange(serde_json::from_value(raw.data).map_err(malformed)?)
        }
        PacketType::KeyConfirm => {
            Payload::KeyConfirm(serde_json::from_value(raw.data).map_err(malformed)?)
        }
        PacketType::Message => {
            Payload::Message(serde_json::from_value(raw.data).map_err(malformed)?)
        }
        PacketType::Error => Payload::Error(serde_json::from_value(raw.data).map_err(malformed)?),
    };
    Ok(Packet {
        timestamp: raw.timestamp,
        payload,
    })
}
