//! Packet types for the Xtty wire protocol.
//!
//! Every frame on the socket is a [`Packet`]: a type tag, a timestamp, and a
//! `data` object whose shape depends on the type. The relay server only ever
//! looks at the type tag; everything inside [`Payload::Message`] is opaque
//! ciphertext that only the two peers can open.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::CodecError;

/// The discriminant carried in a packet's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Client announces its identity to the server.
    Auth,
    /// A peer publishes its public key.
    KeyExchange,
    /// A peer acknowledges receipt of the other side's key.
    KeyConfirm,
    /// Hybrid-encrypted application message.
    Message,
    /// Server-side error report.
    Error,
}

impl PacketType {
    /// All recognized packet types.
    pub const ALL: [Self; 5] = [
        Self::Auth,
        Self::KeyExchange,
        Self::KeyConfirm,
        Self::Message,
        Self::Error,
    ];

    /// The string used for this type on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::KeyExchange => "key_exchange",
            Self::KeyConfirm => "key_confirm",
            Self::Message => "message",
            Self::Error => "error",
        }
    }

    /// Parses a wire type string, returning `None` for unknown types.
    #[must_use]
    pub fn from_wire(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// Whether the relay forwards this packet type to the other room members.
    #[must_use]
    pub const fn is_peer_to_peer(self) -> bool {
        matches!(self, Self::KeyExchange | Self::KeyConfirm | Self::Message)
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `data` of an `auth` packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthData {
    /// Declared username of the connecting client.
    pub username: String,
    /// The client's public key in PEM form.
    pub public_key: String,
}

/// `data` of a `key_exchange` packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyExchangeData {
    /// Sender's public key in PEM form.
    pub key: String,
}

/// `data` of a `key_confirm` packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyConfirmData {
    /// Declared identity of the confirming peer.
    pub from: String,
}

/// `data` of a `message` packet.
///
/// All binary fields are standard base64 so the packet stays valid JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageData {
    /// AEAD ciphertext with the nonce prepended.
    pub content: String,
    /// Symmetric key wrapped under the recipient's public key.
    pub key: String,
    /// Sender's signature over the raw ciphertext blob.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl MessageData {
    /// Builds message data from raw ciphertext parts.
    #[must_use]
    pub fn from_parts(ciphertext: &[u8], wrapped_key: &[u8], signature: Option<&[u8]>) -> Self {
        Self {
            content: STANDARD.encode(ciphertext),
            key: STANDARD.encode(wrapped_key),
            signature: signature.map(|s| STANDARD.encode(s)),
        }
    }

    /// Decodes the ciphertext blob.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Base64`] if `content` is not valid base64.
    pub fn ciphertext(&self) -> Result<Vec<u8>, CodecError> {
        decode_field("content", &self.content)
    }

    /// Decodes the wrapped symmetric key.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Base64`] if `key` is not valid base64.
    pub fn wrapped_key(&self) -> Result<Vec<u8>, CodecError> {
        decode_field("key", &self.key)
    }

    /// Decodes the signature, if one was attached.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Base64`] if `signature` is present but not
    /// valid base64.
    pub fn signature(&self) -> Result<Option<Vec<u8>>, CodecError> {
        self.signature
            .as_deref()
            .map(|s| decode_field("signature", s))
            .transpose()
    }
}

fn decode_field(field: &'static str, value: &str) -> Result<Vec<u8>, CodecError> {
    STANDARD
        .decode(value)
        .map_err(|source| CodecError::Base64 { field, source })
}

/// `data` of an `error` packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    /// Human-readable description.
    pub reason: String,
}

/// Typed packet body, one variant per [`PacketType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// `auth`
    Auth(AuthData),
    /// `key_exchange`
    KeyExchange(KeyExchangeData),
    /// `key_confirm`
    KeyConfirm(KeyConfirmData),
    /// `message`
    Message(MessageData),
    /// `error`
    Error(ErrorData),
}

impl Payload {
    /// Returns the wire type of this payload.
    #[must_use]
    pub const fn packet_type(&self) -> PacketType {
        match self {
            Self::Auth(_) => PacketType::Auth,
            Self::KeyExchange(_) => PacketType::KeyExchange,
            Self::KeyConfirm(_) => PacketType::KeyConfirm,
            Self::Message(_) => PacketType::Message,
            Self::Error(_) => PacketType::Error,
        }
    }
}

/// A complete wire packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// When the sender created the packet.
    pub timestamp: DateTime<Utc>,
    /// Type-specific body.
    pub payload: Payload,
}

impl Packet {
    /// Creates a packet stamped with the current time.
    #[must_use]
    pub fn new(payload: Payload) -> Self {
        Self {
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Returns the wire type of this packet.
    #[must_use]
    pub const fn packet_type(&self) -> PacketType {
        self.payload.packet_type()
    }

    /// An `auth` packet.
    #[must_use]
    pub fn auth(username: impl Into<String>, public_key: impl Into<String>) -> Self {
        Self::new(Payload::Auth(AuthData {
            username: username.into(),
            public_key: public_key.into(),
        }))
    }

    /// A `key_exchange` packet carrying a PEM public key.
    #[must_use]
    pub fn key_exchange(key: impl Into<String>) -> Self {
        Self::new(Payload::KeyExchange(KeyExchangeData { key: key.into() }))
    }

    /// A `key_confirm` packet.
    #[must_use]
    pub fn key_confirm(from: impl Into<String>) -> Self {
        Self::new(Payload::KeyConfirm(KeyConfirmData { from: from.into() }))
    }

    /// A `message` packet.
    #[must_use]
    pub const fn message(timestamp: DateTime<Utc>, data: MessageData) -> Self {
        Self {
            timestamp,
            payload: Payload::Message(data),
        }
    }

    /// An `error` packet.
    #[must_use]
    pub fn error(reason: impl Into<String>) -> Self {
        Self::new(Payload::Error(ErrorData {
            reason: reason.into(),
        }))
    }
}
