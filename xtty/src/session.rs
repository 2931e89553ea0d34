//! Peer session: one room connection with its handshake, keys, and log.
//!
//! [`PeerSession`] drives the send pipeline (wait for handshake -> encrypt
//! -> sign -> encode -> transmit -> log) and dispatches incoming frames.
//! Anything the front end should know about is reported as a
//! [`SessionEvent`] on the channel returned by [`PeerSession::new`].
//!
//! A session is shared between the task running [`PeerSession::run`] and
//! callers of [`PeerSession::send`], so it is normally held in an `Arc`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rsa::RsaPublicKey;
use tokio::sync::mpsc;

use xtty_proto::codec::{self, CodecError};
use xtty_proto::packet::{MessageData, Packet, Payload};

use crate::crypto::keys::{KeyPair, fingerprint};
use crate::crypto::{CryptoError, hybrid, signature};
use crate::handshake::{Handshake, HandshakeState, PeerKeyOutcome};
use crate::transport::{Transport, TransportError};

/// Name shown for received messages before the peer has confirmed.
const UNKNOWN_PEER: &str = "peer";

/// Errors returned by session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The peer's key did not arrive in time.
    #[error("handshake did not complete within {0:?}")]
    HandshakeTimeout(Duration),

    /// Encryption or signing failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// A packet could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The session's connection has ended.
    #[error("session closed")]
    Closed,
}

/// Session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name announced in `auth` and `key_confirm`.
    pub username: String,
    /// How long [`PeerSession::send`] waits for the handshake.
    pub handshake_timeout: Duration,
    /// Capacity of the event channel.
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            username: "anonymous".to_string(),
            handshake_timeout: Duration::from_secs(5),
            event_buffer: 64,
        }
    }
}

// ---------------------------------------------------------------------------
// Message log
// ---------------------------------------------------------------------------

/// Whether a log entry was sent or received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Sent by this client.
    Sent,
    /// Received from the peer.
    Received,
}

/// One decrypted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Plaintext.
    pub content: String,
    /// Timestamp carried by the envelope.
    pub timestamp: DateTime<Utc>,
    /// Sent or received.
    pub direction: Direction,
    /// Declared sender name.
    pub sender: String,
}

/// Append-only message log. Readers get copies.
#[derive(Debug, Default)]
pub struct MessageLog {
    entries: RwLock<Vec<LogEntry>>,
}

impl MessageLog {
    /// An empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn push(&self, entry: LogEntry) {
        self.entries.write().push(entry);
    }

    /// Copy of every entry in arrival order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.read().clone()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the log has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Notifications for the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The peer's key was adopted.
    Established {
        /// Fingerprint of the peer key.
        fingerprint: String,
    },
    /// The peer confirmed it has our key.
    PeerConfirmed {
        /// Name the peer announced.
        from: String,
    },
    /// A message was decrypted and logged.
    MessageReceived(LogEntry),
    /// A message could not be decrypted and was dropped.
    DecryptionFailed {
        /// What went wrong.
        reason: String,
    },
    /// A message signature did not verify; the frame was dropped.
    SignatureInvalid,
    /// The relay sent an `error` packet.
    ServerError {
        /// Reason given by the relay.
        reason: String,
    },
    /// A frame could not be decoded and was dropped.
    ProtocolViolation {
        /// Decode error.
        reason: String,
    },
    /// A message arrived before the handshake finished and was dropped.
    OutOfOrderMessage {
        /// Total dropped so far.
        count: u64,
    },
    /// The peer sent a key that could not be decoded.
    PeerKeyRejected {
        /// Decode error.
        reason: String,
    },
    /// After establishing, the peer sent a different key. It was ignored.
    PeerKeyConflict {
        /// Fingerprint of the ignored key.
        fingerprint: String,
    },
    /// The connection ended.
    Disconnected,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A client's connection to one room.
pub struct PeerSession<T: Transport> {
    transport: T,
    keypair: Arc<KeyPair>,
    room: String,
    config: SessionConfig,
    handshake: Handshake,
    log: MessageLog,
    peer_name: Mutex<Option<String>>,
    /// Held while answering a peer key so no message overtakes our key.
    send_order: tokio::sync::Mutex<()>,
    event_tx: mpsc::Sender<SessionEvent>,
    closed: AtomicBool,
}

impl<T: Transport> PeerSession<T> {
    /// Create a session over an already connected transport.
    ///
    /// Returns the session and the receiver for its [`SessionEvent`]s.
    pub fn new(
        transport: T,
        keypair: Arc<KeyPair>,
        room: impl Into<String>,
        config: SessionConfig,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));
        let session = Self {
            transport,
            keypair,
            room: room.into(),
            config,
            handshake: Handshake::new(),
            log: MessageLog::new(),
            peer_name: Mutex::new(None),
            send_order: tokio::sync::Mutex::new(()),
            event_tx,
            closed: AtomicBool::new(false),
        };
        (session, event_rx)
    }

    /// Announce ourselves to the relay and offer our key to the room.
    ///
    /// Sends `auth` and then, unless the peer's key already arrived,
    /// `key_exchange`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if a packet cannot be encoded or sent.
    pub async fn start(&self) -> Result<(), SessionError> {
        let public_key = self.keypair.public_key_pem()?;
        self.transmit(&Packet::auth(&self.config.username, public_key))
            .await?;
        if self.handshake.begin() {
            self.send_key_exchange().await?;
            tracing::debug!(room = %self.room, "key exchange sent");
        }
        Ok(())
    }

    /// Encrypt and send `plaintext` to the peer.
    ///
    /// Waits up to the configured handshake timeout for the peer's key.
    /// Returns the entry appended to the log.
    ///
    /// # Errors
    ///
    /// - [`SessionError::HandshakeTimeout`] if the peer key never arrived.
    /// - [`SessionError::Closed`] if the connection has ended.
    /// - [`SessionError::Crypto`], [`SessionError::Codec`], or
    ///   [`SessionError::Transport`] if a pipeline step fails.
    pub async fn send(&self, plaintext: &str) -> Result<LogEntry, SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }

        let timeout = self.config.handshake_timeout;
        let peer = match self.handshake.peer_key() {
            Some(key) => key,
            None => self
                .handshake
                .wait_established(timeout)
                .await
                .ok_or(SessionError::HandshakeTimeout(timeout))?,
        };

        let sealed = hybrid::encrypt(plaintext.as_bytes(), &peer)?;
        let sig = signature::sign(&sealed.blob, self.keypair.private_key())?;
        let data = MessageData::from_parts(&sealed.blob, &sealed.wrapped_key, Some(&sig));

        let timestamp = Utc::now();
        {
            let _order = self.send_order.lock().await;
            self.transmit(&Packet::message(timestamp, data)).await?;
        }

        let entry = LogEntry {
            content: plaintext.to_string(),
            timestamp,
            direction: Direction::Sent,
            sender: self.config.username.clone(),
        };
        self.log.push(entry.clone());
        Ok(entry)
    }

    /// Receive and handle one frame.
    ///
    /// Bad frames are reported as events and do not fail the call.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] once the transport has ended, or a
    /// transport error if replying to the peer's key fails.
    pub async fn receive_one(&self) -> Result<(), SessionError> {
        let frame = match self.transport.recv().await {
            Ok(frame) => frame,
            Err(e) => {
                tracing::info!(room = %self.room, err = %e, "session transport ended");
                self.mark_closed();
                return Err(SessionError::Closed);
            }
        };
        self.handle_frame(&frame).await
    }

    /// Handle frames until the connection ends.
    pub async fn run(&self) {
        loop {
            match self.receive_one().await {
                Ok(()) => {}
                Err(SessionError::Closed) => break,
                Err(e) => {
                    tracing::warn!(room = %self.room, err = %e, "error handling frame");
                    if !self.transport.is_connected() {
                        self.mark_closed();
                        break;
                    }
                }
            }
        }
    }

    /// Room code this session joined.
    #[must_use]
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Local username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.config.username
    }

    /// Handshake progress.
    #[must_use]
    pub fn state(&self) -> HandshakeState {
        self.handshake.state()
    }

    /// Whether the peer key is known.
    #[must_use]
    pub fn is_established(&self) -> bool {
        self.handshake.is_established()
    }

    /// Whether the connection has ended.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Our key fingerprint.
    #[must_use]
    pub fn local_fingerprint(&self) -> String {
        self.keypair.fingerprint()
    }

    /// The peer's public key, once established.
    #[must_use]
    pub fn peer_key(&self) -> Option<Arc<RsaPublicKey>> {
        self.handshake.peer_key()
    }

    /// The peer key fingerprint, once established.
    #[must_use]
    pub fn peer_fingerprint(&self) -> Option<String> {
        self.handshake.peer_key().map(|k| fingerprint(&k))
    }

    /// Name the peer announced in `key_confirm`, if any.
    #[must_use]
    pub fn peer_name(&self) -> Option<String> {
        self.peer_name.lock().clone()
    }

    /// The message log.
    #[must_use]
    pub const fn log(&self) -> &MessageLog {
        &self.log
    }

    /// Copy of the message log.
    #[must_use]
    pub fn messages(&self) -> Vec<LogEntry> {
        self.log.snapshot()
    }

    /// Messages dropped for arriving before the handshake.
    #[must_use]
    pub fn out_of_order_count(&self) -> u64 {
        self.handshake.out_of_order_count()
    }

    /// The underlying transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    // -- incoming ------------------------------------------------------------

    async fn handle_frame(&self, frame: &str) -> Result<(), SessionError> {
        let packet = match codec::decode(frame) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(room = %self.room, err = %e, "dropping undecodable frame");
                self.emit(SessionEvent::ProtocolViolation {
                    reason: e.to_string(),
                });
                return Ok(());
            }
        };

        match packet.payload {
            Payload::KeyExchange(data) => self.on_key_exchange(&data.key).await?,
            Payload::KeyConfirm(data) => {
                tracing::debug!(room = %self.room, from = %data.from, "peer confirmed key");
                *self.peer_name.lock() = Some(data.from.clone());
                self.emit(SessionEvent::PeerConfirmed { from: data.from });
            }
            Payload::Message(data) => self.on_message(packet.timestamp, &data),
            Payload::Error(data) => {
                tracing::warn!(room = %self.room, reason = %data.reason, "relay reported an error");
                self.emit(SessionEvent::ServerError {
                    reason: data.reason,
                });
            }
            Payload::Auth(_) => {
                tracing::debug!(room = %self.room, "ignoring auth frame from peer");
            }
        }
        Ok(())
    }

    async fn on_key_exchange(&self, pem: &str) -> Result<(), SessionError> {
        let _order = self.send_order.lock().await;
        match self.handshake.on_peer_key(pem) {
            Ok(PeerKeyOutcome::Established) => {
                let fingerprint = self.peer_fingerprint().unwrap_or_default();
                tracing::info!(room = %self.room, peer = %fingerprint, "secure channel established");
                self.emit(SessionEvent::Established { fingerprint });

                // A peer that joined after our first key_exchange never saw it.
                self.send_key_exchange().await?;
                self.transmit(&Packet::key_confirm(&self.config.username))
                    .await?;
            }
            Ok(PeerKeyOutcome::Duplicate) => {
                tracing::debug!(room = %self.room, "ignoring repeated peer key");
            }
            Ok(PeerKeyOutcome::Conflicting { fingerprint }) => {
                tracing::warn!(room = %self.room, key = %fingerprint, "peer sent a different key after establishment");
                self.emit(SessionEvent::PeerKeyConflict { fingerprint });
            }
            Err(e) => {
                tracing::warn!(room = %self.room, err = %e, "peer key rejected");
                self.emit(SessionEvent::PeerKeyRejected {
                    reason: e.to_string(),
                });
            }
        }
        Ok(())
    }

    fn on_message(&self, timestamp: DateTime<Utc>, data: &MessageData) {
        let Some(peer) = self.handshake.peer_key() else {
            let count = self.handshake.note_out_of_order();
            tracing::warn!(room = %self.room, count, "message before handshake, dropping");
            self.emit(SessionEvent::OutOfOrderMessage { count });
            return;
        };

        let (blob, wrapped_key, sig) = match message_parts(data) {
            Ok(parts) => parts,
            Err(e) => {
                tracing::warn!(room = %self.room, err = %e, "message fields are not valid base64");
                self.emit(SessionEvent::ProtocolViolation {
                    reason: e.to_string(),
                });
                return;
            }
        };

        if let Some(sig) = sig {
            if signature::verify(&blob, &sig, &peer).is_err() {
                tracing::warn!(room = %self.room, "message signature invalid, dropping");
                self.emit(SessionEvent::SignatureInvalid);
                return;
            }
        }

        match self.open(&blob, &wrapped_key) {
            Ok(content) => {
                let entry = LogEntry {
                    content,
                    timestamp,
                    direction: Direction::Received,
                    sender: self
                        .peer_name()
                        .unwrap_or_else(|| UNKNOWN_PEER.to_string()),
                };
                self.log.push(entry.clone());
                self.emit(SessionEvent::MessageReceived(entry));
            }
            Err(reason) => {
                tracing::warn!(room = %self.room, %reason, "message could not be decrypted");
                self.emit(SessionEvent::DecryptionFailed { reason });
            }
        }
    }

    fn open(&self, blob: &[u8], wrapped_key: &[u8]) -> Result<String, String> {
        let plaintext = hybrid::decrypt(blob, wrapped_key, self.keypair.private_key())
            .map_err(|e| e.to_string())?;
        String::from_utf8(plaintext).map_err(|_| "plaintext is not valid UTF-8".to_string())
    }

    // -- outgoing ------------------------------------------------------------

    async fn send_key_exchange(&self) -> Result<(), SessionError> {
        let pem = self.keypair.public_key_pem()?;
        self.transmit(&Packet::key_exchange(pem)).await
    }

    async fn transmit(&self, packet: &Packet) -> Result<(), SessionError> {
        let frame = codec::encode(packet)?;
        self.transport.send(frame).await?;
        Ok(())
    }

    fn mark_closed(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.emit(SessionEvent::Disconnected);
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.event_tx.try_send(event).is_err() {
            tracing::debug!(room = %self.room, "session event dropped (receiver full or gone)");
        }
    }
}

/// Ciphertext, wrapped key, and optional signature of a `message` packet.
type MessageParts = (Vec<u8>, Vec<u8>, Option<Vec<u8>>);

fn message_parts(data: &MessageData) -> Result<MessageParts, CodecError> {
    Ok((data.ciphertext()?, data.wrapped_key()?, data.signature()?))
}
