//! Key-exchange state machine for one connection.
//!
//! ```text
//! Connected ──begin()──▶ KeySent ──peer key──▶ Established
//!     └──────────────── peer key ─────────────────▲
//! ```
//!
//! `Established` is terminal. The peer key is published through a `watch`
//! channel exactly once, so senders waiting on the handshake wake together.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rsa::RsaPublicKey;
use tokio::sync::watch;

use crate::crypto::CryptoError;
use crate::crypto::keys::{decode_public_key, fingerprint};

/// Where a connection is in the key exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Socket is open; no key has been sent or received.
    Connected,
    /// Our public key has been sent; waiting for the peer's.
    KeySent,
    /// The peer's key is known. Messages may flow.
    Established,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::KeySent => write!(f, "key sent"),
            Self::Established => write!(f, "established"),
        }
    }
}

/// Result of feeding a peer key into [`Handshake::on_peer_key`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerKeyOutcome {
    /// The key was adopted and the handshake completed.
    Established,
    /// Already established with this same key; nothing changed.
    Duplicate,
    /// Already established with a different key. The new key is ignored.
    Conflicting {
        /// Fingerprint of the rejected key.
        fingerprint: String,
    },
}

/// Handshake state for one connection.
pub struct Handshake {
    state: Mutex<HandshakeState>,
    peer_key: watch::Sender<Option<Arc<RsaPublicKey>>>,
    out_of_order: AtomicU64,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    /// A fresh handshake in [`HandshakeState::Connected`].
    #[must_use]
    pub fn new() -> Self {
        let (peer_key, _) = watch::channel(None);
        Self {
            state: Mutex::new(HandshakeState::Connected),
            peer_key,
            out_of_order: AtomicU64::new(0),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> HandshakeState {
        *self.state.lock()
    }

    /// Whether the peer key is known.
    #[must_use]
    pub fn is_established(&self) -> bool {
        self.state() == HandshakeState::Established
    }

    /// Record that our key is being sent.
    ///
    /// Returns `true` on `Connected → KeySent`, meaning the caller should
    /// transmit `key_exchange`. Returns `false` in any other state.
    pub fn begin(&self) -> bool {
        let mut state = self.state.lock();
        if *state == HandshakeState::Connected {
            *state = HandshakeState::KeySent;
            true
        } else {
            false
        }
    }

    /// Feed a peer's PEM public key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::MalformedKey`] if the key cannot be decoded.
    /// The state is left unchanged.
    pub fn on_peer_key(&self, pem: &str) -> Result<PeerKeyOutcome, CryptoError> {
        let key = decode_public_key(pem)?;

        let mut state = self.state.lock();
        if *state == HandshakeState::Established {
            let same = self
                .peer_key
                .borrow()
                .as_deref()
                .is_some_and(|current| *current == key);
            return Ok(if same {
                PeerKeyOutcome::Duplicate
            } else {
                PeerKeyOutcome::Conflicting {
                    fingerprint: fingerprint(&key),
                }
            });
        }

        *state = HandshakeState::Established;
        self.peer_key.send_replace(Some(Arc::new(key)));
        drop(state);
        Ok(PeerKeyOutcome::Established)
    }

    /// The peer key, if established.
    #[must_use]
    pub fn peer_key(&self) -> Option<Arc<RsaPublicKey>> {
        self.peer_key.borrow().clone()
    }

    /// Wait up to `timeout` for the peer key.
    ///
    /// Returns `None` if the handshake did not complete in time.
    pub async fn wait_established(&self, timeout: Duration) -> Option<Arc<RsaPublicKey>> {
        let mut rx = self.peer_key.subscribe();
        tokio::time::timeout(timeout, async move {
            rx.wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|key| (*key).clone())
        })
        .await
        .ok()
        .flatten()
    }

    /// Count a message that arrived before the handshake completed.
    /// Returns the running total.
    pub fn note_out_of_order(&self) -> u64 {
        self.out_of_order.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Messages dropped so far for arriving early.
    #[must_use]
    pub fn out_of_order_count(&self) -> u64 {
        self.out_of_order.load(Ordering::Relaxed)
    }
}
