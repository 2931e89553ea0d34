//! Transport layer abstraction for Xtty.
//!
//! A [`Transport`] carries encoded protocol frames (JSON text) between this
//! client and the other member of its room. Implementations:
//! - [`ws::WsTransport`] connects to a relay room over WebSocket
//! - [`loopback::LoopbackTransport`] is an in-process pair for tests

pub mod loopback;
pub mod ws;

use std::fmt;

/// Describes which kind of transport is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// Relay room over WebSocket.
    Relay,
    /// In-process loopback for testing.
    Loopback,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relay => write!(f, "Relay"),
            Self::Loopback => write!(f, "Loopback"),
        }
    }
}

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation timed out before completing.
    #[error("transport operation timed out")]
    Timeout,

    /// The relay refused the connection before the upgrade.
    #[error("relay rejected connection ({status}): {reason}")]
    Rejected {
        /// HTTP status code returned by the relay.
        status: u16,
        /// Response body, if any.
        reason: String,
    },

    /// The relay address could not be turned into a WebSocket URL.
    #[error("invalid relay url: {0}")]
    InvalidUrl(String),

    /// An underlying I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A WebSocket protocol error.
    #[error("websocket error: {0}")]
    WebSocket(String),
}

/// Async transport for protocol frames.
///
/// Frames are already-encoded packets. The transport never inspects them;
/// only the session layer encodes and decodes.
pub trait Transport: Send + Sync {
    /// Send one frame.
    ///
    /// Returns once the frame has been handed to the underlying connection.
    /// This does not mean the peer received it.
    fn send(
        &self,
        frame: String,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Receive the next frame. Waits until one arrives or the connection ends.
    fn recv(&self) -> impl std::future::Future<Output = Result<String, TransportError>> + Send;

    /// Whether the underlying connection is still up.
    fn is_connected(&self) -> bool;

    /// Return the type of this transport.
    fn transport_type(&self) -> TransportType;
}
