//! Loopback transport for testing.
//!
//! Two endpoints joined by [`tokio::sync::mpsc`] channels stand in for two
//! clients sharing a relay room: a frame sent on one is received on the other.

use tokio::sync::{Mutex, mpsc};

use super::{Transport, TransportError, TransportType};

/// In-process transport backed by `tokio::sync::mpsc` channels.
pub struct LoopbackTransport {
    /// Delivers to the remote end's receiver.
    tx: mpsc::Sender<String>,
    /// Fed by the remote end's sender.
    rx: Mutex<mpsc::Receiver<String>>,
}

impl LoopbackTransport {
    /// Create two connected endpoints with `buffer` capacity per direction.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use xtty::transport::loopback::LoopbackTransport;
    /// use xtty::transport::Transport;
    ///
    /// # async fn example() {
    /// let (alice, bob) = LoopbackTransport::create_pair(32);
    /// alice.send("hello".to_string()).await.unwrap();
    /// assert_eq!(bob.recv().await.unwrap(), "hello");
    /// # }
    /// ```
    #[must_use]
    pub fn create_pair(buffer: usize) -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel(buffer);
        let (tx_b, rx_b) = mpsc::channel(buffer);

        let a = Self {
            tx: tx_b,
            rx: Mutex::new(rx_a),
        };
        let b = Self {
            tx: tx_a,
            rx: Mutex::new(rx_b),
        };
        (a, b)
    }
}

impl Transport for LoopbackTransport {
    async fn send(&self, frame: String) -> Result<(), TransportError> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn recv(&self) -> Result<String, TransportError> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(TransportError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Loopback
    }
}
