//! WebSocket transport into a relay room.
//!
//! [`WsTransport::connect`] opens `ws://host:port/ws?room=CODE`. The relay
//! admits the connection before upgrading, so a full room or a bad code
//! comes back as an HTTP error and surfaces here as
//! [`TransportError::Rejected`]. After that, text frames flow both ways and
//! the relay forwards them verbatim to the other member.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{Transport, TransportError, TransportType};

type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Default timeout for connecting to the relay.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the channel between the reader task and [`Transport::recv`].
const INCOMING_BUFFER: usize = 256;

/// WebSocket connection to one relay room.
pub struct WsTransport {
    url: String,
    room: String,
    ws_sender: Arc<Mutex<WsSender>>,
    incoming: Mutex<mpsc::Receiver<String>>,
    connected: Arc<AtomicBool>,
    _reader_handle: tokio::task::JoinHandle<()>,
}

impl WsTransport {
    /// Connect to `room` on the relay at `host:port`.
    ///
    /// # Errors
    ///
    /// - [`TransportError::InvalidUrl`] if `host` does not form a valid URL.
    /// - [`TransportError::Timeout`] if the connection is not up within 10s.
    /// - [`TransportError::Rejected`] if the relay answers with an HTTP error
    ///   (full room, missing code).
    /// - [`TransportError::Io`] or [`TransportError::WebSocket`] otherwise.
    pub async fn connect(host: &str, port: u16, room: &str) -> Result<Self, TransportError> {
        let url = room_url(host, port, room)?;
        Self::connect_url(&url, room).await
    }

    async fn connect_url(url: &str, room: &str) -> Result<Self, TransportError> {
        let (ws_stream, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url))
            .await
            .map_err(|_| {
                tracing::warn!(url, "relay connect timed out");
                TransportError::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(url, err = %e, "relay connect failed");
                map_ws_connect_error(e)
            })?;

        let (ws_sender, ws_reader) = ws_stream.split();

        let (tx, rx) = mpsc::channel(INCOMING_BUFFER);
        let connected = Arc::new(AtomicBool::new(true));
        let reader_handle = tokio::spawn(reader_loop(ws_reader, tx, Arc::clone(&connected)));

        tracing::info!(url, room, "connected to relay room");

        Ok(Self {
            url: url.to_string(),
            room: room.to_string(),
            ws_sender: Arc::new(Mutex::new(ws_sender)),
            incoming: Mutex::new(rx),
            connected,
            _reader_handle: reader_handle,
        })
    }

    /// The full WebSocket URL this transport connected to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The room code this transport joined.
    #[must_use]
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Send a close frame and mark the transport disconnected.
    pub async fn close(&self) {
        self.connected.store(false, Ordering::Relaxed);
        let mut sender = self.ws_sender.lock().await;
        if let Err(e) = sender.close().await {
            tracing::debug!(err = %e, "error closing relay websocket");
        }
    }
}

impl Transport for WsTransport {
    async fn send(&self, frame: String) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(TransportError::ConnectionClosed);
        }

        let mut sender = self.ws_sender.lock().await;
        sender.send(Message::Text(frame.into())).await.map_err(|e| {
            tracing::warn!(err = %e, "relay send failed");
            self.connected.store(false, Ordering::Relaxed);
            TransportError::ConnectionClosed
        })
    }

    async fn recv(&self) -> Result<String, TransportError> {
        let mut rx = self.incoming.lock().await;
        rx.recv().await.ok_or(TransportError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Relay
    }
}

/// Build `ws://host:port/ws?room=CODE` with the code percent-encoded.
///
/// # Errors
///
/// Returns [`TransportError::InvalidUrl`] if `host` is not a valid host.
pub fn room_url(host: &str, port: u16, room: &str) -> Result<String, TransportError> {
    let mut url = url::Url::parse(&format!("ws://{host}:{port}/ws"))
        .map_err(|e| TransportError::InvalidUrl(format!("{host}:{port}: {e}")))?;
    url.query_pairs_mut().append_pair("room", room);
    Ok(url.into())
}

/// Forwards text frames into `tx` until the socket closes.
///
/// Binary and control frames are skipped. Clears `connected` on exit.
async fn reader_loop(mut ws_reader: WsReader, tx: mpsc::Sender<String>, connected: Arc<AtomicBool>) {
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                if tx.send(text.as_str().to_owned()).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(frame)) => {
                tracing::info!(?frame, "relay closed the connection");
                break;
            }
            Ok(Message::Binary(data)) => {
                tracing::debug!(len = data.len(), "ignoring binary frame from relay");
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
            Err(e) => {
                tracing::warn!(err = %e, "relay read error");
                break;
            }
        }
    }
    connected.store(false, Ordering::Relaxed);
    tracing::info!("relay reader task exiting");
}

/// Map a `tokio_tungstenite` connection error to a [`TransportError`].
fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => TransportError::Io(io_err),
        WsError::Http(response) => {
            let reason = response
                .body()
                .as_deref()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default();
            TransportError::Rejected {
                status: response.status().as_u16(),
                reason,
            }
        }
        WsError::Url(e) => TransportError::InvalidUrl(e.to_string()),
        other => TransportError::WebSocket(other.to_string()),
    }
}
