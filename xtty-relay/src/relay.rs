//! Relay server core: shared state, WebSocket handler, and HTTP endpoints.
//!
//! Clients connect to `/ws?room=CODE`. The connection is admitted into the
//! room before the upgrade completes, so a full room or a bad code is
//! rejected with a plain HTTP status. Once upgraded, every `key_exchange`,
//! `key_confirm`, and `message` frame is forwarded verbatim to the other
//! members of the room. The relay never inspects message contents.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::body::Bytes;
use axum::extract::ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use xtty_proto::packet::{AuthData, Packet, Payload};
use xtty_proto::{codec, room_code};

use crate::config::RelayConfig;
use crate::rooms::{ConnectionId, Membership, RoomRegistry};
use crate::users::{DirectoryError, KeyCheck, UserDirectory};

/// Frames up to this multiple of `max_frame_size` are read and answered
/// with an error; anything larger fails the read and drops the connection.
const HARD_FRAME_FACTOR: usize = 4;

/// How often [`RelayState::drained`] checks for remaining rooms.
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Shared relay server state.
pub struct RelayState {
    /// Active rooms and their members.
    pub rooms: RoomRegistry,
    /// Usernames registered through `POST /register`.
    pub users: UserDirectory,
    max_frame_size: usize,
    write_timeout: Duration,
    outbound_queue: usize,
    heartbeat_interval: Duration,
    shutdown: watch::Sender<bool>,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates a relay state with the default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&RelayConfig::default())
    }

    /// Creates a relay state using the limits from a resolved config.
    #[must_use]
    pub fn with_config(config: &RelayConfig) -> Self {
        let defaults = RelayConfig::default();
        let non_zero = |value: Duration, fallback: Duration| {
            if value.is_zero() { fallback } else { value }
        };
        Self {
            rooms: RoomRegistry::with_max_members(config.max_room_members),
            users: UserDirectory::new(),
            max_frame_size: config.max_frame_size,
            write_timeout: non_zero(config.write_timeout, defaults.write_timeout),
            outbound_queue: config.outbound_queue.max(1),
            heartbeat_interval: non_zero(config.heartbeat_interval, defaults.heartbeat_interval),
            shutdown: watch::Sender::new(false),
        }
    }

    /// Stops accepting connections and closes every open socket.
    pub fn begin_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Whether [`begin_shutdown`](Self::begin_shutdown) has been called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Resolves once shutdown has begun.
    pub fn shutdown_requested(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.shutdown.subscribe();
        async move {
            let _ = rx.wait_for(|stop| *stop).await;
        }
    }

    /// Resolves once every room is gone.
    pub async fn drained(&self) {
        while self.rooms.room_count().await > 0 {
            tokio::time::sleep(DRAIN_POLL).await;
        }
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

/// Builds the relay's HTTP router.
pub fn router(state: Arc<RelayState>) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .route("/register", axum::routing::post(register_handler))
        .route("/status", axum::routing::get(status_handler))
        .route("/rooms/{code}", axum::routing::get(room_handler))
        .with_state(state)
}

/// Starts the relay server on the given address with default state and
/// returns the bound address and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// The server stops accepting connections once
/// [`RelayState::begin_shutdown`] is called, and the returned task ends
/// when in-flight HTTP requests finish. Open WebSockets close themselves;
/// wait on [`RelayState::drained`] for them.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let shutdown = state.shutdown_requested();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

#[derive(Debug, serde::Deserialize)]
struct RoomQuery {
    room: Option<String>,
}

/// Validates the room code, admits the connection, then upgrades.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<RoomQuery>,
    State(state): State<Arc<RelayState>>,
) -> Response {
    if state.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "relay is shutting down").into_response();
    }

    let raw = query.room.unwrap_or_default();
    let code = match room_code::normalize(&raw) {
        Ok(code) => code.to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "rejecting connection with invalid room code");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    let conn = ConnectionId::new();
    let (tx, rx) = mpsc::channel(state.outbound_queue);
    // The registry owns the only strong sender; eviction closes the writer.
    let reply = tx.downgrade();
    let membership = match state.rooms.join(&code, conn, tx).await {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(room = %code, error = %e, "rejecting connection");
            return (StatusCode::CONFLICT, e.to_string()).into_response();
        }
    };

    let failed_state = Arc::clone(&state);
    let failed_membership = membership.clone();
    ws.max_message_size(state.max_frame_size.saturating_mul(HARD_FRAME_FACTOR))
        .on_failed_upgrade(move |e| {
            tracing::warn!(error = %e, "WebSocket upgrade failed");
            tokio::spawn(async move {
                failed_state
                    .rooms
                    .leave(&failed_membership.code, failed_membership.conn)
                    .await;
            });
        })
        .on_upgrade(move |socket| handle_socket(socket, state, membership, rx, reply))
}

/// Runs an admitted connection until either direction fails.
///
/// A writer task drains the member's outbound queue onto the socket with a
/// per-frame deadline and sends periodic pings. A reader task decodes and
/// routes incoming frames. When either finishes the other is aborted and
/// the member leaves its room.
pub async fn handle_socket(
    socket: WebSocket,
    state: Arc<RelayState>,
    membership: Membership,
    mut outbound: mpsc::Receiver<Message>,
    reply: mpsc::WeakSender<Message>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    tracing::info!(room = %membership.code, conn = %membership.conn, "connection open");

    let write_timeout = state.write_timeout;
    let heartbeat = state.heartbeat_interval;
    let writer_conn = membership.conn;
    let mut stop = state.shutdown.subscribe();
    let mut write_task = tokio::spawn(async move {
        let mut pings = tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);
        loop {
            let msg = tokio::select! {
                next = outbound.recv() => match next {
                    Some(msg) => msg,
                    None => break,
                },
                _ = pings.tick() => Message::Ping(Bytes::new()),
                _ = stop.wait_for(|stop| *stop) => {
                    tracing::debug!(conn = %writer_conn, "closing for shutdown");
                    break;
                }
            };
            match tokio::time::timeout(write_timeout, ws_sender.send(msg)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(conn = %writer_conn, error = %e, "WebSocket write failed");
                    break;
                }
                Err(_) => {
                    tracing::warn!(conn = %writer_conn, "WebSocket write timed out");
                    break;
                }
            }
        }
        let _ = tokio::time::timeout(write_timeout, ws_sender.close()).await;
    });

    let reader_state = Arc::clone(&state);
    let reader_membership = membership.clone();
    let mut read_task = tokio::spawn(async move {
        while let Some(frame) = ws_receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    handle_text_frame(&reader_state, &reader_membership, &reply, text).await;
                }
                Ok(Message::Binary(data)) => {
                    tracing::warn!(
                        conn = %reader_membership.conn,
                        len = data.len(),
                        "dropping binary frame"
                    );
                }
                Ok(Message::Close(_)) => {
                    tracing::debug!(conn = %reader_membership.conn, "received close frame");
                    break;
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {}
                Err(e) => {
                    tracing::debug!(conn = %reader_membership.conn, error = %e, "read failed");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.rooms.leave(&membership.code, membership.conn).await;
    tracing::info!(room = %membership.code, conn = %membership.conn, "connection closed");
}

/// Routes one text frame from a member.
async fn handle_text_frame(
    state: &RelayState,
    membership: &Membership,
    reply: &mpsc::WeakSender<Message>,
    text: Utf8Bytes,
) {
    let len = text.as_str().len();
    if len > state.max_frame_size {
        tracing::warn!(
            conn = %membership.conn,
            size = len,
            max = state.max_frame_size,
            "frame exceeds size limit"
        );
        send_error(
            reply,
            format!("frame too large: {len} bytes (max {})", state.max_frame_size),
        );
        return;
    }

    let packet = match codec::decode(text.as_str()) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(conn = %membership.conn, error = %e, "dropping undecodable frame");
            return;
        }
    };

    let kind = packet.packet_type();
    match packet.payload {
        Payload::Auth(auth) => handle_auth(state, membership, reply, &auth).await,
        Payload::Error(_) => {
            tracing::warn!(conn = %membership.conn, "client sent an error packet, dropping");
        }
        Payload::KeyExchange(_) | Payload::KeyConfirm(_) | Payload::Message(_) => {
            match state
                .rooms
                .relay(&membership.code, membership.conn, &Message::Text(text))
                .await
            {
                Ok(outcome) => tracing::debug!(
                    room = %membership.code,
                    conn = %membership.conn,
                    kind = %kind,
                    delivered = outcome.delivered,
                    evicted = outcome.evicted.len(),
                    "relayed frame"
                ),
                Err(e) => {
                    tracing::warn!(conn = %membership.conn, error = %e, "relay failed");
                }
            }
        }
    }
}

/// Labels the connection and checks the key against any registration.
async fn handle_auth(
    state: &RelayState,
    membership: &Membership,
    reply: &mpsc::WeakSender<Message>,
    auth: &AuthData,
) {
    let username = auth.username.trim();
    if username.is_empty() {
        send_error(reply, "auth username must not be empty".to_string());
        return;
    }

    state
        .rooms
        .set_username(&membership.code, membership.conn, username)
        .await;

    match state.users.check_key(username, &auth.public_key).await {
        KeyCheck::Matches => {
            tracing::info!(conn = %membership.conn, username = %username, "authenticated");
        }
        KeyCheck::Unregistered => {
            tracing::debug!(conn = %membership.conn, username = %username, "unregistered user");
        }
        KeyCheck::Mismatch => {
            tracing::warn!(
                conn = %membership.conn,
                username = %username,
                "auth key does not match registration"
            );
            send_error(
                reply,
                format!("public key does not match the registration for {username}"),
            );
        }
    }
}

/// Queues an `error` packet back to the connection that caused it.
fn send_error(reply: &mpsc::WeakSender<Message>, reason: String) {
    let Some(tx) = reply.upgrade() else {
        return;
    };
    match codec::encode(&Packet::error(reason)) {
        Ok(text) => {
            if tx.try_send(Message::Text(text.into())).is_err() {
                tracing::debug!("could not queue error reply");
            }
        }
        Err(e) => tracing::error!(error = %e, "failed to encode error packet"),
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

#[derive(Debug, serde::Deserialize)]
struct RegisterRequest {
    username: String,
    public_key: String,
}

async fn register_handler(State(state): State<Arc<RelayState>>, body: Bytes) -> Response {
    let Ok(req) = serde_json::from_slice::<RegisterRequest>(&body) else {
        return (StatusCode::BAD_REQUEST, "Invalid request body").into_response();
    };

    match state.users.register(&req.username, &req.public_key).await {
        Ok(()) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "message": "User registered successfully" })),
        )
            .into_response(),
        Err(e @ DirectoryError::UsernameTaken(_)) => {
            (StatusCode::CONFLICT, e.to_string()).into_response()
        }
        Err(e @ DirectoryError::EmptyField(_)) => {
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}

async fn status_handler() -> &'static str {
    "Server is running"
}

async fn room_handler(
    State(state): State<Arc<RelayState>>,
    Path(code): Path<String>,
) -> Response {
    match state.rooms.members(&code).await {
        Ok(members) => Json(serde_json::json!({
            "code": code,
            "members": members.len(),
        }))
        .into_response(),
        Err(e) => (StatusCode::NOT_FOUND, e.to_string()).into_response(),
    }
}
