//! Relay room behaviour as seen from the client side.
//!
//! Covers admission (full rooms, bad codes), fan-out exclusion with more
//! than two members, and relay-originated `error` packets surfacing as
//! session events.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use xtty::crypto::keys::KeyPair;
use xtty::session::{PeerSession, SessionConfig, SessionEvent};
use xtty::transport::ws::WsTransport;
use xtty::transport::{Transport, TransportError};
use xtty_relay::config::RelayConfig;
use xtty_relay::relay::{self, RelayState};

const WAIT: Duration = Duration::from_secs(5);
const SHORT: Duration = Duration::from_millis(300);

async fn start_relay_with(config: &RelayConfig) -> (u16, Arc<RelayState>) {
    let state = Arc::new(RelayState::with_config(config));
    let (addr, _handle) = relay::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start relay server");
    (addr.port(), state)
}

async fn start_relay() -> (u16, Arc<RelayState>) {
    start_relay_with(&RelayConfig::default()).await
}

async fn recv(t: &WsTransport) -> String {
    tokio::time::timeout(WAIT, t.recv())
        .await
        .expect("recv timed out")
        .unwrap()
}

async fn next_matching<F>(events: &mut mpsc::Receiver<SessionEvent>, pred: F) -> SessionEvent
where
    F: Fn(&SessionEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => {}
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("expected event did not arrive")
}

fn key_exchange_frame(tag: &str) -> String {
    format!(r#"{{"type":"key_exchange","timestamp":"2024-01-01T00:00:00Z","data":{{"key":"{tag}"}}}}"#)
}

// =============================================================================
// Admission
// =============================================================================

#[tokio::test]
async fn third_client_is_turned_away() {
    let (port, state) = start_relay().await;
    let _a = WsTransport::connect("127.0.0.1", port, "PAIR01").await.unwrap();
    let _b = WsTransport::connect("127.0.0.1", port, "PAIR01").await.unwrap();

    let err = WsTransport::connect("127.0.0.1", port, "PAIR01")
        .await
        .err()
        .expect("third member should be rejected");
    assert!(
        matches!(err, TransportError::Rejected { status: 409, .. }),
        "got {err:?}"
    );
    assert_eq!(state.rooms.members("PAIR01").await.unwrap().len(), 2);
}

#[tokio::test]
async fn overlong_room_code_is_bad_request() {
    let (port, _state) = start_relay().await;
    let code = "X".repeat(65);
    let err = WsTransport::connect("127.0.0.1", port, &code)
        .await
        .err()
        .expect("overlong code should be rejected");
    assert!(
        matches!(err, TransportError::Rejected { status: 400, .. }),
        "got {err:?}"
    );
}

#[tokio::test]
async fn empty_room_code_is_bad_request() {
    let (port, _state) = start_relay().await;
    let err = WsTransport::connect("127.0.0.1", port, "")
        .await
        .err()
        .expect("empty code should be rejected");
    assert!(matches!(err, TransportError::Rejected { status: 400, .. }));
}

// =============================================================================
// Fan-out
// =============================================================================

#[tokio::test]
async fn three_member_room_excludes_sender() {
    let config = RelayConfig {
        max_room_members: 0,
        ..RelayConfig::default()
    };
    let (port, _state) = start_relay_with(&config).await;
    let a = WsTransport::connect("127.0.0.1", port, "TRIO01").await.unwrap();
    let b = WsTransport::connect("127.0.0.1", port, "TRIO01").await.unwrap();
    let c = WsTransport::connect("127.0.0.1", port, "TRIO01").await.unwrap();

    let frame = key_exchange_frame("from-a");
    a.send(frame.clone()).await.unwrap();
    assert_eq!(recv(&b).await, frame);
    assert_eq!(recv(&c).await, frame);

    // A must not hear its own frame.
    assert!(tokio::time::timeout(SHORT, a.recv()).await.is_err());
}

#[tokio::test]
async fn rooms_do_not_leak_into_each_other() {
    let (port, _state) = start_relay().await;
    let a = WsTransport::connect("127.0.0.1", port, "ROOMA1").await.unwrap();
    let _a2 = WsTransport::connect("127.0.0.1", port, "ROOMA1").await.unwrap();
    let b = WsTransport::connect("127.0.0.1", port, "ROOMB1").await.unwrap();

    a.send(key_exchange_frame("room-a")).await.unwrap();
    assert!(tokio::time::timeout(SHORT, b.recv()).await.is_err());
}

// =============================================================================
// Relay errors reach the session
// =============================================================================

#[tokio::test]
async fn auth_with_wrong_key_reports_server_error() {
    let (port, state) = start_relay().await;
    let keypair = Arc::new(KeyPair::generate(1024).unwrap());
    state
        .users
        .register("alice", "-----BEGIN PUBLIC KEY-----\nsomething else\n-----END PUBLIC KEY-----\n")
        .await
        .unwrap();

    let transport = WsTransport::connect("127.0.0.1", port, "AUTH01").await.unwrap();
    let config = SessionConfig {
        username: "alice".to_string(),
        ..SessionConfig::default()
    };
    let (session, mut events) = PeerSession::new(transport, keypair, "AUTH01", config);
    let session = Arc::new(session);
    let _runner = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.run().await }
    });

    session.start().await.unwrap();
    let event = next_matching(&mut events, |e| matches!(e, SessionEvent::ServerError { .. })).await;
    assert!(matches!(event, SessionEvent::ServerError { .. }));

    // The connection survives the error.
    assert!(session.transport().is_connected());
    assert!(!session.is_closed());
}

#[tokio::test]
async fn oversized_frame_is_answered_with_error() {
    let config = RelayConfig {
        max_frame_size: 256,
        ..RelayConfig::default()
    };
    let (port, _state) = start_relay_with(&config).await;
    let a = WsTransport::connect("127.0.0.1", port, "BIG001").await.unwrap();
    let b = WsTransport::connect("127.0.0.1", port, "BIG001").await.unwrap();

    a.send(key_exchange_frame(&"k".repeat(400))).await.unwrap();

    let reply = xtty_proto::decode(&recv(&a).await).unwrap();
    assert_eq!(reply.packet_type(), xtty_proto::PacketType::Error);
    assert!(tokio::time::timeout(SHORT, b.recv()).await.is_err());
}
