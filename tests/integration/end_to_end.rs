//! End-to-end conversation through a real in-process relay.
//!
//! Two clients join room `ABC123`, exchange keys, and trade one message
//! each way. The relay only ever sees ciphertext.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use xtty::crypto::keys::KeyPair;
use xtty::handshake::HandshakeState;
use xtty::session::{Direction, LogEntry, PeerSession, SessionConfig, SessionEvent};
use xtty::transport::Transport;
use xtty::transport::ws::WsTransport;
use xtty_relay::config::RelayConfig;
use xtty_relay::relay::{self, RelayState};

const WAIT: Duration = Duration::from_secs(10);
const TEST_BITS: usize = 1024;

type Session = Arc<PeerSession<WsTransport>>;

async fn start_relay() -> (u16, Arc<RelayState>, tokio::task::JoinHandle<()>) {
    start_relay_with(&RelayConfig::default()).await
}

async fn start_relay_with(
    config: &RelayConfig,
) -> (u16, Arc<RelayState>, tokio::task::JoinHandle<()>) {
    let state = Arc::new(RelayState::with_config(config));
    let (addr, handle) = relay::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start relay server");
    (addr.port(), state, handle)
}

/// Connect a client to `room`, spawn its read loop, and send auth + key.
async fn join(
    port: u16,
    room: &str,
    username: &str,
) -> (Session, mpsc::Receiver<SessionEvent>, tokio::task::JoinHandle<()>) {
    let keypair = Arc::new(KeyPair::generate(TEST_BITS).unwrap());
    let transport = WsTransport::connect("127.0.0.1", port, room).await.unwrap();
    let config = SessionConfig {
        username: username.to_string(),
        handshake_timeout: WAIT,
        event_buffer: 64,
    };
    let (session, events) = PeerSession::new(transport, keypair, room, config);
    let session = Arc::new(session);
    let runner = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.run().await }
    });
    session.start().await.unwrap();
    (session, events, runner)
}

async fn next_message(events: &mut mpsc::Receiver<SessionEvent>) -> LogEntry {
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Some(SessionEvent::MessageReceived(entry)) => return entry,
                Some(_) => {}
                None => panic!("event channel closed before a message arrived"),
            }
        }
    })
    .await
    .expect("no message within timeout")
}

async fn wait_until<F: Fn() -> bool>(cond: F) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// =============================================================================
// Conversation
// =============================================================================

#[tokio::test]
async fn two_clients_converse_in_room_abc123() {
    let (port, state, _server) = start_relay().await;

    // Alice arrives first; her initial key_exchange reaches nobody.
    let (alice, mut alice_events, _alice_run) = join(port, "ABC123", "alice").await;
    let (bob, mut bob_events, _bob_run) = join(port, "ABC123", "bob").await;

    wait_until(|| alice.is_established() && bob.is_established()).await;
    assert_eq!(alice.state(), HandshakeState::Established);
    assert_eq!(alice.peer_fingerprint(), Some(bob.local_fingerprint()));
    assert_eq!(bob.peer_fingerprint(), Some(alice.local_fingerprint()));

    alice.send("Hello Bob").await.unwrap();
    let got = next_message(&mut bob_events).await;
    assert_eq!(got.content, "Hello Bob");
    assert_eq!(got.sender, "alice");

    bob.send("Hi Alice").await.unwrap();
    let got = next_message(&mut alice_events).await;
    assert_eq!(got.content, "Hi Alice");
    assert_eq!(got.sender, "bob");

    let alice_log = alice.messages();
    assert_eq!(alice_log.len(), 2);
    assert_eq!(
        (alice_log[0].direction, alice_log[0].content.as_str()),
        (Direction::Sent, "Hello Bob")
    );
    assert_eq!(
        (alice_log[1].direction, alice_log[1].content.as_str()),
        (Direction::Received, "Hi Alice")
    );

    let bob_log = bob.messages();
    assert_eq!(bob_log.len(), 2);
    assert_eq!(bob_log[0].direction, Direction::Received);
    assert_eq!(bob_log[1].direction, Direction::Sent);

    // The relay labelled both connections from their auth frames.
    let mut names: Vec<_> = state
        .rooms
        .members("ABC123")
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| m.username)
        .collect();
    names.sort();
    assert_eq!(names, ["alice", "bob"]);
}

#[tokio::test]
async fn frames_crossing_the_relay_carry_no_plaintext() {
    let config = RelayConfig {
        max_room_members: 0,
        ..RelayConfig::default()
    };
    let (port, _state, _server) = start_relay_with(&config).await;

    // A silent third member sees exactly what the relay fans out.
    let observer = WsTransport::connect("127.0.0.1", port, "ABC123").await.unwrap();
    let (alice, _alice_events, _alice_run) = join(port, "ABC123", "alice").await;
    let (_bob, mut bob_events, _bob_run) = join(port, "ABC123", "bob").await;

    alice.send("Hello Bob").await.unwrap();
    assert_eq!(next_message(&mut bob_events).await.content, "Hello Bob");

    let mut saw_message = false;
    while !saw_message {
        let frame = tokio::time::timeout(WAIT, observer.recv())
            .await
            .expect("observer saw no message frame")
            .unwrap();
        assert!(!frame.contains("Hello Bob"), "plaintext crossed the relay: {frame}");
        let packet = xtty_proto::decode(&frame).unwrap();
        saw_message = packet.packet_type() == xtty_proto::PacketType::Message;
    }
}

#[tokio::test]
async fn messages_arrive_in_send_order() {
    let (port, _state, _server) = start_relay().await;
    let (alice, _alice_events, _alice_run) = join(port, "ORDER1", "alice").await;
    let (_bob, mut bob_events, _bob_run) = join(port, "ORDER1", "bob").await;

    for i in 0..10 {
        alice.send(&format!("message {i}")).await.unwrap();
    }
    for i in 0..10 {
        assert_eq!(next_message(&mut bob_events).await.content, format!("message {i}"));
    }
}

#[tokio::test]
async fn send_waits_for_late_joiner() {
    let (port, _state, _server) = start_relay().await;
    let (alice, _alice_events, _alice_run) = join(port, "LATE01", "alice").await;

    let pending = {
        let alice = Arc::clone(&alice);
        tokio::spawn(async move { alice.send("are you there?").await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!pending.is_finished(), "send must block until a peer key arrives");

    let (_bob, mut bob_events, _bob_run) = join(port, "LATE01", "bob").await;
    tokio::time::timeout(WAIT, pending)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(next_message(&mut bob_events).await.content, "are you there?");
}

#[tokio::test]
async fn room_disappears_after_both_leave() {
    let (port, state, _server) = start_relay().await;
    let (alice, _alice_events, alice_run) = join(port, "GONE01", "alice").await;
    let (bob, mut bob_events, bob_run) = join(port, "GONE01", "bob").await;
    assert!(state.rooms.room_exists("GONE01").await);

    alice.transport().close().await;
    tokio::time::timeout(WAIT, alice_run).await.unwrap().unwrap();

    // Bob stays connected; the room still holds him.
    assert!(state.rooms.room_exists("GONE01").await);
    assert!(!bob.is_closed());

    bob.transport().close().await;
    tokio::time::timeout(WAIT, bob_run).await.unwrap().unwrap();
    let mut saw_disconnect = false;
    while let Ok(event) = bob_events.try_recv() {
        saw_disconnect |= event == SessionEvent::Disconnected;
    }
    assert!(saw_disconnect);
    assert!(bob.is_closed());

    let deadline = tokio::time::Instant::now() + WAIT;
    while state.rooms.room_exists("GONE01").await {
        assert!(tokio::time::Instant::now() < deadline, "room was not removed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
