//! Room registry for the relay server.
//!
//! Maps a room code to the set of connections currently in that room. A room
//! exists exactly while it has at least one member: the first `join` creates
//! it and the last `leave` removes it.
//!
//! Locking: the code→room map sits behind a [`tokio::sync::RwLock`] and each
//! room guards its own member set with a [`parking_lot::Mutex`]. Locks are
//! always taken map first, then room. Fan-out releases both before handing
//! frames to member queues, and queue hand-off never blocks.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use axum::extract::ws::Message;
use parking_lot::Mutex;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

/// Identifies a single admitted socket for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Allocates a fresh, time-ordered id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Errors returned by [`RoomRegistry`] operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No room with the given code currently exists.
    #[error("room {0} not found")]
    RoomNotFound(String),
    /// The connection is not (or no longer) a member of the room.
    #[error("connection {conn} is not a member of room {code}")]
    NotAMember {
        /// Room the connection claimed.
        code: String,
        /// The connection.
        conn: ConnectionId,
    },
    /// The room already holds the maximum number of members.
    #[error("room {code} is full ({limit} members)")]
    RoomFull {
        /// Code of the full room.
        code: String,
        /// Configured member limit.
        limit: usize,
    },
}

/// A connection's admission ticket into a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    /// Room the connection belongs to.
    pub code: String,
    /// The admitted connection.
    pub conn: ConnectionId,
}

/// Public view of a room member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    /// Connection id.
    pub conn: ConnectionId,
    /// Username declared in the member's `auth` frame, if any.
    pub username: Option<String>,
}

/// Result of fanning a frame out to a room.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Members whose queue accepted the frame.
    pub delivered: usize,
    /// Members removed because their queue was closed or full.
    pub evicted: Vec<ConnectionId>,
}

struct Member {
    outbound: mpsc::Sender<Message>,
    username: Option<String>,
}

#[derive(Default)]
struct Room {
    members: Mutex<HashMap<ConnectionId, Member>>,
}

/// In-memory directory of active rooms.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    max_members: usize,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomRegistry {
    /// Creates a registry with no per-room member limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_members(0)
    }

    /// Creates a registry admitting at most `max_members` connections per
    /// room. `0` means unlimited.
    #[must_use]
    pub fn with_max_members(max_members: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            max_members,
        }
    }

    /// Admits `conn` into the room `code`, creating the room if needed.
    ///
    /// `outbound` is the member's queue; the registry holds the only strong
    /// reference the relay keeps, so evicting a member closes its writer.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::RoomFull`] if the room is at its limit.
    pub async fn join(
        &self,
        code: &str,
        conn: ConnectionId,
        outbound: mpsc::Sender<Message>,
    ) -> Result<Membership, RegistryError> {
        let mut rooms = self.rooms.write().await;
        let room = Arc::clone(rooms.entry(code.to_string()).or_default());
        let mut members = room.members.lock();

        if self.max_members > 0 && members.len() >= self.max_members {
            return Err(RegistryError::RoomFull {
                code: code.to_string(),
                limit: self.max_members,
            });
        }

        members.insert(
            conn,
            Member {
                outbound,
                username: None,
            },
        );
        let count = members.len();
        drop(members);
        drop(rooms);

        tracing::info!(room = %code, conn = %conn, members = count, "member joined");
        Ok(Membership {
            code: code.to_string(),
            conn,
        })
    }

    /// Removes `conn` from room `code`, deleting the room once empty.
    ///
    /// Returns `true` if the member was present. Calling it again is a no-op.
    pub async fn leave(&self, code: &str, conn: ConnectionId) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get(code).map(Arc::clone) else {
            return false;
        };
        let mut members = room.members.lock();
        let removed = members.remove(&conn).is_some();
        let remaining = members.len();
        drop(members);

        if remaining == 0 {
            rooms.remove(code);
        }
        drop(rooms);

        if removed {
            tracing::info!(room = %code, conn = %conn, remaining, "member left");
            if remaining == 0 {
                tracing::info!(room = %code, "room closed");
            }
        }
        removed
    }

    /// Hands `frame` to every member of `code` except `sender`.
    ///
    /// Delivery is a non-blocking `try_send`; a member whose queue is closed
    /// or full is evicted from the room.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::RoomNotFound`] if the room does not exist,
    /// or [`RegistryError::NotAMember`] if `sender` is not in it.
    pub async fn relay(
        &self,
        code: &str,
        sender: ConnectionId,
        frame: &Message,
    ) -> Result<RelayOutcome, RegistryError> {
        let room = self
            .rooms
            .read()
            .await
            .get(code)
            .map(Arc::clone)
            .ok_or_else(|| RegistryError::RoomNotFound(code.to_string()))?;

        let targets: Vec<(ConnectionId, mpsc::Sender<Message>)> = {
            let members = room.members.lock();
            if !members.contains_key(&sender) {
                return Err(RegistryError::NotAMember {
                    code: code.to_string(),
                    conn: sender,
                });
            }
            members
                .iter()
                .filter(|(id, _)| **id != sender)
                .map(|(id, m)| (*id, m.outbound.clone()))
                .collect()
        };

        let mut outcome = RelayOutcome::default();
        for (id, outbound) in targets {
            match outbound.try_send(frame.clone()) {
                Ok(()) => outcome.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(room = %code, conn = %id, "outbound queue full, evicting member");
                    outcome.evicted.push(id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!(room = %code, conn = %id, "outbound queue closed, evicting member");
                    outcome.evicted.push(id);
                }
            }
        }

        for id in &outcome.evicted {
            self.leave(code, *id).await;
        }
        Ok(outcome)
    }

    /// Records the username a member declared in its `auth` frame.
    ///
    /// Returns `false` if the member is no longer in the room.
    pub async fn set_username(&self, code: &str, conn: ConnectionId, username: &str) -> bool {
        let rooms = self.rooms.read().await;
        let Some(room) = rooms.get(code) else {
            return false;
        };
        let mut members = room.members.lock();
        members.get_mut(&conn).is_some_and(|m| {
            m.username = Some(username.to_string());
            true
        })
    }

    /// Returns a snapshot of the room's members.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::RoomNotFound`] if the room does not exist.
    pub async fn members(&self, code: &str) -> Result<Vec<MemberInfo>, RegistryError> {
        let rooms = self.rooms.read().await;
        let room = rooms
            .get(code)
            .ok_or_else(|| RegistryError::RoomNotFound(code.to_string()))?;
        let members = room
            .members
            .lock()
            .iter()
            .map(|(id, m)| MemberInfo {
                conn: *id,
                username: m.username.clone(),
            })
            .collect();
        Ok(members)
    }

    /// Whether a room with this code currently exists.
    pub async fn room_exists(&self, code: &str) -> bool {
        self.rooms.read().await.contains_key(code)
    }

    /// Number of active rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Message {
        Message::Text(s.to_string().into())
    }

    fn as_text(msg: Message) -> String {
        match msg {
            Message::Text(t) => t.as_str().to_string(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn room_lifecycle() {
        let registry = RoomRegistry::new();
        let (a, b) = (ConnectionId::new(), ConnectionId::new());
        let (tx_a, _rx_a) = mpsc::channel(4);
        let (tx_b, _rx_b) = mpsc::channel(4);

        assert!(!registry.room_exists("ABC123").await);
        registry.join("ABC123", a, tx_a).await.unwrap();
        assert!(registry.room_exists("ABC123").await);
        registry.join("ABC123", b, tx_b).await.unwrap();
        assert_eq!(registry.members("ABC123").await.unwrap().len(), 2);
        // The second join reuses the room.
        assert_eq!(registry.room_count().await, 1);

        assert!(registry.leave("ABC123", a).await);
        assert!(registry.room_exists("ABC123").await);
        assert!(registry.leave("ABC123", b).await);
        assert!(!registry.room_exists("ABC123").await);
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn leave_is_idempotent() {
        let registry = RoomRegistry::new();
        let a = ConnectionId::new();
        let (tx, _rx) = mpsc::channel(4);
        registry.join("R", a, tx).await.unwrap();

        assert!(registry.leave("R", a).await);
        assert!(!registry.leave("R", a).await);
        assert!(!registry.leave("NOPE", a).await);
    }

    #[tokio::test]
    async fn fan_out_excludes_sender() {
        let registry = RoomRegistry::new();
        let ids: Vec<ConnectionId> = (0..3).map(|_| ConnectionId::new()).collect();
        let mut receivers = Vec::new();
        for id in &ids {
            let (tx, rx) = mpsc::channel(4);
            registry.join("ROOM", *id, tx).await.unwrap();
            receivers.push(rx);
        }

        let outcome = registry.relay("ROOM", ids[0], &text("hello")).await.unwrap();
        assert_eq!(outcome.delivered, 2);
        assert!(outcome.evicted.is_empty());

        assert!(receivers[0].try_recv().is_err());
        assert_eq!(as_text(receivers[1].try_recv().unwrap()), "hello");
        assert_eq!(as_text(receivers[2].try_recv().unwrap()), "hello");
    }

    #[tokio::test]
    async fn rooms_are_isolated() {
        let registry = RoomRegistry::new();
        let (a, b) = (ConnectionId::new(), ConnectionId::new());
        let (tx_a, _rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        registry.join("ONE", a, tx_a).await.unwrap();
        registry.join("TWO", b, tx_b).await.unwrap();

        let outcome = registry.relay("ONE", a, &text("x")).await.unwrap();
        assert_eq!(outcome.delivered, 0);
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn relay_to_missing_room_fails() {
        let registry = RoomRegistry::new();
        let result = registry.relay("GHOST", ConnectionId::new(), &text("x")).await;
        assert_eq!(result, Err(RegistryError::RoomNotFound("GHOST".to_string())));
    }

    #[tokio::test]
    async fn member_limit_enforced() {
        let registry = RoomRegistry::with_max_members(2);
        let (tx1, _r1) = mpsc::channel(1);
        let (tx2, _r2) = mpsc::channel(1);
        let (tx3, _r3) = mpsc::channel(1);
        registry.join("PAIR", ConnectionId::new(), tx1).await.unwrap();
        let second = ConnectionId::new();
        registry.join("PAIR", second, tx2).await.unwrap();

        let third = registry.join("PAIR", ConnectionId::new(), tx3.clone()).await;
        assert!(matches!(third, Err(RegistryError::RoomFull { limit: 2, .. })));

        // A departure frees a slot.
        registry.leave("PAIR", second).await;
        assert!(registry.join("PAIR", ConnectionId::new(), tx3).await.is_ok());
    }

    #[tokio::test]
    async fn closed_queue_is_evicted() {
        let registry = RoomRegistry::new();
        let (sender, gone) = (ConnectionId::new(), ConnectionId::new());
        let (tx_s, _rx_s) = mpsc::channel(4);
        let (tx_g, rx_g) = mpsc::channel(4);
        registry.join("R", sender, tx_s).await.unwrap();
        registry.join("R", gone, tx_g).await.unwrap();
        drop(rx_g);

        let outcome = registry.relay("R", sender, &text("x")).await.unwrap();
        assert_eq!(outcome.delivered, 0);
        assert_eq!(outcome.evicted, vec![gone]);
        let members = registry.members("R").await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].conn, sender);
    }

    #[tokio::test]
    async fn full_queue_is_evicted_without_blocking() {
        let registry = RoomRegistry::new();
        let (sender, slow) = (ConnectionId::new(), ConnectionId::new());
        let (tx_s, _rx_s) = mpsc::channel(4);
        let (tx_slow, mut rx_slow) = mpsc::channel(1);
        registry.join("R", sender, tx_s).await.unwrap();
        registry.join("R", slow, tx_slow).await.unwrap();

        let first = registry.relay("R", sender, &text("1")).await.unwrap();
        assert_eq!(first.delivered, 1);
        let second = registry.relay("R", sender, &text("2")).await.unwrap();
        assert_eq!(second.evicted, vec![slow]);

        // The frame that fit is still readable; then the queue closes.
        assert_eq!(as_text(rx_slow.recv().await.unwrap()), "1");
        assert!(rx_slow.recv().await.is_none());
    }

    #[tokio::test]
    async fn evicted_member_cannot_keep_relaying() {
        let registry = RoomRegistry::new();
        let (sender, slow) = (ConnectionId::new(), ConnectionId::new());
        let (tx_s, mut rx_s) = mpsc::channel(4);
        let (tx_slow, _rx_slow) = mpsc::channel(1);
        registry.join("R", sender, tx_s).await.unwrap();
        registry.join("R", slow, tx_slow).await.unwrap();

        registry.relay("R", sender, &text("1")).await.unwrap();
        let outcome = registry.relay("R", sender, &text("2")).await.unwrap();
        assert_eq!(outcome.evicted, vec![slow]);

        // The evicted connection's reader may still hand frames over.
        let result = registry.relay("R", slow, &text("from the evicted")).await;
        assert_eq!(
            result,
            Err(RegistryError::NotAMember {
                code: "R".to_string(),
                conn: slow,
            })
        );
        assert!(rx_s.try_recv().is_err());
    }

    #[tokio::test]
    async fn username_labels_member() {
        let registry = RoomRegistry::new();
        let a = ConnectionId::new();
        let (tx, _rx) = mpsc::channel(1);
        registry.join("R", a, tx).await.unwrap();

        assert!(registry.set_username("R", a, "alice").await);
        assert!(!registry.set_username("R", ConnectionId::new(), "mallory").await);
        let members = registry.members("R").await.unwrap();
        assert_eq!(members[0].username.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn concurrent_joins_and_leaves_leave_no_empty_rooms() {
        let registry = Arc::new(RoomRegistry::new());
        let mut handles = Vec::new();
        for i in 0..32 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                let code = format!("ROOM{}", i % 4);
                let id = ConnectionId::new();
                let (tx, _rx) = mpsc::channel(1);
                registry.join(&code, id, tx).await.unwrap();
                tokio::task::yield_now().await;
                registry.leave(&code, id).await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(registry.room_count().await, 0);
    }
}
