//! Xtty relay server library.
//!
//! Exposes the relay server for use in tests and embedding. The relay
//! admits WebSocket connections into rooms keyed by a short code and
//! forwards each member's frames to the other members of its room.

pub mod config;
pub mod relay;
pub mod rooms;
pub mod users;
