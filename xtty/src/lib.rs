//! `xtty` — room-code messenger client with end-to-end encryption.

pub mod app;
pub mod config;
pub mod crypto;
pub mod handshake;
pub mod session;
pub mod transport;
pub mod ui;
