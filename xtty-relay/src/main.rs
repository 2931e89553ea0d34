//! Xtty relay server: room-code rendezvous for end-to-end encrypted chat.
//!
//! An axum WebSocket server that forwards frames between connections that
//! joined with the same room code. The relay never sees plaintext; message
//! bodies are ciphertext it cannot open.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:8080
//! cargo run --bin xtty-relay
//!
//! # Run on custom address
//! cargo run --bin xtty-relay -- --bind 127.0.0.1:9000
//!
//! # Or via environment variable
//! XTTY_RELAY_ADDR=127.0.0.1:9000 cargo run --bin xtty-relay
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use xtty_relay::config::{RelayCliArgs, RelayConfig};
use xtty_relay::relay::{self, RelayState};

/// How long open connections get to close after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(
        addr = %config.bind_addr,
        max_room_members = config.max_room_members,
        max_frame_size = config.max_frame_size,
        heartbeat_secs = config.heartbeat_interval.as_secs(),
        message_ttl_secs = config.message_ttl.as_secs(),
        "starting xtty relay server"
    );

    let state = Arc::new(RelayState::with_config(&config));

    let (bound_addr, handle) =
        match relay::start_server_with_state(&config.bind_addr, Arc::clone(&state)).await {
            Ok(started) => started,
            Err(e) => {
                tracing::error!(error = %e, "failed to start relay server");
                std::process::exit(1);
            }
        };
    tracing::info!(addr = %bound_addr, "relay server listening");

    relay::shutdown_signal().await;
    tracing::info!("shutdown signal received, closing connections");
    state.begin_shutdown();

    let finished = tokio::time::timeout(SHUTDOWN_GRACE, async {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "relay server task failed");
        }
        state.drained().await;
    })
    .await;
    match finished {
        Ok(()) => tracing::info!("relay server stopped"),
        Err(_) => tracing::warn!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "connections still open after shutdown grace period, exiting"
        ),
    }
}
