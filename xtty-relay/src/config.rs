//! Configuration system for the Xtty relay server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/xtty-relay/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur when loading relay configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RelayConfigFile {
    server: ServerFileConfig,
}

/// `[server]` section of the relay config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    max_frame_size: Option<usize>,
    max_room_members: Option<usize>,
    write_timeout_secs: Option<u64>,
    outbound_queue: Option<usize>,
    message_ttl_secs: Option<u64>,
    heartbeat_interval_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the relay server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Xtty room-code relay server")]
pub struct RelayCliArgs {
    /// Address to bind the relay server to.
    #[arg(short, long, env = "XTTY_RELAY_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/xtty-relay/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Largest accepted text frame in bytes.
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Members allowed per room (0 for unlimited).
    #[arg(long)]
    pub max_room_members: Option<usize>,

    /// Seconds between WebSocket pings.
    #[arg(long)]
    pub heartbeat_interval_secs: Option<u64>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "XTTY_RELAY_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:8080`).
    pub bind_addr: String,
    /// Largest text frame relayed; bigger frames are answered with an error.
    pub max_frame_size: usize,
    /// Members allowed per room. `0` means unlimited.
    pub max_room_members: usize,
    /// Deadline for writing a single frame to a member's socket.
    pub write_timeout: Duration,
    /// Capacity of each member's outbound queue.
    pub outbound_queue: usize,
    /// Advertised retention period. The relay stores nothing, so this is
    /// informational only.
    pub message_ttl: Duration,
    /// Interval between WebSocket pings sent by each writer task.
    pub heartbeat_interval: Duration,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            max_frame_size: 64 * 1024,
            max_room_members: 2,
            write_timeout: Duration::from_secs(10),
            outbound_queue: 64,
            message_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            heartbeat_interval: Duration::from_secs(30),
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and missing file
    /// is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &RelayCliArgs, file: &RelayConfigFile) -> Self {
        let defaults = Self::default();
        let server = &file.server;

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            max_frame_size: cli
                .max_frame_size
                .or(server.max_frame_size)
                .unwrap_or(defaults.max_frame_size),
            max_room_members: cli
                .max_room_members
                .or(server.max_room_members)
                .unwrap_or(defaults.max_room_members),
            write_timeout: server
                .write_timeout_secs
                .map_or(defaults.write_timeout, Duration::from_secs),
            // A zero-capacity mpsc channel panics on creation.
            outbound_queue: server
                .outbound_queue
                .unwrap_or(defaults.outbound_queue)
                .max(1),
            message_ttl: server
                .message_ttl_secs
                .map_or(defaults.message_ttl, Duration::from_secs),
            heartbeat_interval: cli
                .heartbeat_interval_secs
                .or(server.heartbeat_interval_secs)
                .filter(|secs| *secs > 0)
                .map_or(defaults.heartbeat_interval, Duration::from_secs),
            log_level: cli.log_level.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<RelayConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(RelayConfigFile::default());
    };
    let path = config_dir.join("xtty-relay").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RelayConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
