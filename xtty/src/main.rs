//! `xtty` — end-to-end encrypted chat through a short room code.
//!
//! Creates a room (or joins one with `--join CODE`), exchanges RSA keys with
//! whoever else joins, then runs a full-screen chat in the terminal. Logs go
//! to a file since ratatui owns the screen.
//!
//! ```bash
//! # Create a room; the code is printed for you to share
//! cargo run --bin xtty -- --username alice
//!
//! # Join it from another terminal
//! cargo run --bin xtty -- --username bob --join K7QX2M
//!
//! # Write a persistent private key
//! cargo run --bin xtty -- --init
//! ```

use std::io;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

use xtty::app::{App, AppAction, SendOutcome};
use xtty::config::{CliArgs, ClientConfig, ConfigError};
use xtty::crypto::CryptoError;
use xtty::crypto::keys::KeyPair;
use xtty::session::{PeerSession, SessionError, SessionEvent};
use xtty::transport::ws::WsTransport;
use xtty::transport::{Transport, TransportError};
use xtty::ui;
use xtty_proto::room_code;

/// How long one loop iteration waits for a key press.
const POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Lines typed faster than they can be sent wait here.
const OUTGOING_QUEUE: usize = 32;

type Session = Arc<PeerSession<WsTransport>>;

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("could not join room: {0}")]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("terminal I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!("xtty starting");

    let result = if cli.init {
        init_key(&config).await
    } else {
        run(config).await
    };

    tracing::info!("xtty exiting");
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown so buffered
/// entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("xtty.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// `--init`: generate a key and write it where later runs will find it.
async fn init_key(config: &ClientConfig) -> Result<(), AppError> {
    let path = config.key_path_for_init()?;
    if path.exists() {
        eprintln!("Refusing to overwrite existing key at {}", path.display());
        return Ok(());
    }
    let keypair = generate_key(config.key_bits).await?;
    keypair.save(&path)?;
    println!("Wrote {}-bit private key to {}", config.key_bits, path.display());
    println!("Fingerprint: {}", keypair.fingerprint());
    println!("Later runs load it automatically.");
    Ok(())
}

async fn load_or_generate_key(config: &ClientConfig) -> Result<KeyPair, AppError> {
    match &config.private_key_file {
        Some(path) => {
            let keypair = KeyPair::load(path)?;
            tracing::info!(path = %path.display(), "loaded private key");
            Ok(keypair)
        }
        None => generate_key(config.key_bits).await,
    }
}

/// RSA generation takes long enough to stall a runtime worker.
async fn generate_key(bits: usize) -> Result<KeyPair, AppError> {
    println!("Generating a {bits}-bit RSA key...");
    tokio::task::spawn_blocking(move || KeyPair::generate(bits))
        .await
        .map_err(|e| std::io::Error::other(format!("key generation task failed: {e}")))?
        .map_err(AppError::from)
}

async fn run(config: ClientConfig) -> Result<(), AppError> {
    let keypair = Arc::new(load_or_generate_key(&config).await?);

    let (room, created) = match &config.room {
        Some(code) => (code.clone(), false),
        None => (room_code::generate(), true),
    };

    let transport = WsTransport::connect(&config.host, config.port, &room).await?;
    tracing::info!(room = %room, host = %config.host, port = config.port, "joined room");

    let mut app = App::new(
        room.clone(),
        config.username.clone(),
        keypair.fingerprint(),
        transport.transport_type(),
    );
    if created {
        app.push_system_message(format!("Created room {room}. Share this code with your peer."));
    }
    app.push_system_message(format!(
        "Joined as {} on {}:{}. Your fingerprint: {}",
        config.username,
        config.host,
        config.port,
        keypair.fingerprint()
    ));
    app.push_system_message("Waiting for a peer. Type /help for commands.".to_string());

    let (session, events) = PeerSession::new(transport, keypair, room, config.session_config());
    let session = Arc::new(session);

    let reader = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.run().await }
    });
    session.start().await?;
    let (outgoing, outcomes) = spawn_sender(Arc::clone(&session));

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, &mut app, events, &outgoing, outcomes);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    session.transport().close().await;
    reader.abort();
    result.map_err(AppError::from)
}

/// Sends queued lines one at a time, in order, and reports each result.
///
/// A send can wait for the handshake, so it runs off the UI loop.
fn spawn_sender(session: Session) -> (mpsc::Sender<String>, mpsc::Receiver<SendOutcome>) {
    let (line_tx, mut line_rx) = mpsc::channel::<String>(OUTGOING_QUEUE);
    let (outcome_tx, outcome_rx) = mpsc::channel(OUTGOING_QUEUE);
    tokio::spawn(async move {
        while let Some(line) = line_rx.recv().await {
            let outcome = match session.send(&line).await {
                Ok(entry) => SendOutcome::Sent(entry),
                Err(SessionError::HandshakeTimeout(_)) => {
                    SendOutcome::Failed("no peer has joined yet".to_string())
                }
                Err(e) => SendOutcome::Failed(e.to_string()),
            };
            if outcome_tx.send(outcome).await.is_err() {
                break;
            }
        }
    });
    (line_tx, outcome_rx)
}

/// Main UI loop: draw, fold in network results, then handle one key.
fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    mut events: mpsc::Receiver<SessionEvent>,
    outgoing: &mpsc::Sender<String>,
    mut outcomes: mpsc::Receiver<SendOutcome>,
) -> io::Result<()> {
    loop {
        terminal.draw(|frame| ui::draw(frame, app))?;

        while let Ok(event) = events.try_recv() {
            app.apply_session_event(event);
        }
        while let Ok(outcome) = outcomes.try_recv() {
            app.apply_send_outcome(outcome);
        }

        if event::poll(POLL_TIMEOUT)?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
            && let Some(AppAction::Send(line)) = app.handle_key_event(key)
        {
            match outgoing.try_send(line) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    app.apply_send_outcome(SendOutcome::Failed("too many messages queued".to_string()));
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    app.apply_send_outcome(SendOutcome::Failed("session closed".to_string()));
                }
            }
        }

        if app.should_quit {
            return Ok(());
        }
    }
}
