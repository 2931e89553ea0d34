//! Application state and event handling for the terminal UI.
//!
//! [`App`] owns everything the screen shows: the input line, the message
//! list, and the room and handshake status. Key presses go through
//! [`App::handle_key_event`], which returns an [`AppAction`] when the
//! network has to do something. Session events and send results are folded
//! in with [`App::apply_session_event`] and [`App::apply_send_outcome`].

use chrono::{DateTime, Local, Utc};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::session::{Direction, LogEntry, SessionEvent};
use crate::transport::TransportType;

/// Slash commands and what they do, shown by `/help`.
pub const HELP_LINES: [&str; 4] = [
    "/help   show this list",
    "/clear  clear the message pane",
    "/quit   leave the room",
    "Esc or Ctrl-C also quits; Up/Down scroll the message pane",
];

/// Something the UI wants the network side to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppAction {
    /// Encrypt and send this line to the peer.
    Send(String),
}

/// Result of one queued send, reported back to the UI in send order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The message left this client and was logged.
    Sent(LogEntry),
    /// The message was not sent.
    Failed(String),
}

/// Connection state shown in the status bar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Joined the room, no peer key yet.
    WaitingForPeer,
    /// Peer key adopted.
    Secure {
        /// Peer key fingerprint.
        fingerprint: String,
    },
    /// The relay connection ended.
    Disconnected,
}

/// Who a displayed line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Typed here.
    Outgoing,
    /// Decrypted from the peer.
    Incoming,
    /// Status line from the client itself.
    System,
}

/// Delivery status of an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    /// Queued, waiting for the handshake or the socket.
    Sending,
    /// Handed to the relay.
    Sent,
    /// Not sent.
    Failed,
}

impl MessageStatus {
    /// Get the display symbol for this status.
    #[must_use]
    pub const fn symbol(&self) -> &'static str {
        match self {
            Self::Sending => "\u{22ef}",
            Self::Sent => "\u{2713}",
            Self::Failed => "\u{2717}",
        }
    }
}

/// A line in the message pane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMessage {
    /// Sender's display name.
    pub sender: String,
    /// Message content.
    pub content: String,
    /// Formatted local time, e.g. "14:23".
    pub timestamp: String,
    /// Outgoing, incoming, or system.
    pub kind: MessageKind,
    /// Delivery status; only meaningful for outgoing messages.
    pub status: Option<MessageStatus>,
}

/// Main application state.
pub struct App {
    /// Current text input.
    pub input: String,
    /// Cursor position in input, in characters.
    pub cursor_position: usize,
    /// Lines in the message pane.
    pub messages: Vec<DisplayMessage>,
    /// Index of the last visible message.
    pub message_scroll: usize,
    /// Room code.
    pub room: String,
    /// Our username.
    pub username: String,
    /// Our key fingerprint.
    pub local_fingerprint: String,
    /// How we reach the room.
    pub transport: TransportType,
    /// Handshake and connection status.
    pub connection: ConnectionState,
    /// Name the peer confirmed with, if any.
    pub peer_name: Option<String>,
    /// Whether the app should quit.
    pub should_quit: bool,
}

impl App {
    /// Create the state for a freshly joined room.
    #[must_use]
    pub fn new(
        room: impl Into<String>,
        username: impl Into<String>,
        local_fingerprint: impl Into<String>,
        transport: TransportType,
    ) -> Self {
        Self {
            input: String::new(),
            cursor_position: 0,
            messages: Vec::new(),
            message_scroll: 0,
            room: room.into(),
            username: username.into(),
            local_fingerprint: local_fingerprint.into(),
            transport,
            connection: ConnectionState::WaitingForPeer,
            peer_name: None,
            should_quit: false,
        }
    }

    /// Handle a key event.
    ///
    /// Returns an action when the key submitted a message.
    pub fn handle_key_event(&mut self, key: KeyEvent) -> Option<AppAction> {
        match (key.code, key.modifiers) {
            (KeyCode::Char('c'), KeyModifiers::CONTROL) | (KeyCode::Esc, _) => {
                self.should_quit = true;
                None
            }
            (KeyCode::Enter, _) => self.submit_input(),
            (KeyCode::Char(c), _) => {
                self.enter_char(c);
                None
            }
            (KeyCode::Backspace, _) => {
                self.delete_char();
                None
            }
            (KeyCode::Left, _) => {
                self.cursor_position = self.cursor_position.saturating_sub(1);
                None
            }
            (KeyCode::Right, _) => {
                self.cursor_position = (self.cursor_position + 1).min(self.input_len());
                None
            }
            (KeyCode::Home, _) => {
                self.cursor_position = 0;
                None
            }
            (KeyCode::End, _) => {
                self.cursor_position = self.input_len();
                None
            }
            (KeyCode::Up, _) => {
                self.message_scroll = self.message_scroll.saturating_sub(1);
                None
            }
            (KeyCode::Down, _) => {
                if self.message_scroll < self.messages.len().saturating_sub(1) {
                    self.message_scroll += 1;
                }
                None
            }
            _ => None,
        }
    }

    /// Take the input line and act on it: a slash command or a message.
    fn submit_input(&mut self) -> Option<AppAction> {
        let line = self.input.trim().to_string();
        self.input.clear();
        self.cursor_position = 0;
        if line.is_empty() {
            return None;
        }

        match line.as_str() {
            "/quit" => {
                self.should_quit = true;
                None
            }
            "/help" => {
                for help in HELP_LINES {
                    self.push_system_message(help.to_string());
                }
                None
            }
            "/clear" => {
                self.messages.clear();
                self.message_scroll = 0;
                None
            }
            cmd if cmd.starts_with('/') => {
                self.push_system_message(format!("Unknown command {cmd}; try /help"));
                None
            }
            _ => {
                self.push_message(DisplayMessage {
                    sender: self.username.clone(),
                    content: line.clone(),
                    timestamp: Local::now().format("%H:%M").to_string(),
                    kind: MessageKind::Outgoing,
                    status: Some(MessageStatus::Sending),
                });
                Some(AppAction::Send(line))
            }
        }
    }

    /// Fold a session event into the display.
    pub fn apply_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Established { fingerprint } => {
                self.push_system_message(format!(
                    "Secure channel established (peer key {fingerprint})"
                ));
                self.connection = ConnectionState::Secure { fingerprint };
            }
            SessionEvent::PeerConfirmed { from } => {
                self.push_system_message(format!("{from} has your key"));
                self.peer_name = Some(from);
            }
            SessionEvent::MessageReceived(entry) => self.push_entry(&entry),
            SessionEvent::DecryptionFailed { reason } => {
                self.push_system_message(format!("Could not decrypt a message: {reason}"));
            }
            SessionEvent::SignatureInvalid => {
                self.push_system_message("Dropped a message with an invalid signature".to_string());
            }
            SessionEvent::ServerError { reason } => {
                self.push_system_message(format!("Relay: {reason}"));
            }
            SessionEvent::ProtocolViolation { reason } => {
                tracing::debug!(%reason, "protocol violation shown to user");
                self.push_system_message("Dropped a malformed frame".to_string());
            }
            SessionEvent::OutOfOrderMessage { count } => {
                self.push_system_message(format!(
                    "Dropped a message sent before the handshake ({count} so far)"
                ));
            }
            SessionEvent::PeerKeyRejected { reason } => {
                self.push_system_message(format!("Peer sent an unusable key: {reason}"));
            }
            SessionEvent::PeerKeyConflict { fingerprint } => {
                self.push_system_message(format!(
                    "WARNING: someone offered a different key ({fingerprint}); ignored"
                ));
            }
            SessionEvent::Disconnected => {
                self.connection = ConnectionState::Disconnected;
                self.push_system_message("Disconnected from relay".to_string());
            }
        }
    }

    /// Settle the oldest outgoing message still marked as sending.
    pub fn apply_send_outcome(&mut self, outcome: SendOutcome) {
        let pending = self
            .messages
            .iter_mut()
            .find(|m| m.status == Some(MessageStatus::Sending));

        match outcome {
            SendOutcome::Sent(entry) => {
                if let Some(msg) = pending {
                    msg.status = Some(MessageStatus::Sent);
                    msg.timestamp = local_time(entry.timestamp);
                } else {
                    // Cleared from the pane while in flight.
                    tracing::debug!("send completed for a message no longer shown");
                }
            }
            SendOutcome::Failed(reason) => {
                if let Some(msg) = pending {
                    msg.status = Some(MessageStatus::Failed);
                }
                self.push_system_message(format!("Message not sent: {reason}"));
            }
        }
    }

    /// Show a logged message.
    pub fn push_entry(&mut self, entry: &LogEntry) {
        let kind = match entry.direction {
            Direction::Sent => MessageKind::Outgoing,
            Direction::Received => MessageKind::Incoming,
        };
        self.push_message(DisplayMessage {
            sender: entry.sender.clone(),
            content: entry.content.clone(),
            timestamp: local_time(entry.timestamp),
            kind,
            status: (kind == MessageKind::Outgoing).then_some(MessageStatus::Sent),
        });
    }

    /// Add a client status line.
    pub fn push_system_message(&mut self, content: String) {
        self.push_message(DisplayMessage {
            sender: String::new(),
            content,
            timestamp: Local::now().format("%H:%M").to_string(),
            kind: MessageKind::System,
            status: None,
        });
    }

    fn push_message(&mut self, message: DisplayMessage) {
        self.messages.push(message);
        self.message_scroll = self.messages.len().saturating_sub(1);
    }

    fn input_len(&self) -> usize {
        self.input.chars().count()
    }

    /// Byte offset of the cursor's character position.
    fn cursor_byte_offset(&self) -> usize {
        self.input
            .char_indices()
            .nth(self.cursor_position)
            .map_or(self.input.len(), |(i, _)| i)
    }

    fn enter_char(&mut self, c: char) {
        let at = self.cursor_byte_offset();
        self.input.insert(at, c);
        self.cursor_position += 1;
    }

    fn delete_char(&mut self) {
        if self.cursor_position > 0 {
            self.cursor_position -= 1;
            let at = self.cursor_byte_offset();
            self.input.remove(at);
        }
    }
}

fn local_time(timestamp: DateTime<Utc>) -> String {
    timestamp.with_timezone(&Local).format("%H:%M").to_string()
}
