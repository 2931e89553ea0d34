//! Status bar rendering.

use ratatui::{
    Frame,
    layout::Rect,
    text::{Line, Span},
    widgets::Paragraph,
};

use super::theme;
use crate::app::{App, ConnectionState};

const HELP_TEXT: &str = "Enter: send | /help | Esc: quit";

/// Render the status bar at the bottom of the screen.
pub fn render(frame: &mut Frame, area: Rect, app: &App) {
    let paragraph = Paragraph::new(status_line(app)).style(theme::status_bar_bg());
    frame.render_widget(paragraph, area);
}

/// Room, handshake state, and transport, left to right.
fn status_line(app: &App) -> Line<'_> {
    let (dot_color, status_text) = match &app.connection {
        ConnectionState::WaitingForPeer => (theme::WARNING, "Waiting for peer\u{2026}".to_string()),
        ConnectionState::Secure { fingerprint } => {
            let peer = app.peer_name.as_deref().unwrap_or("peer");
            (theme::SUCCESS, format!("Secure with {peer} ({fingerprint})"))
        }
        ConnectionState::Disconnected => (theme::OFFLINE, "Disconnected".to_string()),
    };

    Line::from(vec![
        Span::styled("Xtty", theme::bold()),
        Span::raw(" | Room "),
        Span::styled(app.room.as_str(), theme::highlighted()),
        Span::raw(" | "),
        Span::styled("\u{25cf}", theme::normal().fg(dot_color)),
        Span::raw(format!(" {status_text}")),
        Span::raw(format!(" | via {} as {}", app.transport, app.username)),
        Span::raw(" | "),
        Span::styled(HELP_TEXT, theme::dimmed()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionEvent;
    use crate::transport::TransportType;

    fn rendered(app: &App) -> String {
        status_line(app)
            .spans
            .iter()
            .map(|s| s.content.as_ref())
            .collect()
    }

    #[test]
    fn shows_room_and_waiting_state() {
        let app = App::new("ABC123", "alice", "00", TransportType::Relay);
        let text = rendered(&app);
        assert!(text.contains("Room ABC123"), "{text}");
        assert!(text.contains("Waiting for peer"), "{text}");
        assert!(text.contains("via Relay as alice"), "{text}");
    }

    #[test]
    fn shows_peer_once_secure() {
        let mut app = App::new("ABC123", "alice", "00", TransportType::Relay);
        app.apply_session_event(SessionEvent::Established {
            fingerprint: "aabbccdd".to_string(),
        });
        app.apply_session_event(SessionEvent::PeerConfirmed {
            from: "bob".to_string(),
        });
        let text = rendered(&app);
        assert!(text.contains("Secure with bob (aabbccdd)"), "{text}");
    }
}
