//! Chat panel rendering (message list + input box).

use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
};

use super::theme;
use crate::app::{App, DisplayMessage, MessageKind, MessageStatus};

/// Render the chat panel (messages + input box).
pub fn render(frame: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(3)])
        .split(area);

    render_messages(frame, chunks[0], app);
    render_input(frame, chunks[1], app);
}

fn message_line(msg: &DisplayMessage) -> Line<'_> {
    let mut spans = vec![
        Span::styled(msg.timestamp.as_str(), theme::timestamp()),
        Span::raw(" "),
    ];
    match msg.kind {
        MessageKind::System => {
            spans.push(Span::styled(format!("* {}", msg.content), theme::system_message()));
        }
        MessageKind::Outgoing | MessageKind::Incoming => {
            let color = if msg.kind == MessageKind::Outgoing {
                theme::OWN_NAME
            } else {
                theme::PEER_NAME
            };
            spans.push(Span::styled(msg.sender.as_str(), theme::bold().fg(color)));
            spans.push(Span::raw(": "));
            spans.push(Span::styled(msg.content.as_str(), theme::normal()));
            if let Some(status) = msg.status {
                let style = if status == MessageStatus::Failed {
                    theme::normal().fg(theme::ERROR)
                } else {
                    theme::dimmed()
                };
                spans.push(Span::raw(" "));
                spans.push(Span::styled(status.symbol(), style));
            }
        }
    }
    Line::from(spans)
}

/// Render the message list, keeping the scrolled-to message in view.
fn render_messages(frame: &mut Frame, area: Rect, app: &App) {
    let items: Vec<ListItem> = app
        .messages
        .iter()
        .map(|msg| ListItem::new(message_line(msg)))
        .collect();

    let block = Block::default()
        .title(Span::styled(format!("Room {}", app.room), theme::highlighted()))
        .borders(Borders::ALL)
        .border_style(theme::normal());

    let list = List::new(items).block(block);
    let mut state = ListState::default();
    if !app.messages.is_empty() {
        state.select(Some(app.message_scroll));
    }
    frame.render_stateful_widget(list, area, &mut state);
}

/// Render the input box.
fn render_input(frame: &mut Frame, area: Rect, app: &App) {
    let mut display_text = app.input.clone();
    let at = display_text
        .char_indices()
        .nth(app.cursor_position)
        .map_or(display_text.len(), |(i, _)| i);
    display_text.insert(at, '\u{2588}');

    let input_line = if app.input.is_empty() {
        Line::from(vec![
            Span::styled("\u{2588}", theme::normal()),
            Span::styled(" Type a message, /help for commands", theme::dimmed()),
        ])
    } else {
        Line::from(Span::styled(display_text, theme::normal()))
    };

    let block = Block::default()
        .title("Input")
        .borders(Borders::ALL)
        .border_style(theme::highlighted());

    frame.render_widget(Paragraph::new(input_line).block(block), area);
}
