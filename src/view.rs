//! Render - pure function from the session to a frame.

use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
};

use crate::session::Session;
use crate::theme::{
    AMBER_WARNING, BG_PRIMARY, BG_SECONDARY, BORDER_SUBTLE, CYAN_PRIMARY, GREEN_ACTIVE,
    RED_ERROR, ROUNDED_BORDERS, TEXT_MUTED, TEXT_PRIMARY, TEXT_SECONDARY, get_spinner_frame,
    severity_color,
};
use crate::wizard::WizardState;

const DUPLICATE_NAME: &str = "The name you entered already exists.";

pub fn render(frame: &mut Frame, session: &Session, tick: u64) {
    let area = frame.area();
    frame.render_widget(Block::default().style(Style::default().bg(BG_PRIMARY)), area);

    let prompt = prompt_lines(session);
    // Borders plus content, never more than half the screen
    let prompt_height = (prompt.len() as u16 + 2).clamp(5, (area.height / 2).max(5));

    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),             // Header
            Constraint::Min(3),                // Operation log
            Constraint::Length(prompt_height), // Prompt
            Constraint::Length(1),             // Hints
        ])
        .split(area);

    render_header(frame, layout[0], session, tick);
    render_log(frame, layout[1], session);
    render_prompt(frame, layout[2], session, prompt);
    render_hints(frame, layout[3], session);
}

fn render_header(frame: &mut Frame, area: Rect, session: &Session, tick: u64) {
    let mut spans = vec![
        Span::styled(
            " PROXY CONSOLE",
            Style::default()
                .fg(CYAN_PRIMARY)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!(" - {}", session.state.title()),
            Style::default().fg(TEXT_PRIMARY),
        ),
    ];

    if let Some(title) = &session.running {
        spans.push(Span::styled(
            format!("  {} {title}", get_spinner_frame(tick)),
            Style::default().fg(AMBER_WARNING),
        ));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_log(frame: &mut Frame, area: Rect, session: &Session) {
    let block = Block::default()
        .title(Span::styled(" Log ", Style::default().fg(TEXT_MUTED)))
        .borders(Borders::ALL)
        .border_set(ROUNDED_BORDERS)
        .border_style(Style::default().fg(BORDER_SUBTLE))
        .style(Style::default().bg(BG_SECONDARY));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    // Keep the newest entry in view
    let visible = inner.height as usize;
    let skip = session.log.len().saturating_sub(visible);
    let lines: Vec<Line> = session
        .log
        .iter()
        .skip(skip)
        .map(|entry| {
            Line::from(Span::styled(
                entry.text.clone(),
                Style::default().fg(severity_color(entry.severity)),
            ))
        })
        .collect();

    frame.render_widget(Paragraph::new(lines), inner);
}

fn prompt_lines(session: &Session) -> Vec<Line<'static>> {
    let mut lines = Vec::new();

    let prompt = match (&session.state, &session.pending) {
        (WizardState::Confirm, Some(action)) => {
            format!("{} Type yes/y to confirm, anything else cancels:", action.question())
        }
        (state, _) => state.prompt().to_string(),
    };
    lines.push(Line::from(Span::styled(
        prompt,
        Style::default().fg(TEXT_PRIMARY),
    )));

    if session.state == WizardState::ConfigName {
        for name in session.configs.options() {
            lines.push(Line::from(Span::styled(
                format!("  {name}.conf"),
                Style::default().fg(TEXT_MUTED),
            )));
        }
    }

    if session.state.is_text() {
        lines.push(Line::from(vec![
            Span::styled("> ", Style::default().fg(GREEN_ACTIVE)),
            Span::styled(
                session.input.value().to_string(),
                Style::default().fg(TEXT_PRIMARY),
            ),
            Span::styled("█", Style::default().fg(CYAN_PRIMARY)),
        ]));
    } else if let Some(list) = session.active_list() {
        if list.is_empty() {
            lines.push(Line::from(Span::styled(
                "  (nothing to select)",
                Style::default().fg(RED_ERROR),
            )));
        }
        for (idx, option) in list.options().iter().enumerate() {
            let is_selected = idx == list.cursor();
            let (prefix, style) = if is_selected {
                (
                    "▸ ",
                    Style::default()
                        .fg(CYAN_PRIMARY)
                        .add_modifier(Modifier::BOLD),
                )
            } else {
                ("  ", Style::default().fg(TEXT_SECONDARY))
            };
            lines.push(Line::from(vec![
                Span::styled(prefix, Style::default().fg(GREEN_ACTIVE)),
                Span::styled(format!("{}. {option}", idx + 1), style),
            ]));
        }
    }

    if session.duplicate_name {
        lines.push(Line::from(Span::styled(
            DUPLICATE_NAME,
            Style::default().fg(AMBER_WARNING),
        )));
    }
    if let Some(error) = &session.input_error {
        lines.push(Line::from(Span::styled(
            format!("✗ {error}"),
            Style::default().fg(RED_ERROR),
        )));
    }

    lines
}

fn render_prompt(frame: &mut Frame, area: Rect, session: &Session, lines: Vec<Line<'static>>) {
    let block = Block::default()
        .title(Span::styled(
            format!(" {} ", session.state.title()),
            Style::default()
                .fg(CYAN_PRIMARY)
                .add_modifier(Modifier::BOLD),
        ))
        .borders(Borders::ALL)
        .border_set(ROUNDED_BORDERS)
        .border_style(Style::default().fg(CYAN_PRIMARY))
        .style(Style::default().bg(BG_SECONDARY));

    // Keep the cursor row visible in long lists
    let inner_height = area.height.saturating_sub(2) as usize;
    let cursor_row = session
        .active_list()
        .filter(|_| !session.state.is_text())
        .map_or(0, |list| list.cursor() + 1);
    let scroll = cursor_row.saturating_sub(inner_height.saturating_sub(1)) as u16;

    let paragraph = Paragraph::new(lines)
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((scroll, 0));
    frame.render_widget(paragraph, area);
}

fn key_hint(spans: &mut Vec<Span<'static>>, key: &'static str, label: &'static str) {
    spans.push(Span::styled(
        key,
        Style::default()
            .fg(CYAN_PRIMARY)
            .add_modifier(Modifier::BOLD),
    ));
    spans.push(Span::styled(label, Style::default().fg(TEXT_MUTED)));
}

fn render_hints(frame: &mut Frame, area: Rect, session: &Session) {
    let mut spans: Vec<Span> = vec![Span::raw(" ")];

    if session.is_busy() {
        spans.push(Span::styled("Running...  ", Style::default().fg(AMBER_WARNING)));
        key_hint(&mut spans, "Ctrl+C", " quit");
    } else if session.state.is_text() {
        key_hint(&mut spans, "Enter", " confirm  ");
        key_hint(&mut spans, "Esc", " back  ");
        key_hint(&mut spans, "Ctrl+C", " quit");
    } else {
        key_hint(&mut spans, "↑↓", " select  ");
        key_hint(&mut spans, "Enter", " confirm  ");
        if session.state.parent().is_some() {
            key_hint(&mut spans, "Esc", " back  ");
        }
        key_hint(&mut spans, "q", " quit");
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}
