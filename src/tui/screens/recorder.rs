//! Recording screen - live level meter, elapsed time and controls

use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Gauge, Paragraph, Wrap},
};

use crate::recorder::{RecorderSnapshot, StateKind};
use crate::tui::app::format_clock;

/// Everything the recording screen shows for one frame
pub struct RecorderView<'a> {
    pub scenario: &'a str,
    pub snapshot: &'a RecorderSnapshot,
    /// Meter level in [0, 1]
    pub level: f32,
    pub notice: Option<&'a str>,
    pub can_submit: bool,
}

pub struct RecorderScreen;

impl RecorderScreen {
    pub fn draw(frame: &mut Frame, area: Rect, view: &RecorderView) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Title
                Constraint::Length(7), // Status
                Constraint::Length(3), // Time limit
                Constraint::Min(3),    // Notice
                Constraint::Length(3), // Help
            ])
            .split(area);

        let title = Paragraph::new(format!("avilingo  |  scenario {}", view.scenario))
            .style(Style::default().fg(Color::Cyan).bold())
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::BOTTOM));
        frame.render_widget(title, chunks[0]);

        let snapshot = view.snapshot;
        let (label, color) = state_label(snapshot.state);
        let elapsed = snapshot.elapsed.as_secs_f64();
        let live = matches!(snapshot.state, StateKind::Recording | StateKind::Paused);

        let mut status = vec![
            Line::from(vec![
                Span::raw("Status: "),
                Span::styled(label, Style::default().fg(color).bold()),
            ]),
            Line::from(vec![
                Span::raw("Elapsed: "),
                Span::styled(
                    format!(
                        "{} / {}",
                        format_clock(elapsed),
                        format_clock(snapshot.max_duration.as_secs_f64())
                    ),
                    Style::default().fg(Color::Yellow),
                ),
            ]),
            Line::from(vec![
                Span::raw("Level: "),
                Span::styled(
                    create_level_bar(if live { view.level } else { 0.0 }),
                    Style::default().fg(Color::Green),
                ),
            ]),
        ];

        if let Some(device) = &snapshot.device {
            status.push(Line::from(vec![
                Span::raw("Microphone: "),
                Span::styled(device.clone(), Style::default().fg(Color::White)),
            ]));
        }
        if let Some(artifact) = &snapshot.artifact {
            status.push(Line::from(vec![
                Span::raw("Take: "),
                Span::styled(
                    format!(
                        "{} {} ({:.1} KB)",
                        format_clock(artifact.duration_secs),
                        artifact.format,
                        artifact.size_bytes() as f64 / 1024.0
                    ),
                    Style::default().fg(Color::White),
                ),
            ]));
        }

        let status_widget = Paragraph::new(status).block(
            Block::default()
                .title(" Recording ")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Blue)),
        );
        frame.render_widget(status_widget, chunks[1]);

        let max = snapshot.max_duration.as_secs_f64().max(1.0);
        let limit = Gauge::default()
            .block(Block::default().title(" Time limit ").borders(Borders::ALL))
            .gauge_style(Style::default().fg(limit_color(snapshot.remaining().as_secs())))
            .ratio((elapsed / max).clamp(0.0, 1.0))
            .label(format!("{}s left", snapshot.remaining().as_secs()));
        frame.render_widget(limit, chunks[2]);

        let notice = Paragraph::new(view.notice.unwrap_or(""))
            .style(Style::default().fg(Color::White))
            .wrap(Wrap { trim: true })
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::DarkGray)),
            );
        frame.render_widget(notice, chunks[3]);

        let mut keys = vec![
            key_hint("space"),
            Span::raw(space_action(snapshot.state)),
            key_hint("enter"),
            Span::raw(" Stop  "),
            key_hint("r"),
            Span::raw(" Re-record  "),
        ];
        if view.can_submit {
            keys.push(key_hint("s"));
            keys.push(Span::raw(" Submit  "));
        }
        keys.push(key_hint("q"));
        keys.push(Span::raw(" Quit"));

        let help = Paragraph::new(Line::from(keys)).alignment(Alignment::Center);
        frame.render_widget(help, chunks[4]);
    }
}

fn state_label(state: StateKind) -> (&'static str, Color) {
    match state {
        StateKind::Idle => ("Idle", Color::Gray),
        StateKind::Requesting => ("Waiting for microphone...", Color::Yellow),
        StateKind::Ready => ("Ready", Color::Gray),
        StateKind::Recording => ("● Recording", Color::Red),
        StateKind::Paused => ("Paused", Color::Yellow),
        StateKind::Stopped => ("Stopped", Color::Green),
    }
}

fn space_action(state: StateKind) -> &'static str {
    match state {
        StateKind::Recording => " Pause  ",
        StateKind::Paused => " Resume  ",
        _ => " Record  ",
    }
}

fn limit_color(remaining_secs: u64) -> Color {
    match remaining_secs {
        0..=10 => Color::Red,
        11..=30 => Color::Yellow,
        _ => Color::Cyan,
    }
}

fn key_hint(key: &str) -> Span<'static> {
    Span::styled(
        format!(" [{}] ", key),
        Style::default().fg(Color::Black).bg(Color::Cyan),
    )
}

fn create_level_bar(level: f32) -> String {
    let filled = ((level.clamp(0.0, 1.0) * 20.0) as usize).min(20);
    format!("[{}{}]", "█".repeat(filled), "░".repeat(20 - filled))
}
