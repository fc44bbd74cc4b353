//! Help popup widget

use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};

use crate::tui::AppScreen;

/// Help popup that shows keyboard shortcuts
pub struct HelpPopup;

impl HelpPopup {
    pub fn draw(frame: &mut Frame, area: Rect, screen: AppScreen) {
        // Centered, 60% width, 70% height
        let popup_width = (area.width as f32 * 0.6) as u16;
        let popup_height = (area.height as f32 * 0.7) as u16;
        let popup_area = Rect {
            x: area.x + (area.width - popup_width) / 2,
            y: area.y + (area.height - popup_height) / 2,
            width: popup_width,
            height: popup_height,
        };

        frame.render_widget(Clear, popup_area);

        let (title, shortcuts): (&str, &[(&str, &str)]) = match screen {
            AppScreen::Recorder => (
                "Recording Shortcuts",
                &[
                    ("space", "Record / pause / resume"),
                    ("enter", "Stop recording"),
                    ("r", "Discard and record again"),
                    ("s", "Submit for grading"),
                    ("g", "Show grading progress"),
                    ("?", "Show this help"),
                    ("q/esc", "Quit"),
                ],
            ),
            AppScreen::Grading => (
                "Grading Shortcuts",
                &[
                    ("c", "Cancel grading"),
                    ("t", "Retry a failed grading or upload"),
                    ("esc", "Back to recording"),
                ],
            ),
        };

        let mut text = vec![
            Line::from(Span::styled(title, Style::default().fg(Color::Cyan).bold())),
            Line::from(""),
        ];
        text.extend(shortcuts.iter().map(|(key, action)| {
            Line::from(vec![
                Span::styled(format!("{:<8}", key), Style::default().fg(Color::Yellow)),
                Span::raw(*action),
            ])
        }));
        text.push(Line::from(""));
        text.push(Line::from(Span::styled(
            "Press any key to close",
            Style::default().fg(Color::DarkGray),
        )));

        let help = Paragraph::new(text).wrap(Wrap { trim: true }).block(
            Block::default()
                .title(" Help ")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan))
                .style(Style::default().bg(Color::Black)),
        );

        frame.render_widget(help, popup_area);
    }
}
