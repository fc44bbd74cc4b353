//! Grading screen - submission progress and the graded result

use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Gauge, Paragraph, Wrap},
};

use crate::grading::{GradingResult, GradingSnapshot, SubmissionPhase};

pub struct GradingScreen;

impl GradingScreen {
    pub fn draw(frame: &mut Frame, area: Rect, scenario: &str, snapshot: &GradingSnapshot) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Title
                Constraint::Length(3), // Progress
                Constraint::Min(5),    // Details
                Constraint::Length(3), // Help
            ])
            .split(area);

        let title = Paragraph::new(format!("Grading  |  scenario {}", scenario))
            .style(Style::default().fg(Color::Cyan).bold())
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::BOTTOM));
        frame.render_widget(title, chunks[0]);

        let progress = Gauge::default()
            .block(
                Block::default()
                    .title(format!(" {} ", snapshot.phase))
                    .borders(Borders::ALL),
            )
            .gauge_style(Style::default().fg(phase_color(snapshot.phase)))
            .percent(u16::from(snapshot.progress().min(100)))
            .label(progress_label(snapshot));
        frame.render_widget(progress, chunks[1]);

        let details = Paragraph::new(detail_lines(snapshot))
            .wrap(Wrap { trim: true })
            .block(
                Block::default()
                    .title(" Details ")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Blue)),
            );
        frame.render_widget(details, chunks[2]);

        let mut keys = Vec::new();
        if snapshot.phase.is_active() {
            keys.push(key_hint("c"));
            keys.push(Span::raw(" Cancel  "));
        }
        if snapshot.can_retry() || snapshot.can_resubmit() {
            keys.push(key_hint("t"));
            keys.push(Span::raw(" Retry  "));
        }
        keys.push(key_hint("esc"));
        keys.push(Span::raw(" Back"));

        let help = Paragraph::new(Line::from(keys)).alignment(Alignment::Center);
        frame.render_widget(help, chunks[3]);
    }
}

fn progress_label(snapshot: &GradingSnapshot) -> String {
    let eta = snapshot
        .job
        .as_ref()
        .and_then(|j| j.estimated_seconds_remaining)
        .filter(|_| snapshot.phase.is_active());
    match eta {
        Some(secs) => format!("{}%  (~{}s)", snapshot.progress(), secs),
        None => format!("{}%", snapshot.progress()),
    }
}

fn detail_lines(snapshot: &GradingSnapshot) -> Vec<Line<'static>> {
    let mut lines = Vec::new();

    if let Some(job) = &snapshot.job {
        lines.push(Line::from(vec![
            Span::raw("Submission: "),
            Span::styled(job.id.clone(), Style::default().fg(Color::White)),
        ]));
        if job.retry_count > 0 {
            lines.push(Line::from(format!("Retries: {}", job.retry_count)));
        }
    }

    match snapshot.phase {
        SubmissionPhase::NotStarted => lines.push(Line::from("Nothing submitted.")),
        SubmissionPhase::Uploading => lines.push(Line::from("Uploading recording...")),
        SubmissionPhase::Queued => lines.push(Line::from("Waiting for a grader...")),
        SubmissionPhase::Processing => lines.push(Line::from("Transcribing and scoring...")),
        SubmissionPhase::Completed => {
            if let Some(result) = snapshot.job.as_ref().and_then(|j| j.result.as_ref()) {
                lines.extend(result_lines(result));
            }
        }
        SubmissionPhase::Failed => {
            if let Some(error) = &snapshot.error {
                lines.push(Line::from(Span::styled(
                    error.user_message(),
                    Style::default().fg(Color::Red),
                )));
            } else if let Some(failure) = snapshot.job.as_ref().and_then(|j| j.failure.as_ref()) {
                lines.push(Line::from(Span::styled(
                    failure.message.clone(),
                    Style::default().fg(Color::Red),
                )));
                if let Some(action) = &failure.user_action {
                    lines.push(Line::from(action.clone()));
                }
                lines.push(Line::from(Span::styled(
                    failure.code.clone(),
                    Style::default().fg(Color::DarkGray),
                )));
            }
        }
    }

    lines
}

fn result_lines(result: &GradingResult) -> Vec<Line<'static>> {
    let mut lines = Vec::new();

    if let Some(overall) = result.overall_score {
        lines.push(Line::from(vec![
            Span::raw("ICAO level: "),
            Span::styled(format!("{:.1}", overall), Style::default().fg(Color::Green).bold()),
            Span::raw(format!("   XP +{}", result.xp_earned)),
        ]));
    }

    if let Some(scores) = &result.scores {
        lines.push(Line::from(format!(
            "Pronunciation {:.0}  Structure {:.0}  Vocabulary {:.0}",
            scores.pronunciation, scores.structure, scores.vocabulary
        )));
        lines.push(Line::from(format!(
            "Fluency {:.0}  Comprehension {:.0}  Interaction {:.0}",
            scores.fluency, scores.comprehension, scores.interaction
        )));
    }

    if let Some(feedback) = &result.ai_feedback {
        if !feedback.overall.is_empty() {
            lines.push(Line::from(""));
            lines.push(Line::from(feedback.overall.clone()));
        }
        for strength in &feedback.strengths {
            lines.push(Line::from(Span::styled(
                format!("+ {}", strength),
                Style::default().fg(Color::Green),
            )));
        }
        for improvement in &feedback.improvements {
            lines.push(Line::from(Span::styled(
                format!("- {}", improvement),
                Style::default().fg(Color::Yellow),
            )));
        }
    }

    if let Some(transcript) = &result.transcript {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            format!("\"{}\"", transcript),
            Style::default().fg(Color::DarkGray),
        )));
    }

    lines
}

fn phase_color(phase: SubmissionPhase) -> Color {
    match phase {
        SubmissionPhase::Completed => Color::Green,
        SubmissionPhase::Failed => Color::Red,
        _ => Color::Cyan,
    }
}

fn key_hint(key: &str) -> Span<'static> {
    Span::styled(
        format!(" [{}] ", key),
        Style::default().fg(Color::Black).bg(Color::Cyan),
    )
}
