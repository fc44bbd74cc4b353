//! Recording screen state and key handling

use crossterm::event::KeyCode;
use ratatui::prelude::*;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::grading::GradingOrchestrator;
use crate::recorder::{RecorderHandle, StateKind};
use crate::tui::screens::{GradingScreen, RecorderScreen, RecorderView};
use crate::tui::widgets::HelpPopup;
use crate::SpeakingError;

/// Current screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppScreen {
    Recorder,
    Grading,
}

pub struct App {
    scenario: String,
    recorder: RecorderHandle,
    grading: Option<Arc<GradingOrchestrator>>,
    current_screen: AppScreen,
    show_help: bool,
    /// One-line message under the status panel
    notice: Option<String>,
    /// Start waiting on the microphone prompt
    starting: Option<JoinHandle<()>>,
}

impl App {
    pub fn new(
        scenario: String,
        recorder: RecorderHandle,
        grading: Option<Arc<GradingOrchestrator>>,
    ) -> Self {
        Self {
            scenario,
            recorder,
            grading,
            current_screen: AppScreen::Recorder,
            show_help: false,
            notice: None,
            starting: None,
        }
    }

    pub fn screen(&self) -> AppScreen {
        self.current_screen
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn draw(&self, frame: &mut Frame) {
        let area = frame.size();

        match self.current_screen {
            AppScreen::Recorder => {
                let snapshot = self.recorder.snapshot();
                // A capture error outranks older notices
                let error = snapshot.error.as_ref().map(SpeakingError::user_message);
                let view = RecorderView {
                    scenario: &self.scenario,
                    snapshot: &snapshot,
                    level: self.recorder.level(),
                    notice: error.as_deref().or(self.notice.as_deref()),
                    can_submit: self.grading.is_some(),
                };
                RecorderScreen::draw(frame, area, &view);
            }
            AppScreen::Grading => {
                let snapshot = self
                    .grading
                    .as_ref()
                    .map(|g| g.snapshot())
                    .unwrap_or_default();
                GradingScreen::draw(frame, area, &self.scenario, &snapshot);
            }
        }

        if self.show_help {
            HelpPopup::draw(frame, area, self.current_screen);
        }
    }

    pub async fn handle_key(&mut self, key: KeyCode) {
        if self.show_help {
            self.show_help = false;
            return;
        }

        match self.current_screen {
            AppScreen::Recorder => self.handle_recorder_key(key).await,
            AppScreen::Grading => self.handle_grading_key(key),
        }
    }

    async fn handle_recorder_key(&mut self, key: KeyCode) {
        let outcome = match key {
            KeyCode::Char(' ') => self.toggle().await,
            KeyCode::Enter => self.stop().await,
            KeyCode::Char('r') => self.rerecord().await,
            KeyCode::Char('s') => {
                self.submit();
                Ok(())
            }
            KeyCode::Char('g') if self.grading.is_some() => {
                self.switch_screen(AppScreen::Grading);
                Ok(())
            }
            _ => Ok(()),
        };

        if let Err(e) = outcome {
            debug!("Recorder command failed: {}", e);
            self.notice = Some(e.user_message());
        }
    }

    fn handle_grading_key(&mut self, key: KeyCode) {
        let Some(grading) = self.grading.clone() else {
            return;
        };

        match key {
            KeyCode::Char('c') => {
                if grading.cancel() {
                    self.notice = Some("Grading cancelled".into());
                    self.switch_screen(AppScreen::Recorder);
                }
            }
            KeyCode::Char('t') => {
                let snapshot = grading.snapshot();
                if snapshot.can_retry() {
                    tokio::spawn(async move {
                        if let Err(e) = grading.retry().await {
                            debug!("Retry not started: {}", e);
                        }
                    });
                } else if snapshot.can_resubmit() {
                    self.submit();
                }
            }
            _ => {}
        }
    }

    /// Space: start, pause or resume depending on the state
    async fn toggle(&mut self) -> crate::Result<()> {
        match self.recorder.snapshot().state {
            StateKind::Idle | StateKind::Ready | StateKind::Stopped => {
                self.notice = None;
                self.spawn_start();
                Ok(())
            }
            StateKind::Recording => self.recorder.pause().await,
            StateKind::Paused => self.recorder.resume().await,
            StateKind::Requesting => Ok(()),
        }
    }

    async fn stop(&mut self) -> crate::Result<()> {
        if let Some(artifact) = self.recorder.stop().await? {
            self.notice = Some(format!(
                "Recorded {} ({:.1} KB)",
                format_clock(artifact.duration_secs),
                artifact.size_bytes() as f64 / 1024.0
            ));
        }
        Ok(())
    }

    /// Discard the current take and start over
    async fn rerecord(&mut self) -> crate::Result<()> {
        if let Some(grading) = &self.grading {
            if grading.snapshot().phase.is_active() {
                self.notice = Some("Cancel grading before recording again".into());
                return Ok(());
            }
        }
        self.recorder.reset().await?;
        self.notice = None;
        self.spawn_start();
        Ok(())
    }

    /// Start off the key loop so the screen keeps drawing while the
    /// microphone prompt is open; failures land in the recorder snapshot
    fn spawn_start(&mut self) {
        if self.starting.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let recorder = self.recorder.clone();
        self.starting = Some(tokio::spawn(async move {
            if let Err(e) = recorder.start().await {
                debug!("Recording not started: {}", e);
            }
        }));
    }

    fn submit(&mut self) {
        let Some(grading) = self.grading.clone() else {
            self.notice = Some("Submission is disabled for this session".into());
            return;
        };

        let snapshot = self.recorder.snapshot();
        if matches!(snapshot.state, StateKind::Recording | StateKind::Paused) {
            self.notice = Some("Stop recording before submitting".into());
            return;
        }
        let Some(artifact) = snapshot.artifact else {
            self.notice = Some("Nothing recorded yet".into());
            return;
        };
        if grading.snapshot().phase.is_active() {
            self.switch_screen(AppScreen::Grading);
            return;
        }

        let scenario = self.scenario.clone();
        tokio::spawn(async move {
            if let Err(e) = grading.submit(&scenario, &artifact).await {
                debug!("Submission not completed: {}", e);
            }
        });
        self.switch_screen(AppScreen::Grading);
    }

    fn switch_screen(&mut self, screen: AppScreen) {
        self.current_screen = screen;
    }

    /// Handle back navigation
    pub fn handle_back(&mut self) {
        if self.show_help {
            self.show_help = false;
        } else if self.current_screen != AppScreen::Recorder {
            self.current_screen = AppScreen::Recorder;
        }
    }

    /// Check if app should quit
    pub fn should_quit(&self) -> bool {
        self.current_screen == AppScreen::Recorder && !self.show_help
    }

    /// Toggle help popup
    pub fn toggle_help(&mut self) {
        self.show_help = !self.show_help;
    }
}

pub(crate) fn format_clock(secs: f64) -> String {
    let total = secs.max(0.0).floor() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}
