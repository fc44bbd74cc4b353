//! TUI module for avilingo
//!
//! Interactive recording screen using ratatui.

mod app;
pub mod screens;
pub mod widgets;

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::prelude::*;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::audio::{create_device, AudioArtifact, StandardEncoders};
use crate::config::Settings;
use crate::grading::{GradingApi, GradingConfig, GradingOrchestrator};
use crate::recorder::{self, Recorder, RecorderConfig};
use crate::session::SessionGuard;
pub use app::{App, AppScreen};

/// What the recording screen was opened for
#[derive(Debug, Clone)]
pub struct RecordOptions {
    pub scenario: String,
    /// Offer submission for grading from the screen
    pub submit: bool,
}

/// State left behind when the screen closes
pub struct TuiOutcome {
    /// Last finished recording, if any
    pub artifact: Option<AudioArtifact>,
    /// Grading started from the screen, possibly still running
    pub grading: Option<Arc<GradingOrchestrator>>,
}

/// Run the recording screen until the user quits
pub async fn run(settings: &Settings, options: RecordOptions) -> Result<TuiOutcome> {
    let grading = if options.submit {
        let guard = SessionGuard::from_settings(settings)?;
        Some(Arc::new(GradingOrchestrator::new(
            GradingApi::new(Arc::new(guard)),
            GradingConfig::from_settings(settings),
        )))
    } else {
        None
    };

    let recorder = Recorder::new(
        RecorderConfig::from_settings(settings),
        create_device(settings),
        Arc::new(StandardEncoders),
    );
    let (handle, task) = recorder::spawn(recorder, settings.recorder.frame_interval());
    let mut app = App::new(options.scenario, handle.clone(), grading.clone());

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run main loop
    let result = run_app(&mut terminal, &mut app, settings.recorder.frame_interval()).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    let artifact = handle.snapshot().artifact;
    handle.shutdown().await;
    if let Err(e) = task.await {
        tracing::warn!("Recorder task ended abnormally: {}", e);
    }

    result.map(|_| TuiOutcome { artifact, grading })
}

/// Main application loop
async fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    frame_interval: Duration,
) -> Result<()> {
    // Key polling blocks, so keep it short enough for a smooth meter
    let poll_timeout = frame_interval.clamp(Duration::from_millis(10), Duration::from_millis(50));

    loop {
        // Draw UI
        terminal.draw(|f| app.draw(f))?;

        if event::poll(poll_timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => {
                            if app.should_quit() {
                                return Ok(());
                            }
                            app.handle_back();
                        }
                        KeyCode::Char('?') => {
                            app.toggle_help();
                        }
                        _ => {
                            app.handle_key(key.code).await;
                        }
                    }
                }
            }
        }

        // Let the recorder task run between frames
        tokio::task::yield_now().await;
    }
}
