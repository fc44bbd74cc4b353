//! TUI screens

mod grading;
mod recorder;

pub use grading::GradingScreen;
pub use recorder::{RecorderScreen, RecorderView};
