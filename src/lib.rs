//! avilingo - Aviation-English speaking practice client
//!
//! Captures a spoken response from the microphone, shows a live level meter
//! while recording, uploads the finished recording and follows the remote
//! ICAO grading job until it completes or fails.

pub mod audio;
pub mod cli;
pub mod config;
pub mod grading;
pub mod recorder;
pub mod session;
pub mod tui;

use thiserror::Error;

pub use grading::GradingFailure;

/// Errors surfaced by the capture and grading pipeline
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpeakingError {
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("No microphone available: {0}")]
    DeviceUnavailable(String),

    #[error("No supported encoding format (tried: {tried})")]
    EncoderUnsupported { tried: String },

    #[error("Encoder failed: {0}")]
    EncoderFailure(String),

    #[error("Upload failed: {0}")]
    UploadFailure(String),

    #[error("Session expired")]
    SessionExpired,

    #[error("Grading failed ({}): {}", .0.code, .0.message)]
    GradingFailed(GradingFailure),

    #[error("Invalid operation: {0}")]
    InvalidState(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SpeakingError {
    /// Short message suitable for showing to the user
    pub fn user_message(&self) -> String {
        match self {
            Self::PermissionDenied(_) => {
                "Microphone access was denied. Allow microphone access and try again.".to_string()
            }
            Self::DeviceUnavailable(_) => {
                "No microphone found. Connect a microphone and try again.".to_string()
            }
            Self::EncoderUnsupported { .. } => {
                "Recording is not supported on this device.".to_string()
            }
            Self::EncoderFailure(_) => "Recording failed. Please record again.".to_string(),
            Self::UploadFailure(_) => {
                "Could not upload your recording. Check your connection.".to_string()
            }
            Self::SessionExpired => "Your session has expired. Please sign in again.".to_string(),
            Self::GradingFailed(failure) => match &failure.user_action {
                Some(action) => format!("{} ({})", failure.message, action),
                None => failure.message.clone(),
            },
            Self::InvalidState(msg) => msg.clone(),
            Self::Cancelled => "Cancelled.".to_string(),
            Self::Config(msg) => format!("Configuration problem: {}", msg),
        }
    }

    /// Whether the user should be offered a single retry action
    pub fn offers_retry(&self) -> bool {
        match self {
            Self::PermissionDenied(_)
            | Self::DeviceUnavailable(_)
            | Self::EncoderFailure(_)
            | Self::UploadFailure(_) => true,
            Self::GradingFailed(failure) => failure.can_retry,
            Self::EncoderUnsupported { .. }
            | Self::SessionExpired
            | Self::InvalidState(_)
            | Self::Cancelled
            | Self::Config(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SpeakingError>;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "avilingo";
