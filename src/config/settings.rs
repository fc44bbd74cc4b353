//! Application settings management

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::EncodingFormat;
use crate::SpeakingError;

/// Main application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// General settings
    #[serde(default)]
    pub general: GeneralSettings,

    /// Grading service endpoint
    #[serde(default)]
    pub api: ApiSettings,

    /// Speech capture settings
    #[serde(default)]
    pub recorder: RecorderSettings,

    /// Grading job tracking
    #[serde(default)]
    pub grading: GradingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    /// Data directory for playback copies and the session token file
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Base URL of the API, including the version prefix
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderSettings {
    /// Hard cap on a single recording, in seconds
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,

    /// Encoding formats in order of preference
    #[serde(default = "default_encodings")]
    pub encodings: Vec<EncodingFormat>,

    /// Target bitrate for compressed formats, in bits per second
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,

    /// Requested capture sample rate (16000 suits speech recognition)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Preferred input device (empty = system default)
    #[serde(default)]
    pub device: String,

    /// Display frame interval for the level meter and timer, in milliseconds
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,

    /// Write a local playback copy of every finished recording
    #[serde(default = "default_true")]
    pub keep_local_copy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingSettings {
    /// Interval between status polls, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Retries allowed per submission
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Consecutive failed polls tolerated before giving up
    #[serde(default = "default_max_poll_errors")]
    pub max_poll_errors: u32,
}

// Default value functions

fn default_data_dir() -> PathBuf {
    ProjectDirs::from("com", "avilingo", "avilingo")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.local/share/avilingo"))
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_base_url() -> String {
    "http://localhost:8000/api/v1".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_duration_secs() -> u64 {
    180
}

fn default_encodings() -> Vec<EncodingFormat> {
    vec![EncodingFormat::OggOpus, EncodingFormat::Wav]
}

fn default_bitrate() -> u32 {
    24000
}

fn default_sample_rate() -> u32 {
    16000
}

fn default_frame_interval_ms() -> u64 {
    16
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_poll_errors() -> u32 {
    5
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            max_duration_secs: default_max_duration_secs(),
            encodings: default_encodings(),
            bitrate: default_bitrate(),
            sample_rate: default_sample_rate(),
            device: String::new(),
            frame_interval_ms: default_frame_interval_ms(),
            keep_local_copy: true,
        }
    }
}

impl Default for GradingSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_retries: default_max_retries(),
            max_poll_errors: default_max_poll_errors(),
        }
    }
}

impl RecorderSettings {
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }
}

impl GradingSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Settings {
    /// Load settings from the configuration file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            tracing::debug!("No config file found, using defaults");
            let mut settings = Self::default();
            settings.apply_env_overrides();
            return Ok(settings);
        }

        let mut settings = Self::load_from(&config_path)?;
        settings.apply_env_overrides();

        Ok(settings)
    }

    /// Parse settings from a specific file without env overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        settings
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(settings)
    }

    fn validate(&self) -> crate::Result<()> {
        if self.recorder.encodings.is_empty() {
            return Err(SpeakingError::Config(
                "recorder.encodings must list at least one format".into(),
            ));
        }
        if self.recorder.max_duration_secs == 0 {
            return Err(SpeakingError::Config(
                "recorder.max_duration_secs must be greater than zero".into(),
            ));
        }
        if self.grading.poll_interval_ms == 0 {
            return Err(SpeakingError::Config(
                "grading.poll_interval_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("AVILINGO_API_URL") {
            if !url.trim().is_empty() {
                self.api.base_url = url.trim().to_string();
            }
        }
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("com", "avilingo", "avilingo")
            .context("Could not determine config directory")?;

        let config_dir = dirs.config_dir();
        Ok(config_dir.join("config.toml"))
    }

    /// Write default configuration to a file
    pub fn write_default(path: &PathBuf) -> Result<()> {
        let settings = Self::default();
        let content = toml::to_string_pretty(&settings)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Directory holding local playback copies
    pub fn recordings_dir(&self) -> PathBuf {
        self.general.data_dir.join("recordings")
    }

    /// File holding the signed-in session tokens
    pub fn session_path(&self) -> PathBuf {
        self.general.data_dir.join("session.json")
    }

    /// Ensure all required directories exist
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.general.data_dir)?;
        std::fs::create_dir_all(self.recordings_dir())?;
        Ok(())
    }
}
