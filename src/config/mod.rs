//! Configuration module for avilingo
//!
//! Handles loading and managing application settings from TOML files.

mod settings;

pub use settings::{ApiSettings, GeneralSettings, GradingSettings, RecorderSettings, Settings};
