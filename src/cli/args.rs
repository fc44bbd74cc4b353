//! CLI argument definitions using clap

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// avilingo - Aviation-English speaking practice with ICAO grading
#[derive(Parser, Debug)]
#[command(name = "avilingo")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record a response to a scenario and submit it for grading
    Record {
        /// Scenario ID to respond to
        #[arg(short, long)]
        scenario: String,

        /// Recording limit in seconds (at most 180)
        #[arg(long)]
        max_secs: Option<u64>,

        /// Record only; keep the file locally and skip grading
        #[arg(long)]
        no_submit: bool,
    },

    /// Upload an existing recording for grading
    Submit {
        /// Ogg/Opus or WAV file
        file: PathBuf,

        /// Scenario ID the recording answers
        #[arg(short, long)]
        scenario: String,

        /// Duration in seconds (required for Ogg files)
        #[arg(short, long)]
        duration: Option<f64>,
    },

    /// Show grading status of a submission
    Status {
        /// Submission ID
        id: String,

        /// Keep polling until grading finishes
        #[arg(short, long)]
        watch: bool,
    },

    /// Show the graded result of a submission
    Result {
        /// Submission ID
        id: String,

        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },

    /// Ask the service to grade a failed submission again
    Retry {
        /// Submission ID
        id: String,
    },

    /// Sign in to the grading service
    Login {
        /// Account email
        #[arg(short, long)]
        email: String,
    },

    /// Forget the stored session
    Logout,

    /// Check microphone, encoder and session setup
    Doctor {
        /// Emit machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}
