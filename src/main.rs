//! avilingo - Aviation-English speaking practice with ICAO grading
//!
//! Entry point for the avilingo CLI application.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use avilingo::cli::{commands, Cli, Commands};
use avilingo::config::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        avilingo::cli::completions::print(shell);
        return Ok(());
    }

    // Load configuration only for runtime commands.
    let settings = Settings::load()?;
    init_logging(&settings, cli.verbose);

    // Execute command
    match cli.command {
        Commands::Record {
            scenario,
            max_secs,
            no_submit,
        } => {
            commands::record(&settings, &scenario, max_secs, no_submit).await?;
        }
        Commands::Submit {
            file,
            scenario,
            duration,
        } => {
            commands::submit_file(&settings, &file, &scenario, duration).await?;
        }
        Commands::Status { id, watch } => {
            commands::show_status(&settings, &id, watch).await?;
        }
        Commands::Result { id, json } => {
            commands::show_result(&settings, &id, json).await?;
        }
        Commands::Retry { id } => {
            commands::retry_submission(&settings, &id).await?;
        }
        Commands::Login { email } => {
            commands::login(&settings, &email).await?;
        }
        Commands::Logout => {
            commands::logout(&settings).await?;
        }
        Commands::Doctor { json } => {
            commands::run_doctor(&settings, json).await?;
        }
        Commands::Config(config_cmd) => {
            commands::config_command(&settings, config_cmd)?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

fn init_logging(settings: &Settings, verbose: bool) {
    let fallback = if verbose {
        "debug"
    } else {
        settings.general.log_level.as_str()
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}
