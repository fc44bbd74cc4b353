//! CLI command implementations

use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::audio::{list_input_devices, negotiate, AudioArtifact, StandardEncoders, StreamSpec};
use crate::cli::args::ConfigCommand;
use crate::config::Settings;
use crate::grading::{
    validate_artifact, GradingApi, GradingConfig, GradingOrchestrator, GradingOutcome,
    GradingResult, GradingSnapshot, StatusResponse, SubmissionPhase, MAX_DURATION_SECS,
};
use crate::session::{SessionGuard, TransportError};
use crate::tui::{self, RecordOptions};
use crate::SpeakingError;

/// Record a response on the TUI screen, then follow its grading
pub async fn record(
    settings: &Settings,
    scenario: &str,
    max_secs: Option<u64>,
    no_submit: bool,
) -> Result<()> {
    let mut settings = settings.clone();
    if let Some(secs) = max_secs {
        if secs == 0 {
            anyhow::bail!("--max-secs must be greater than zero");
        }
        settings.recorder.max_duration_secs = secs.min(MAX_DURATION_SECS as u64);
    }
    settings.ensure_dirs()?;

    let outcome = tui::run(
        &settings,
        RecordOptions {
            scenario: scenario.to_string(),
            submit: !no_submit,
        },
    )
    .await?;

    finish_recording(
        &settings,
        scenario,
        outcome.artifact,
        outcome.grading.as_deref(),
        no_submit,
    )
    .await
}

/// Follow a take the server accepted; otherwise keep it on disk
pub async fn finish_recording(
    settings: &Settings,
    scenario: &str,
    artifact: Option<AudioArtifact>,
    grading: Option<&GradingOrchestrator>,
    no_submit: bool,
) -> Result<()> {
    let snapshot = match grading {
        Some(grading) => Some(grading.upload_settled().await),
        None => None,
    };
    if let (Some(grading), Some(snapshot)) = (grading, &snapshot) {
        if snapshot.job.is_some() {
            return follow(grading).await;
        }
    }

    let Some(artifact) = artifact else {
        println!("Nothing recorded");
        return Ok(());
    };
    let path = save_recording(settings, scenario, &artifact)?;
    println!(
        "Saved {} recording to {}",
        format_duration(artifact.duration_secs),
        path.display()
    );

    let upload_error = snapshot
        .filter(|s| s.phase == SubmissionPhase::Failed)
        .and_then(|s| s.error);
    match upload_error {
        Some(err) => {
            let verb = if err.offers_retry() { "Retry" } else { "Submit it later" };
            println!(
                "{} with: avilingo submit {} --scenario {}",
                verb,
                path.display(),
                scenario
            );
            Err(user_error(err))
        }
        None => {
            if !no_submit {
                println!(
                    "Submit it later with: avilingo submit {} --scenario {}",
                    path.display(),
                    scenario
                );
            }
            Ok(())
        }
    }
}

/// Upload an existing recording and follow its grading
pub async fn submit_file(
    settings: &Settings,
    file: &Path,
    scenario: &str,
    duration: Option<f64>,
) -> Result<()> {
    let artifact = AudioArtifact::from_file(file, duration).map_err(user_error)?;
    validate_artifact(&artifact).map_err(user_error)?;

    let grading = orchestrator(settings)?;
    let job = grading.submit(scenario, &artifact).await.map_err(|e| {
        if e.offers_retry() {
            println!(
                "Retry with: avilingo submit {} --scenario {}",
                file.display(),
                scenario
            );
        }
        user_error(e)
    })?;
    println!(
        "Submitted {} ({}, {}) as {}",
        file.display(),
        artifact.format,
        format_duration(artifact.duration_secs),
        job.id
    );

    follow(&grading).await
}

/// Show the grading status of a submission
pub async fn show_status(settings: &Settings, id: &str, watch: bool) -> Result<()> {
    if watch {
        let grading = orchestrator(settings)?;
        grading.track(id).map_err(user_error)?;
        return follow(&grading).await;
    }

    let status = grading_api(settings)?
        .status(id)
        .await
        .map_err(request_error)?;
    print_status(id, &status);
    Ok(())
}

/// Show the graded result of a submission
pub async fn show_result(settings: &Settings, id: &str, json: bool) -> Result<()> {
    let result = grading_api(settings)?
        .result(id)
        .await
        .map_err(request_error)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }
    Ok(())
}

/// Ask the service to grade a failed submission again
pub async fn retry_submission(settings: &Settings, id: &str) -> Result<()> {
    let grading = orchestrator(settings)?;
    let response = grading_api(settings)?
        .retry(id)
        .await
        .map_err(user_error)?;

    println!(
        "{} (retry {})",
        response
            .message
            .as_deref()
            .unwrap_or("Submission queued for reprocessing"),
        response.retry_count
    );

    grading.track(&response.submission_id).map_err(user_error)?;
    follow(&grading).await
}

/// Sign in and store the session
pub async fn login(settings: &Settings, email: &str) -> Result<()> {
    let password = match std::env::var("AVILINGO_PASSWORD") {
        Ok(password) if !password.is_empty() => password,
        _ => read_password()?,
    };
    if password.is_empty() {
        anyhow::bail!("No password given");
    }

    let guard = SessionGuard::from_settings(settings)?;
    guard.login(email, &password).await.map_err(|e| match e {
        TransportError::Status { message, .. } => anyhow::anyhow!("Sign-in failed: {}", message),
        other => anyhow::Error::new(other).context("Sign-in failed"),
    })?;

    println!("Signed in as {}", email);
    Ok(())
}

/// Forget the stored session
pub async fn logout(settings: &Settings) -> Result<()> {
    SessionGuard::from_settings(settings)?.logout().await?;
    println!("Signed out");
    Ok(())
}

/// Handle config subcommands
pub fn config_command(settings: &Settings, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show => {
            let toml = toml::to_string_pretty(settings)?;
            println!("{}", toml);
        }
        ConfigCommand::Path => {
            let path = Settings::config_path()?;
            println!("{}", path.display());
        }
        ConfigCommand::Init { force } => {
            let path = Settings::config_path()?;
            if path.exists() && !force {
                anyhow::bail!(
                    "Config file already exists at {}. Use --force to overwrite.",
                    path.display()
                );
            }
            Settings::write_default(&path)?;
            println!("Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: &'static str,
    detail: String,
}

#[derive(Serialize)]
struct DoctorReport {
    version: &'static str,
    api_base_url: String,
    input_devices: Vec<String>,
    encoding: Option<String>,
    signed_in: bool,
    checks: Vec<DoctorCheck>,
}

/// Run diagnostic checks to help troubleshoot local setup issues.
pub async fn run_doctor(settings: &Settings, json: bool) -> Result<()> {
    let report = collect_doctor_report(settings).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("avilingo doctor {}", report.version);
    println!("api: {}", report.api_base_url);
    println!();

    for check in &report.checks {
        println!("{:<12} {:<8} {}", check.name, check.status, check.detail);
    }

    if !report.input_devices.is_empty() {
        println!();
        println!("Input devices:");
        for device in &report.input_devices {
            println!("  - {}", device);
        }
    }

    Ok(())
}

async fn collect_doctor_report(settings: &Settings) -> DoctorReport {
    let input_devices = list_input_devices();

    let spec = StreamSpec {
        sample_rate: settings.recorder.sample_rate,
        bitrate: settings.recorder.bitrate,
    };
    let negotiated = negotiate(&StandardEncoders, &settings.recorder.encodings, &spec)
        .map(|encoder| encoder.format());

    let session = SessionGuard::from_settings(settings);
    let signed_in = match &session {
        Ok(guard) => guard.is_signed_in().await,
        Err(_) => false,
    };

    let config_found = Settings::config_path()
        .map(|path| path.exists())
        .unwrap_or(false);

    let wanted = if settings.recorder.device.is_empty() {
        "default input".to_string()
    } else {
        settings.recorder.device.clone()
    };

    let checks = vec![
        DoctorCheck {
            name: "microphone",
            status: if input_devices.is_empty() { "missing" } else { "ok" },
            detail: format!("{} device(s) found, using {}", input_devices.len(), wanted),
        },
        DoctorCheck {
            name: "encoder",
            status: if negotiated.is_ok() { "ok" } else { "missing" },
            detail: match &negotiated {
                Ok(format) => format!("{} at {} Hz", format, spec.sample_rate),
                Err(e) => e.to_string(),
            },
        },
        DoctorCheck {
            name: "session",
            status: match (&session, signed_in) {
                (Err(_), _) => "error",
                (Ok(_), true) => "ok",
                (Ok(_), false) => "missing",
            },
            detail: match &session {
                Err(e) => format!("{:#}", e),
                Ok(_) if signed_in => "signed in".to_string(),
                Ok(_) => "run `avilingo login --email <EMAIL>`".to_string(),
            },
        },
        DoctorCheck {
            name: "config",
            status: if config_found { "ok" } else { "default" },
            detail: Settings::config_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|e| e.to_string()),
        },
    ];

    DoctorReport {
        version: crate::VERSION,
        api_base_url: settings.api.base_url.clone(),
        input_devices,
        encoding: negotiated.ok().map(|f| f.to_string()),
        signed_in,
        checks,
    }
}

// Helper functions

fn grading_api(settings: &Settings) -> Result<GradingApi> {
    let guard = SessionGuard::from_settings(settings)?;
    Ok(GradingApi::new(Arc::new(guard)))
}

fn orchestrator(settings: &Settings) -> Result<GradingOrchestrator> {
    Ok(GradingOrchestrator::new(
        grading_api(settings)?,
        GradingConfig::from_settings(settings),
    ))
}

/// Print progress until grading ends; Ctrl-C stops following
async fn follow(grading: &GradingOrchestrator) -> Result<()> {
    let mut rx = grading.subscribe();
    let mut last = None;

    loop {
        let snapshot = rx.borrow_and_update().clone();
        let line = (snapshot.phase, snapshot.progress());
        if last != Some(line) {
            print_progress(&snapshot);
            last = Some(line);
        }
        if !snapshot.phase.is_active() {
            break;
        }

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                let id = snapshot.job.map(|j| j.id);
                grading.cancel();
                println!("Stopped following.");
                if let Some(id) = id {
                    println!("Grading continues on the server; check with: avilingo status {}", id);
                }
                return Ok(());
            }
        }
    }

    let id = grading.snapshot().job.map(|j| j.id).unwrap_or_default();
    match grading.wait_for_outcome().await {
        GradingOutcome::Completed(result) => {
            println!();
            print_result(&result);
            Ok(())
        }
        GradingOutcome::Failed(failure) => {
            if failure.can_retry {
                println!("Retry with: avilingo retry {}", id);
            }
            Err(user_error(SpeakingError::GradingFailed(failure)))
        }
        GradingOutcome::Error(e) => {
            if e.offers_retry() && !id.is_empty() {
                println!("Check again with: avilingo status {} --watch", id);
            }
            Err(user_error(e))
        }
        GradingOutcome::Cancelled => {
            println!("Grading cancelled");
            Ok(())
        }
    }
}

fn print_progress(snapshot: &GradingSnapshot) {
    match snapshot.phase {
        SubmissionPhase::Uploading => println!("Uploading..."),
        SubmissionPhase::Queued => println!("Queued"),
        SubmissionPhase::Processing => {
            let eta = snapshot
                .job
                .as_ref()
                .and_then(|j| j.estimated_seconds_remaining)
                .map(|secs| format!(" (~{}s left)", secs))
                .unwrap_or_default();
            println!("Processing {}%{}", snapshot.progress(), eta);
        }
        SubmissionPhase::Completed => println!("Completed 100%"),
        SubmissionPhase::Failed | SubmissionPhase::NotStarted => {}
    }
}

fn print_status(id: &str, status: &StatusResponse) {
    println!("Submission: {}", id);
    println!("Status: {}", status.status);
    println!("Progress: {}%", status.progress_percent.min(100));
    if let Some(secs) = status.estimated_seconds_remaining {
        println!("Estimated: ~{}s remaining", secs);
    }
    if let Some(message) = &status.error_message {
        println!(
            "Error: {} ({})",
            message,
            status.error_code.as_deref().unwrap_or("UNKNOWN_ERROR")
        );
    }
    if let Some(action) = &status.user_action {
        println!("Hint: {}", action);
    }
    if status.retry_count > 0 {
        println!("Retries: {}", status.retry_count);
    }
    if status.can_retry {
        println!("Retry with: avilingo retry {}", id);
    }
}

fn print_result(result: &GradingResult) {
    println!("Submission: {}", result.id);
    if let Some(overall) = result.overall_score {
        println!("ICAO level: {:.1}   XP +{}", overall, result.xp_earned);
    }

    if let Some(scores) = &result.scores {
        println!();
        println!("  {:<14} {:.0}", "Pronunciation", scores.pronunciation);
        println!("  {:<14} {:.0}", "Structure", scores.structure);
        println!("  {:<14} {:.0}", "Vocabulary", scores.vocabulary);
        println!("  {:<14} {:.0}", "Fluency", scores.fluency);
        println!("  {:<14} {:.0}", "Comprehension", scores.comprehension);
        println!("  {:<14} {:.0}", "Interaction", scores.interaction);
    }

    if let Some(feedback) = &result.ai_feedback {
        println!();
        if !feedback.overall.is_empty() {
            println!("{}", feedback.overall);
        }
        for strength in &feedback.strengths {
            println!("  + {}", strength);
        }
        for improvement in &feedback.improvements {
            println!("  - {}", improvement);
        }
        for correction in feedback.specific_corrections.iter().flatten() {
            println!(
                "  \"{}\" -> \"{}\": {}",
                correction.said, correction.should_be, correction.explanation
            );
        }
    }

    if let Some(transcript) = &result.transcript {
        println!();
        println!("Transcript:");
        println!("{}", transcript);
    }
    if let Some(sample) = &result.sample_response {
        println!();
        println!("Sample response:");
        println!("{}", sample);
    }
}

/// Keep the message users should see on top, with the detail underneath
fn user_error(err: SpeakingError) -> anyhow::Error {
    let message = err.user_message();
    anyhow::Error::new(err).context(message)
}

fn request_error(err: TransportError) -> anyhow::Error {
    match err {
        TransportError::SessionExpired => user_error(SpeakingError::SessionExpired),
        other => anyhow::Error::new(other),
    }
}

fn read_password() -> Result<String> {
    eprint!("Password: ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn save_recording(settings: &Settings, scenario: &str, artifact: &AudioArtifact) -> Result<PathBuf> {
    let dir = settings.recordings_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let path = dir.join(recording_file_name(
        scenario,
        &Local::now().format("%Y%m%d-%H%M%S").to_string(),
        artifact.format.extension(),
    ));
    std::fs::write(&path, &artifact.payload)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

fn recording_file_name(scenario: &str, stamp: &str, extension: &str) -> String {
    let slug: String = scenario
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let slug = slug.trim_matches('-');
    let slug = if slug.is_empty() { "scenario" } else { slug };
    format!("{}-{}.{}", slug, stamp, extension)
}

fn format_duration(secs: f64) -> String {
    let total = secs.max(0.0).round() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}
