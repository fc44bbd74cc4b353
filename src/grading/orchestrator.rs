//! Submission tracking
//!
//! ```text
//! NotStarted -> Uploading -> Queued -> Processing -> Completed | Failed
//! ```
//!
//! Every attempt gets a fresh cancellation token and a generation number.
//! Updates are applied through `send_if_modified` and dropped when their
//! generation is stale, so a poll response that lands after `cancel()` is
//! never shown.

use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::AudioArtifact;
use crate::config::Settings;
use crate::session::TransportError;
use crate::{Result, SpeakingError};

use super::api::GradingApi;
use super::models::{GradingFailure, GradingResult, JobStatus, StatusResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionPhase {
    NotStarted,
    Uploading,
    Queued,
    Processing,
    Completed,
    Failed,
}

impl SubmissionPhase {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Uploading | Self::Queued | Self::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn for_status(status: JobStatus) -> Self {
        match status {
            JobStatus::Pending => Self::Queued,
            JobStatus::Processing => Self::Processing,
            JobStatus::Completed => Self::Completed,
            JobStatus::Failed => Self::Failed,
        }
    }
}

impl std::fmt::Display for SubmissionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotStarted => "not started",
            Self::Uploading => "uploading",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One server-side grading attempt
#[derive(Debug, Clone, PartialEq)]
pub struct GradingJob {
    pub id: String,
    pub status: JobStatus,
    /// 0 to 100; never decreases within a job
    pub progress: u8,
    pub estimated_seconds_remaining: Option<u32>,
    pub result: Option<GradingResult>,
    pub failure: Option<GradingFailure>,
    pub retry_count: u32,
    pub polls: u32,
}

impl GradingJob {
    fn new(id: String, status: JobStatus, retry_count: u32) -> Self {
        Self {
            id,
            status,
            progress: 0,
            estimated_seconds_remaining: None,
            result: None,
            failure: None,
            retry_count,
            polls: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradingSnapshot {
    pub phase: SubmissionPhase,
    pub job: Option<GradingJob>,
    /// Submission-time error (upload, session, lost contact)
    pub error: Option<SpeakingError>,
    /// Bumped by every submit, retry and cancel
    pub generation: u64,
}

impl Default for GradingSnapshot {
    fn default() -> Self {
        Self {
            phase: SubmissionPhase::NotStarted,
            job: None,
            error: None,
            generation: 0,
        }
    }
}

impl GradingSnapshot {
    pub fn progress(&self) -> u8 {
        self.job.as_ref().map(|j| j.progress).unwrap_or(0)
    }

    /// Whether `retry()` would be accepted
    pub fn can_retry(&self) -> bool {
        self.phase == SubmissionPhase::Failed
            && self
                .job
                .as_ref()
                .and_then(|j| j.failure.as_ref())
                .map(|f| f.can_retry)
                .unwrap_or(false)
    }

    /// Whether the upload itself failed and sending the take again may help
    pub fn can_resubmit(&self) -> bool {
        self.phase == SubmissionPhase::Failed
            && self.job.is_none()
            && self
                .error
                .as_ref()
                .map(SpeakingError::offers_retry)
                .unwrap_or(false)
    }
}

/// How an observed submission ended
#[derive(Debug, Clone, PartialEq)]
pub enum GradingOutcome {
    Completed(GradingResult),
    /// The grader reported a failure
    Failed(GradingFailure),
    /// The submission itself failed (upload, session, lost contact)
    Error(SpeakingError),
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct GradingConfig {
    pub poll_interval: Duration,
    pub max_retries: u32,
    /// Consecutive failed polls tolerated before giving up
    pub max_poll_errors: u32,
}

impl GradingConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            poll_interval: settings.grading.poll_interval(),
            max_retries: settings.grading.max_retries,
            max_poll_errors: settings.grading.max_poll_errors.max(1),
        }
    }
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

struct Attempt {
    generation: u64,
    token: CancellationToken,
    poller: Option<JoinHandle<()>>,
}

/// Uploads artifacts and follows their grading jobs.
///
/// Dropping the orchestrator cancels any running poll loop.
pub struct GradingOrchestrator {
    api: GradingApi,
    config: GradingConfig,
    state: Arc<watch::Sender<GradingSnapshot>>,
    attempt: Mutex<Option<Attempt>>,
}

impl GradingOrchestrator {
    pub fn new(api: GradingApi, config: GradingConfig) -> Self {
        let (state, _) = watch::channel(GradingSnapshot::default());
        Self {
            api,
            config,
            state: Arc::new(state),
            attempt: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> GradingSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<GradingSnapshot> {
        self.state.subscribe()
    }

    /// Upload `artifact` and start polling its job
    pub async fn submit(&self, scenario_id: &str, artifact: &AudioArtifact) -> Result<GradingJob> {
        let generation = self.begin(|s| {
            if s.phase.is_active() {
                return Err(SpeakingError::InvalidState(
                    "a submission is already in progress".into(),
                ));
            }
            s.phase = SubmissionPhase::Uploading;
            s.job = None;
            s.error = None;
            Ok(())
        })?;
        let token = self.arm(generation);

        let uploaded = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(SpeakingError::Cancelled),
            uploaded = self.api.submit(scenario_id, artifact) => uploaded,
        };

        let response = match uploaded {
            Ok(response) => response,
            Err(e) => {
                warn!("Upload failed: {}", e);
                let error = e.clone();
                apply(&self.state, generation, &token, move |s| {
                    s.phase = SubmissionPhase::Failed;
                    s.error = Some(error);
                });
                self.disarm(generation);
                return Err(e);
            }
        };

        info!("Uploaded as submission {}", response.submission_id);
        let job = GradingJob::new(response.submission_id, response.status, 0);
        self.follow(generation, token, job)
    }

    /// Follow a submission that was uploaded earlier
    pub fn track(&self, submission_id: &str) -> Result<GradingJob> {
        let generation = self.begin(|s| {
            if s.phase.is_active() {
                return Err(SpeakingError::InvalidState(
                    "a submission is already in progress".into(),
                ));
            }
            s.phase = SubmissionPhase::Queued;
            s.job = None;
            s.error = None;
            Ok(())
        })?;
        let token = self.arm(generation);
        let job = GradingJob::new(submission_id.trim().to_string(), JobStatus::Pending, 0);
        self.follow(generation, token, job)
    }

    /// Reprocess a failed job on the server, reusing the uploaded recording
    pub async fn retry(&self) -> Result<GradingJob> {
        let current = self.snapshot();
        let previous = match (&current.phase, &current.job) {
            (SubmissionPhase::Failed, Some(job)) => job.clone(),
            _ => {
                return Err(SpeakingError::InvalidState(
                    "retry is only available after grading fails".into(),
                ))
            }
        };

        let retryable = previous.failure.as_ref().map(|f| f.can_retry).unwrap_or(false);
        if !retryable {
            return Err(SpeakingError::InvalidState(
                "this submission cannot be retried".into(),
            ));
        }
        if previous.retry_count >= self.config.max_retries {
            self.mark_not_retryable(current.generation);
            return Err(SpeakingError::InvalidState(format!(
                "retry limit of {} reached",
                self.config.max_retries
            )));
        }

        let expected = current.generation;
        let generation = self.begin(|s| {
            if s.generation != expected || s.phase != SubmissionPhase::Failed {
                return Err(SpeakingError::InvalidState(
                    "submission changed while retrying".into(),
                ));
            }
            s.phase = SubmissionPhase::Queued;
            s.error = None;
            Ok(())
        })?;
        let token = self.arm(generation);

        let retried = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(SpeakingError::Cancelled),
            retried = self.api.retry(&previous.id) => retried,
        };

        let response = match retried {
            Ok(response) => response,
            Err(e) => {
                warn!("Retry of {} failed: {}", previous.id, e);
                let refused = matches!(e, SpeakingError::InvalidState(_));
                let error = e.clone();
                apply(&self.state, generation, &token, move |s| {
                    s.phase = SubmissionPhase::Failed;
                    if refused {
                        if let Some(failure) = s.job.as_mut().and_then(|j| j.failure.as_mut()) {
                            failure.can_retry = false;
                        }
                    } else {
                        s.error = Some(error);
                    }
                });
                self.disarm(generation);
                return Err(e);
            }
        };

        info!(
            "Retry {} accepted as submission {}",
            response.retry_count, response.submission_id
        );
        let retry_count = response.retry_count.max(previous.retry_count + 1);
        let job = GradingJob::new(response.submission_id, response.status, retry_count);
        self.follow(generation, token, job)
    }

    /// Stop observing the current submission and discard local state.
    ///
    /// Returns false when there was nothing in flight. The server-side job
    /// is not cancelled.
    pub fn cancel(&self) -> bool {
        if !self.state.borrow().phase.is_active() {
            return false;
        }
        self.reset();
        info!("Grading cancelled");
        true
    }

    /// Stop everything and return to `NotStarted`, terminal or not
    pub fn reset(&self) {
        self.stop_attempt();
        self.state.send_modify(|s| {
            *s = GradingSnapshot {
                generation: s.generation + 1,
                ..GradingSnapshot::default()
            };
        });
    }

    /// Wait for a running upload to be accepted or refused
    pub async fn upload_settled(&self) -> GradingSnapshot {
        let mut rx = self.subscribe();
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if snapshot.phase != SubmissionPhase::Uploading {
                return snapshot;
            }
            if rx.changed().await.is_err() {
                return self.snapshot();
            }
        }
    }

    /// Wait until the current submission completes, fails or is cancelled
    pub async fn wait_for_outcome(&self) -> GradingOutcome {
        let mut rx = self.subscribe();

        loop {
            {
                let s = rx.borrow_and_update();
                match s.phase {
                    SubmissionPhase::Completed => {
                        if let Some(result) = s.job.as_ref().and_then(|j| j.result.clone()) {
                            return GradingOutcome::Completed(result);
                        }
                    }
                    SubmissionPhase::Failed => {
                        if let Some(error) = &s.error {
                            return GradingOutcome::Error(error.clone());
                        }
                        if let Some(failure) = s.job.as_ref().and_then(|j| j.failure.clone()) {
                            return GradingOutcome::Failed(failure);
                        }
                        return GradingOutcome::Error(SpeakingError::UploadFailure(
                            "submission failed".into(),
                        ));
                    }
                    SubmissionPhase::NotStarted => return GradingOutcome::Cancelled,
                    _ => {}
                }
            }

            if rx.changed().await.is_err() {
                return GradingOutcome::Cancelled;
            }
        }
    }

    /// Atomically check-and-update the snapshot for a new attempt
    fn begin<F>(&self, update: F) -> Result<u64>
    where
        F: FnOnce(&mut GradingSnapshot) -> Result<()>,
    {
        let mut outcome = Err(SpeakingError::InvalidState("not applied".into()));
        let mut update = Some(update);
        self.state.send_if_modified(|s| {
            let Some(update) = update.take() else {
                return false;
            };
            match update(s) {
                Ok(()) => {
                    s.generation += 1;
                    outcome = Ok(s.generation);
                    true
                }
                Err(e) => {
                    outcome = Err(e);
                    false
                }
            }
        });
        outcome
    }

    fn arm(&self, generation: u64) -> CancellationToken {
        let token = CancellationToken::new();
        let previous = self.lock_attempt().replace(Attempt {
            generation,
            token: token.clone(),
            poller: None,
        });
        if let Some(previous) = previous {
            stop(previous);
        }
        debug!("Armed grading attempt {}", generation);
        token
    }

    fn disarm(&self, generation: u64) {
        let mut slot = self.lock_attempt();
        if slot.as_ref().map(|a| a.generation) == Some(generation) {
            if let Some(attempt) = slot.take() {
                stop(attempt);
            }
        }
    }

    fn stop_attempt(&self) {
        if let Some(attempt) = self.lock_attempt().take() {
            stop(attempt);
        }
    }

    fn mark_not_retryable(&self, generation: u64) {
        self.state.send_if_modified(|s| {
            if s.generation != generation {
                return false;
            }
            match s.job.as_mut().and_then(|j| j.failure.as_mut()) {
                Some(failure) if failure.can_retry => {
                    failure.can_retry = false;
                    true
                }
                _ => false,
            }
        });
    }

    /// Publish the new job and start its poll loop
    fn follow(&self, generation: u64, token: CancellationToken, job: GradingJob) -> Result<GradingJob> {
        let published = job.clone();
        let applied = apply(&self.state, generation, &token, move |s| {
            s.phase = SubmissionPhase::Queued;
            s.job = Some(published);
        });
        if !applied {
            return Err(SpeakingError::Cancelled);
        }

        let poller = tokio::spawn(poll_job(
            self.api.clone(),
            self.config.clone(),
            self.state.clone(),
            generation,
            token.clone(),
            job.id.clone(),
        ));

        let mut slot = self.lock_attempt();
        match slot.as_mut() {
            Some(attempt) if attempt.generation == generation && !attempt.token.is_cancelled() => {
                attempt.poller = Some(poller);
            }
            _ => poller.abort(),
        }
        Ok(job)
    }

    fn lock_attempt(&self) -> std::sync::MutexGuard<'_, Option<Attempt>> {
        // A poisoned lock only means a panic elsewhere; the data is still usable
        self.attempt.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for GradingOrchestrator {
    fn drop(&mut self) {
        self.stop_attempt();
    }
}

fn stop(attempt: Attempt) {
    attempt.token.cancel();
    if let Some(poller) = attempt.poller {
        poller.abort();
    }
}

/// Apply `update` unless the attempt was cancelled or superseded
fn apply<F>(
    state: &watch::Sender<GradingSnapshot>,
    generation: u64,
    token: &CancellationToken,
    update: F,
) -> bool
where
    F: FnOnce(&mut GradingSnapshot),
{
    let mut update = Some(update);
    state.send_if_modified(|s| {
        if s.generation != generation || token.is_cancelled() {
            return false;
        }
        match update.take() {
            Some(update) => {
                update(s);
                true
            }
            None => false,
        }
    })
}

async fn poll_job(
    api: GradingApi,
    config: GradingConfig,
    state: Arc<watch::Sender<GradingSnapshot>>,
    generation: u64,
    token: CancellationToken,
    job_id: String,
) {
    let mut ticker = tokio::time::interval_at(
        Instant::now() + config.poll_interval,
        config.poll_interval,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut consecutive_errors = 0u32;
    let mut fetching_result = false;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        if !fetching_result {
            let polled = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                polled = api.status(&job_id) => polled,
            };

            match polled {
                Ok(status) => {
                    consecutive_errors = 0;
                    match status.status {
                        JobStatus::Pending | JobStatus::Processing => {
                            apply(&state, generation, &token, |s| record_progress(s, &status));
                            continue;
                        }
                        JobStatus::Failed => {
                            let mut failure = GradingFailure::from_status(&status);
                            failure.can_retry &= status.retry_count < config.max_retries;
                            info!("Submission {} failed: {} ({})", job_id, failure.message, failure.code);
                            apply(&state, generation, &token, |s| {
                                s.phase = SubmissionPhase::Failed;
                                if let Some(job) = s.job.as_mut() {
                                    job.status = JobStatus::Failed;
                                    job.retry_count = job.retry_count.max(status.retry_count);
                                    job.polls += 1;
                                    job.failure = Some(failure);
                                }
                            });
                            return;
                        }
                        JobStatus::Completed => fetching_result = true,
                    }
                }
                Err(e) => {
                    if give_up(&state, generation, &token, &config, &mut consecutive_errors, e) {
                        return;
                    }
                    continue;
                }
            }
        }

        let fetched = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            fetched = api.result(&job_id) => fetched,
        };

        match fetched {
            Ok(result) => {
                info!("Submission {} graded", job_id);
                apply(&state, generation, &token, |s| {
                    s.phase = SubmissionPhase::Completed;
                    if let Some(job) = s.job.as_mut() {
                        job.status = JobStatus::Completed;
                        job.progress = 100;
                        job.estimated_seconds_remaining = None;
                        job.polls += 1;
                        job.result = Some(result);
                    }
                });
                return;
            }
            Err(e) => {
                // Completed but unreadable; fetch again on the next tick
                if give_up(&state, generation, &token, &config, &mut consecutive_errors, e) {
                    return;
                }
            }
        }
    }
}

fn record_progress(s: &mut GradingSnapshot, status: &StatusResponse) {
    s.phase = SubmissionPhase::for_status(status.status);
    if let Some(job) = s.job.as_mut() {
        let reported = status.progress_percent.min(100);
        if reported < job.progress {
            debug!("Ignoring progress regression {} -> {}", job.progress, reported);
        }
        job.progress = job.progress.max(reported);
        job.status = status.status;
        job.estimated_seconds_remaining = status.estimated_seconds_remaining;
        job.retry_count = job.retry_count.max(status.retry_count);
        job.polls += 1;
    }
}

/// Count a failed request; returns true when polling should stop
fn give_up(
    state: &watch::Sender<GradingSnapshot>,
    generation: u64,
    token: &CancellationToken,
    config: &GradingConfig,
    consecutive_errors: &mut u32,
    error: TransportError,
) -> bool {
    if error.is_session_expired() {
        warn!("Session expired while polling");
        apply(state, generation, token, |s| {
            s.phase = SubmissionPhase::Failed;
            s.error = Some(SpeakingError::SessionExpired);
        });
        return true;
    }

    *consecutive_errors += 1;
    warn!(
        "Status poll failed ({}/{}): {}",
        consecutive_errors, config.max_poll_errors, error
    );
    if *consecutive_errors < config.max_poll_errors {
        return false;
    }

    apply(state, generation, token, |s| {
        s.phase = SubmissionPhase::Failed;
        s.error = Some(SpeakingError::UploadFailure(format!(
            "lost contact with the grading service: {}",
            error
        )));
    });
    true
}
