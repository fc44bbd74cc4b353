//! Speaking submission endpoints

use std::sync::Arc;

use crate::audio::AudioArtifact;
use crate::session::{ApiRequest, AuthorizedTransport, TransportError, Upload};
use crate::{Result, SpeakingError};

use super::models::{GradingResult, RetryResponse, StatusResponse, SubmitResponse};

/// Largest upload the service accepts
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Longest recording the service accepts, in seconds
pub const MAX_DURATION_SECS: f64 = 180.0;

#[derive(Clone)]
pub struct GradingApi {
    transport: Arc<dyn AuthorizedTransport>,
}

impl GradingApi {
    pub fn new(transport: Arc<dyn AuthorizedTransport>) -> Self {
        Self { transport }
    }

    /// Upload a recording for a scenario.
    ///
    /// The artifact is checked locally first so obviously bad uploads never
    /// leave the machine.
    pub async fn submit(&self, scenario_id: &str, artifact: &AudioArtifact) -> Result<SubmitResponse> {
        validate_artifact(artifact)?;
        let scenario_id = path_segment(scenario_id, "scenario id")?;

        let duration = artifact.duration_secs.round().clamp(0.0, MAX_DURATION_SECS) as u32;
        let request = ApiRequest::post(format!("/speaking/scenarios/{}/submit", scenario_id)).upload(
            Upload {
                field: "audio".into(),
                file_name: artifact.file_name(),
                mime: artifact.format.mime_type().into(),
                payload: artifact.payload.clone(),
                fields: vec![("duration_seconds".into(), duration.to_string())],
            },
        );

        tracing::info!(
            "Uploading {} bytes ({}, {}s) for scenario {}",
            artifact.size_bytes(),
            artifact.format,
            duration,
            scenario_id
        );

        let response = self.transport.request(request).await.map_err(upload_error)?;
        response.json().map_err(upload_error)
    }

    pub async fn status(&self, submission_id: &str) -> std::result::Result<StatusResponse, TransportError> {
        let id = path_segment(submission_id, "submission id")
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        self.transport
            .request(ApiRequest::get(format!("/speaking/submissions/{}/status", id)))
            .await?
            .json()
    }

    pub async fn result(&self, submission_id: &str) -> std::result::Result<GradingResult, TransportError> {
        let id = path_segment(submission_id, "submission id")
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        self.transport
            .request(ApiRequest::get(format!("/speaking/submissions/{}", id)))
            .await?
            .json()
    }

    /// Ask the server to reprocess a failed submission
    pub async fn retry(&self, submission_id: &str) -> Result<RetryResponse> {
        let id = path_segment(submission_id, "submission id")?;
        let response = self
            .transport
            .request(ApiRequest::post(format!("/speaking/submissions/{}/retry", id)))
            .await
            .map_err(|e| match e {
                // 400: not failed, or the server's retry cap was reached
                TransportError::Status { status: 400, message } => SpeakingError::InvalidState(message),
                TransportError::SessionExpired => SpeakingError::SessionExpired,
                other => SpeakingError::UploadFailure(other.to_string()),
            })?;
        response.json().map_err(upload_error)
    }
}

fn upload_error(err: TransportError) -> SpeakingError {
    match err {
        TransportError::SessionExpired => SpeakingError::SessionExpired,
        other => SpeakingError::UploadFailure(other.to_string()),
    }
}

/// Reject artifacts the service would refuse
pub fn validate_artifact(artifact: &AudioArtifact) -> Result<()> {
    if artifact.payload.is_empty() {
        return Err(SpeakingError::UploadFailure("recording is empty".into()));
    }
    if artifact.size_bytes() > MAX_UPLOAD_BYTES {
        return Err(SpeakingError::UploadFailure(format!(
            "recording is {:.1} MB; the limit is 10 MB",
            artifact.size_bytes() as f64 / (1024.0 * 1024.0)
        )));
    }
    if !(0.0..=MAX_DURATION_SECS + 0.5).contains(&artifact.duration_secs) {
        return Err(SpeakingError::UploadFailure(format!(
            "recording is {:.0}s; the limit is {}s",
            artifact.duration_secs, MAX_DURATION_SECS
        )));
    }
    if artifact.playback.is_revoked() {
        return Err(SpeakingError::InvalidState(
            "recording was discarded".into(),
        ));
    }
    Ok(())
}

fn path_segment<'a>(id: &'a str, what: &str) -> Result<&'a str> {
    let id = id.trim();
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(id)
    } else {
        Err(SpeakingError::InvalidState(format!("invalid {}: '{}'", what, id)))
    }
}
