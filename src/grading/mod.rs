//! Remote ICAO grading: upload, status polling, retry

mod api;
mod models;
mod orchestrator;

pub use api::{validate_artifact, GradingApi, MAX_DURATION_SECS, MAX_UPLOAD_BYTES};
pub use models::{
    Correction, Feedback, GradingFailure, GradingResult, IcaoScores, JobStatus, RetryResponse,
    StatusResponse, SubmitResponse,
};
pub use orchestrator::{
    GradingConfig, GradingJob, GradingOrchestrator, GradingOutcome, GradingSnapshot,
    SubmissionPhase,
};
