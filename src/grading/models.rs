//! Grading service wire types

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Server-side processing status of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Response to an upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub submission_id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub scenario_id: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub file_size_bytes: Option<u64>,
    #[serde(default)]
    pub duration_seconds: Option<u32>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Lightweight status returned while polling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub id: Option<String>,
    pub status: JobStatus,
    #[serde(default)]
    pub progress_percent: u8,
    #[serde(default)]
    pub estimated_seconds_remaining: Option<u32>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub can_retry: bool,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub user_action: Option<String>,
}

/// Response to a retry request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryResponse {
    pub submission_id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub message: Option<String>,
}

/// ICAO criteria scores, 1 to 6
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IcaoScores {
    pub pronunciation: f32,
    pub structure: f32,
    pub vocabulary: f32,
    pub fluency: f32,
    pub comprehension: f32,
    pub interaction: f32,
}

impl IcaoScores {
    fn all(&self) -> [f32; 6] {
        [
            self.pronunciation,
            self.structure,
            self.vocabulary,
            self.fluency,
            self.comprehension,
            self.interaction,
        ]
    }

    pub fn average(&self) -> f32 {
        self.all().iter().sum::<f32>() / 6.0
    }

    /// The ICAO level is capped by the weakest criterion
    pub fn minimum(&self) -> f32 {
        self.all().into_iter().fold(f32::INFINITY, f32::min)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    #[serde(default)]
    pub said: String,
    #[serde(default)]
    pub should_be: String,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
    #[serde(default)]
    pub overall: String,
    #[serde(default)]
    pub specific_corrections: Option<Vec<Correction>>,
}

/// Full graded submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingResult {
    pub id: String,
    #[serde(default)]
    pub scenario_id: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<u32>,
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub scores: Option<IcaoScores>,
    #[serde(default)]
    pub overall_score: Option<f32>,
    #[serde(default)]
    pub ai_feedback: Option<Feedback>,
    #[serde(default)]
    pub sample_response: Option<String>,
    #[serde(default)]
    pub expected_elements: Option<Vec<String>>,
    #[serde(default)]
    pub common_cis_errors: Option<Vec<String>>,
    pub status: JobStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub xp_earned: u32,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub processed_at: Option<DateTime<Utc>>,
}

/// Failure reported by the grader, surfaced verbatim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradingFailure {
    pub code: String,
    pub message: String,
    pub can_retry: bool,
    #[serde(default)]
    pub user_action: Option<String>,
}

impl GradingFailure {
    pub const UNKNOWN: &'static str = "UNKNOWN_ERROR";

    pub fn from_status(status: &StatusResponse) -> Self {
        Self {
            code: status
                .error_code
                .clone()
                .unwrap_or_else(|| Self::UNKNOWN.to_string()),
            message: status
                .error_message
                .clone()
                .unwrap_or_else(|| "Grading failed".to_string()),
            can_retry: status.can_retry,
            user_action: status.user_action.clone(),
        }
    }
}

/// Accept RFC 3339 or a naive ISO timestamp (taken as UTC)
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    let Some(raw) = raw else {
        return Ok(None);
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(dt.with_timezone(&Utc)));
    }

    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Some(naive.and_utc()))
        .map_err(serde::de::Error::custom)
}
