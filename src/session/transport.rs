//! Authorized request seam between the grading client and the session guard

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use thiserror::Error;

use crate::SpeakingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A file part plus plain form fields, sent as multipart/form-data
#[derive(Debug, Clone)]
pub struct Upload {
    pub field: String,
    pub file_name: String,
    pub mime: String,
    pub payload: Arc<[u8]>,
    pub fields: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Upload(Upload),
}

/// Request relative to the API base URL
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: RequestBody,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: RequestBody::Empty,
        }
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: RequestBody::Empty,
        }
    }

    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = RequestBody::Json(value);
        self
    }

    pub fn upload(mut self, upload: Upload) -> Self {
        self.body = RequestBody::Upload(upload);
        self
    }
}

/// Successful (2xx) response
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        serde_json::from_slice(&self.body).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Credentials are missing or could not be refreshed
    #[error("Session expired")]
    SessionExpired,

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Extract the message from an error body (`{"detail": ...}` or plain text)
    pub fn from_status(status: u16, body: &[u8]) -> Self {
        let message = serde_json::from_slice::<serde_json::Value>(body)
            .ok()
            .and_then(|v| match v.get("detail") {
                Some(serde_json::Value::String(s)) => Some(s.clone()),
                Some(other) => Some(other.to_string()),
                None => v.get("message").and_then(|m| m.as_str()).map(str::to_string),
            })
            .unwrap_or_else(|| {
                let text = String::from_utf8_lossy(body).trim().to_string();
                if text.is_empty() {
                    format!("status {}", status)
                } else {
                    text
                }
            });

        Self::Status { status, message }
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired)
    }
}

impl From<TransportError> for SpeakingError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::SessionExpired => SpeakingError::SessionExpired,
            other => SpeakingError::UploadFailure(other.to_string()),
        }
    }
}

/// Sends requests with credentials attached
#[async_trait]
pub trait AuthorizedTransport: Send + Sync {
    /// Send `request`, refreshing credentials once on a 401.
    ///
    /// Non-2xx responses come back as `TransportError::Status`.
    async fn request(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;
}
