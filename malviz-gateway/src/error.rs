//! Error types for malviz-gateway
//!
//! Every failure on `POST /analyze/` ends up as an [`AnalyzeError`], which
//! renders the JSON error body the caller sees. Status codes separate
//! client-caused failures (4xx) from engine and storage faults (5xx).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::engine::EngineError;
use crate::staging::StagingError;

pub const MSG_NO_FILE: &str = "No file provided";
pub const MSG_ENGINE_FAILED: &str = "AI engine process failed";
pub const MSG_PARSE_FAILED: &str = "Failed to parse AI engine output";
pub const MSG_ENGINE_TIMEOUT: &str = "AI engine timed out";
pub const MSG_ENGINE_UNAVAILABLE: &str = "AI engine could not be started";
pub const MSG_STORAGE_FAILED: &str = "Failed to store uploaded file";
pub const MSG_INVALID_UPLOAD: &str = "Invalid multipart body";
pub const MSG_UPLOAD_TOO_LARGE: &str = "Uploaded file too large";

/// JSON error body
///
/// `details` is omitted entirely when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// Failure of one analysis request
#[derive(Debug, Error)]
pub enum AnalyzeError {
    /// No file field in the request (400)
    #[error("No file provided")]
    MissingFile,

    /// Multipart body malformed or cut off (400)
    #[error("Invalid multipart body: {0}")]
    InvalidUpload(String),

    /// Body exceeded the configured upload limit (413)
    #[error("Upload exceeds the configured size limit")]
    UploadTooLarge,

    /// Staging write failed (500)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Engine could not be launched (500)
    #[error("AI engine unavailable: {0}")]
    EngineUnavailable(String),

    /// Engine exited non-zero or was killed by a signal (500, stderr attached)
    #[error("AI engine exited with {exit_code:?}")]
    EngineFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    /// Engine exceeded its runtime bound (504)
    #[error("AI engine timed out after {}s", .0.as_secs_f64())]
    EngineTimeout(Duration),

    /// Engine exited 0 but stdout was not JSON (500, nothing attached)
    #[error("Failed to parse AI engine output: {0}")]
    OutputParse(#[from] serde_json::Error),
}

impl AnalyzeError {
    pub fn status(&self) -> StatusCode {
        match self {
            AnalyzeError::MissingFile | AnalyzeError::InvalidUpload(_) => StatusCode::BAD_REQUEST,
            AnalyzeError::UploadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AnalyzeError::EngineTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AnalyzeError::Storage(_)
            | AnalyzeError::EngineUnavailable(_)
            | AnalyzeError::EngineFailed { .. }
            | AnalyzeError::OutputParse(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Body sent to the caller
    ///
    /// Only a non-zero engine exit carries details (the engine's stderr).
    /// Internal causes of other failures stay in the logs.
    pub fn to_body(&self) -> ErrorResponse {
        match self {
            AnalyzeError::MissingFile => ErrorResponse::new(MSG_NO_FILE),
            AnalyzeError::InvalidUpload(_) => ErrorResponse::new(MSG_INVALID_UPLOAD),
            AnalyzeError::UploadTooLarge => ErrorResponse::new(MSG_UPLOAD_TOO_LARGE),
            AnalyzeError::Storage(_) => ErrorResponse::new(MSG_STORAGE_FAILED),
            AnalyzeError::EngineUnavailable(_) => ErrorResponse::new(MSG_ENGINE_UNAVAILABLE),
            AnalyzeError::EngineFailed { stderr, .. } => {
                ErrorResponse::with_details(MSG_ENGINE_FAILED, stderr.clone())
            }
            AnalyzeError::EngineTimeout(_) => ErrorResponse::new(MSG_ENGINE_TIMEOUT),
            AnalyzeError::OutputParse(_) => ErrorResponse::new(MSG_PARSE_FAILED),
        }
    }
}

impl From<StagingError> for AnalyzeError {
    fn from(err: StagingError) -> Self {
        match err {
            StagingError::Write { .. } => AnalyzeError::Storage(err.to_string()),
            StagingError::Upload(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                AnalyzeError::UploadTooLarge
            }
            StagingError::Upload(e) => AnalyzeError::InvalidUpload(e.body_text()),
        }
    }
}

impl From<EngineError> for AnalyzeError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Timeout(limit) => AnalyzeError::EngineTimeout(limit),
            EngineError::Spawn { .. } | EngineError::Output(_) => {
                AnalyzeError::EngineUnavailable(err.to_string())
            }
        }
    }
}

impl IntoResponse for AnalyzeError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.to_body())).into_response()
    }
}

/// Result type for analysis requests
pub type AnalyzeResult<T> = Result<T, AnalyzeError>;
