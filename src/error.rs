//! # Error Handling
//!
//! Defines the application-wide error taxonomy and how each category maps to
//! an HTTP response. Job-terminal outcomes (timeout, cancellation, engine
//! failure) carry their own variants so callers and the project store can
//! distinguish them from plain request errors.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Application error categories.
///
/// ## Request errors (client-visible 4xx):
/// - `MalformedRequest`: bad multipart framing or missing boundary
/// - `NoAudioProvided`: request carried no usable audio file part
/// - `NotFound`: referenced project or resource does not exist
/// - `ValidationError`: request data failed validation rules
/// - `Conflict`: a transcription is already active for the job id
///
/// ## Job-terminal errors (never retried by this service):
/// - `EngineNotFound`: the transcription executable could not be located
/// - `ProcessTimeout`: the engine exceeded its wall-clock deadline and was killed
/// - `ProcessCancelled`: a caller explicitly cancelled the job
/// - `NoTranscriptProduced`: the engine exited cleanly but left no usable output
/// - `EngineExecutionFailed`: nonzero, non-cancellation exit (stderr attached)
///
/// ## Server errors:
/// - `Internal`, `ConfigError`: server-side problems (500)
#[derive(Debug, Clone)]
pub enum AppError {
    MalformedRequest(String),
    NoAudioProvided(String),
    NotFound(String),
    ValidationError(String),
    Conflict(String),
    EngineNotFound(String),
    ProcessTimeout { seconds: u64 },
    ProcessCancelled,
    NoTranscriptProduced,
    EngineExecutionFailed(String),
    Internal(String),
    ConfigError(String),
}

impl AppError {
    /// Machine-readable category label used in JSON responses and in the
    /// project store's `error_message` field.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::MalformedRequest(_) => "malformed_request",
            AppError::NoAudioProvided(_) => "no_audio_provided",
            AppError::NotFound(_) => "not_found",
            AppError::ValidationError(_) => "validation_error",
            AppError::Conflict(_) => "conflict",
            AppError::EngineNotFound(_) => "engine_not_found",
            AppError::ProcessTimeout { .. } => "process_timeout",
            AppError::ProcessCancelled => "process_cancelled",
            AppError::NoTranscriptProduced => "no_transcript_produced",
            AppError::EngineExecutionFailed(_) => "engine_execution_failed",
            AppError::Internal(_) => "internal_error",
            AppError::ConfigError(_) => "config_error",
        }
    }

    /// Whether this error is the result of an explicit cancellation request.
    /// Cancellations are not failures for logging or metrics purposes.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, AppError::ProcessCancelled)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::MalformedRequest(msg) => write!(f, "Malformed request: {}", msg),
            AppError::NoAudioProvided(msg) => write!(f, "No audio provided: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::EngineNotFound(msg) => write!(f, "Transcription engine not found: {}", msg),
            AppError::ProcessTimeout { seconds } => {
                write!(f, "Processing timed out after {} seconds", seconds)
            }
            AppError::ProcessCancelled => write!(f, "Processing cancelled by request"),
            AppError::NoTranscriptProduced => {
                write!(f, "Engine completed but produced no usable transcript")
            }
            AppError::EngineExecutionFailed(stderr) => {
                write!(f, "Engine execution failed: {}", stderr)
            }
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;

        let status = match self {
            AppError::MalformedRequest(_)
            | AppError::NoAudioProvided(_)
            | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ProcessTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            // Cancellation is a requested outcome, not a server fault.
            AppError::ProcessCancelled => StatusCode::OK,
            AppError::EngineNotFound(_)
            | AppError::NoTranscriptProduced
            | AppError::EngineExecutionFailed(_)
            | AppError::Internal(_)
            | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::MalformedRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(format!("I/O error: {}", err))
    }
}

/// Shorthand for results that use the application error type.
pub type AppResult<T> = Result<T, AppError>;
