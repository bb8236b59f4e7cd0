// src/core/errors.rs

//! Defines the primary error type for the orchestration plane.

use thiserror::Error;

/// The main error enum, representing all possible failures within the daemon.
/// Using `thiserror` allows for clean error definitions and automatic `From`
/// trait implementations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrchestratorError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("timeout waiting for monitor commit")]
    Timeout,

    #[error("request cancelled")]
    Cancelled,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for OrchestratorError {
    fn from(e: std::io::Error) -> Self {
        OrchestratorError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(e: serde_json::Error) -> Self {
        OrchestratorError::Internal(format!("JSON serialization/deserialization error: {e}"))
    }
}

/// A "problem document" as described by the external interface spec: every
/// HTTP error response carries `{title, detail, status}`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProblemDetail {
    pub title: String,
    pub detail: String,
    pub status: u16,
}

impl OrchestratorError {
    /// Maps an error to the HTTP status it should be surfaced as: configuration
    /// errors are 400s, authorization 401/403, not-found 404, conflict 409,
    /// timeout 408, cancellation 410, everything else 500.
    pub fn status_code(&self) -> u16 {
        match self {
            OrchestratorError::InvalidParameters(_) | OrchestratorError::Config(_) => 400,
            OrchestratorError::Unauthorized(_) => 401,
            OrchestratorError::NotFound(_) => 404,
            OrchestratorError::Timeout => 408,
            OrchestratorError::Cancelled => 410,
            OrchestratorError::Conflict(_) => 409,
            OrchestratorError::Io(_) | OrchestratorError::Internal(_) => 500,
        }
    }

    pub fn to_problem(&self) -> ProblemDetail {
        ProblemDetail {
            title: match self {
                OrchestratorError::InvalidParameters(_) => "Invalid parameters".to_string(),
                OrchestratorError::Config(_) => "Invalid configuration".to_string(),
                OrchestratorError::Unauthorized(_) => "Unauthorized".to_string(),
                OrchestratorError::NotFound(_) => "Not found".to_string(),
                OrchestratorError::Timeout => "Timeout".to_string(),
                OrchestratorError::Cancelled => "Cancelled".to_string(),
                OrchestratorError::Conflict(_) => "Conflict".to_string(),
                OrchestratorError::Io(_) | OrchestratorError::Internal(_) => {
                    "Internal error".to_string()
                }
            },
            detail: self.to_string(),
            status: self.status_code(),
        }
    }
}
