//! Error types for the session workflow
//!
//! Parser anomalies never show up here: they degrade to progress lines.
//! Job and stream failures are recorded on the session itself, so these
//! types only cover what a caller gets back synchronously from an action.

use thiserror::Error;

/// Request rejected before anything was sent
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("script must not be empty")]
    EmptyScript,
    #[error("a video is already being created")]
    AlreadyCreating,
    #[error("unknown music selection: {0}")]
    UnknownMusic(String),
    #[error("unknown voice id: {0}")]
    UnknownVoice(String),
}

/// Reason a gated action is not available yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("no session id available yet, start video creation first")]
    NoSessionId,
    #[error("no video available for download")]
    NoArtifactAvailable,
}

/// Failure talking to the video service
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("stream ended: {0}")]
    Stream(String),
    #[error("no video to download: {0}")]
    Artifact(String),
}

/// Errors returned by coordinator operations
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl WorkflowError {
    /// The gate condition, if this error came from an eligibility check
    pub fn gate(&self) -> Option<GateError> {
        match self {
            WorkflowError::Gate(gate) => Some(*gate),
            _ => None,
        }
    }
}
