//! Error taxonomy shared by the transcoder, connection and relay layers.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Every failure a client or operator can observe.
///
/// Each variant carries only the fields meaningful for its kind. Whether the
/// error terminates the active transcode is decided uniformly by
/// [`RelayError::is_fatal`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
    /// The ffmpeg executable could not be found.
    #[error("ffmpeg executable not found at {}", path.display())]
    NotFound { path: PathBuf },

    /// ffmpeg could not reach the RTMP destination.
    #[error("connection to RTMP server failed")]
    RtmpConnectionFailed { output: String },

    /// ffmpeg exited without being asked to.
    #[error("ffmpeg exited unexpectedly")]
    UnexpectedEnd { last_output: Option<String> },

    /// Data was sent while no transcode is running.
    #[error("ffmpeg is not running")]
    NotRunning,

    /// The session configuration is missing required fields.
    #[error("Missing values: {}", missing.join(", "))]
    InvalidParameters { missing: Vec<&'static str> },

    /// The start policy refused the session.
    #[error("{reason}")]
    CantStart { reason: String },

    /// Writing to ffmpeg's stdin failed.
    #[error("failed to write to ffmpeg: {message}")]
    Write { message: String },

    /// Any other process-level failure.
    #[error("ffmpeg process error: {message}")]
    Process { message: String },
}

impl RelayError {
    pub fn cant_start(reason: impl Into<String>) -> Self {
        Self::CantStart {
            reason: reason.into(),
        }
    }

    pub fn write(message: impl Into<String>) -> Self {
        Self::Write {
            message: message.into(),
        }
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::Process {
            message: message.into(),
        }
    }

    /// Kind identifier sent on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::RtmpConnectionFailed { .. } => "RTMP_CONNECTION_FAILED",
            Self::UnexpectedEnd { .. } => "UNEXPECTED_END",
            Self::NotRunning => "NOT_RUNNING",
            Self::InvalidParameters { .. } => "INVALID_PARAMETERS",
            Self::CantStart { .. } => "CANT_START",
            Self::Write { .. } => "WRITE_ERROR",
            Self::Process { .. } => "PROCESS_ERROR",
        }
    }

    /// Whether this error mandates termination of the active transcode.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::NotRunning)
    }

    /// Extra detail beyond the message, if any.
    pub fn details(&self) -> Option<String> {
        match self {
            Self::RtmpConnectionFailed { output } => Some(output.clone()),
            Self::UnexpectedEnd { last_output } => last_output.clone(),
            _ => None,
        }
    }

    /// Wire representation with message and details intact.
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            name: self.name(),
            message: self.to_string(),
            details: self.details(),
            fatal: self.is_fatal(),
        }
    }

    /// Wire representation with message and details stripped.
    pub fn to_redacted_payload(&self) -> ErrorPayload {
        ErrorPayload {
            name: self.name(),
            message: String::new(),
            details: None,
            fatal: self.is_fatal(),
        }
    }
}

/// Error object as seen by the client.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub name: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub fatal: bool,
}
