//! Types describing a transcoder's lifecycle.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::session::SessionConfig;
use crate::error::RelayError;

/// Lifecycle of one ffmpeg process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TranscoderState {
    Created,
    Running,
    /// Destruction requested; waiting for the process to exit.
    Ending,
    Ended,
}

impl TranscoderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended)
    }
}

/// Point-in-time view of a transcoder.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscoderStatus {
    pub state: TranscoderState,
    pub frames_sent: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_frame_sent_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub config: SessionConfig,
}

/// Mutable record shared between the supervisor and its helper tasks.
#[derive(Debug)]
pub(crate) struct ProcessRecord {
    pub state: TranscoderState,
    pub frames_sent: u64,
    pub last_frame_sent_at: Option<DateTime<Utc>>,
    pub pid: Option<u32>,
    pub last_output: Option<String>,
}

impl ProcessRecord {
    pub fn new() -> Self {
        Self {
            state: TranscoderState::Created,
            frames_sent: 0,
            last_frame_sent_at: None,
            pid: None,
            last_output: None,
        }
    }

    /// Applies a progress report. Ignored unless running; never decreases.
    pub fn record_progress(&mut self, frames: u64, at: DateTime<Utc>) {
        if self.state != TranscoderState::Running {
            return;
        }
        if frames > self.frames_sent {
            self.frames_sent = frames;
        }
        self.last_frame_sent_at = Some(at);
    }
}

/// Something a transcoder reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscoderEventKind {
    /// A line of ffmpeg output (telemetry).
    Output(String),
    /// A failure; see [`RelayError::is_fatal`].
    Error(RelayError),
    /// The process is gone. Sent exactly once per started transcoder.
    Destroyed,
}

/// A transcoder event tagged with the generation of the transcoder that sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscoderEvent {
    pub generation: u64,
    pub kind: TranscoderEventKind,
}
