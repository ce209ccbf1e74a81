//! Typed messages exchanged between a client channel and a relay connection.
//!
//! Transports (the WebSocket binding in the server crate, or a test harness)
//! translate their frames into [`ChannelEvent`]s and deliver
//! [`ServerMessage`]s back to the client.

use bytes::Bytes;
use serde::Serialize;

use crate::error::ErrorPayload;
use crate::transcoder::SessionConfig;

/// Identifies which client request an acknowledgment answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AckToken {
    /// Id chosen by the client for a start/stop request.
    Request(u64),
    /// Sequence number of a binary chunk.
    Binary(u64),
}

/// Client intent delivered to a connection.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Start {
        config: SessionConfig,
        ack: Option<AckToken>,
    },
    Stop {
        ack: Option<AckToken>,
    },
    BinaryStream {
        data: Bytes,
        ack: Option<AckToken>,
    },
    /// The channel is gone. No further events follow.
    Disconnect,
}

impl ChannelEvent {
    pub fn ack(&self) -> Option<AckToken> {
        match self {
            Self::Start { ack, .. } | Self::Stop { ack } | Self::BinaryStream { ack, .. } => *ack,
            Self::Disconnect => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Stop { .. } => "stop",
            Self::BinaryStream { .. } => "binarystream",
            Self::Disconnect => "disconnect",
        }
    }
}

/// Notification delivered to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Error(ErrorPayload),
    /// A line of ffmpeg output. Only sent when telemetry forwarding is enabled.
    FfmpegOutput { text: String },
    Ack {
        token: AckToken,
        error: Option<ErrorPayload>,
    },
}

impl ServerMessage {
    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Ack { .. })
    }
}
