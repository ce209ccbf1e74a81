use std::net::SocketAddr;

use crate::connection::ConnectionId;
use crate::error::RelayError;

/// Operator-facing notification. Errors are never redacted here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Connection {
        id: ConnectionId,
        remote_address: Option<SocketAddr>,
    },
    Error {
        id: ConnectionId,
        error: RelayError,
    },
    /// A transcoder belonging to the connection is gone.
    Destroyed {
        id: ConnectionId,
    },
    FfmpegOutput {
        id: ConnectionId,
        line: String,
    },
    Disconnected {
        id: ConnectionId,
    },
}

impl RelayEvent {
    pub fn connection_id(&self) -> ConnectionId {
        match self {
            Self::Connection { id, .. }
            | Self::Error { id, .. }
            | Self::Destroyed { id }
            | Self::FfmpegOutput { id, .. }
            | Self::Disconnected { id } => *id,
        }
    }
}
