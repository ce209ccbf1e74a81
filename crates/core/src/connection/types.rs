use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RelayError;
use crate::transcoder::TranscoderStatus;

/// Unique identifier of an accepted connection. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ConnectionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// What is known about the remote end of a connection.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub id: ConnectionId,
    pub remote_address: Option<SocketAddr>,
    /// Query parameters of the request that opened the channel.
    pub query: HashMap<String, String>,
}

impl PeerInfo {
    pub fn new(remote_address: Option<SocketAddr>) -> Self {
        Self {
            id: ConnectionId::new(),
            remote_address,
            query: HashMap::new(),
        }
    }

    pub fn with_query(mut self, query: HashMap<String, String>) -> Self {
        self.query = query;
        self
    }
}

/// Snapshot of a connection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub id: ConnectionId,
    pub remote_address: Option<SocketAddr>,
    pub connected_at: DateTime<Utc>,
    /// Present while a transcoder is attached.
    pub transcoder: Option<TranscoderStatus>,
}

/// Something a connection reports to whoever drives it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Error(RelayError),
    /// A line of ffmpeg output.
    Output(String),
    /// A transcoder started by this connection is gone.
    Destroyed,
}
