use async_trait::async_trait;
use thiserror::Error;

use super::types::PeerInfo;
use crate::transcoder::{SessionConfig, TranscodeSlot};

/// Why a start attempt was refused. Surfaced to the client as `CANT_START`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct StartRejection {
    pub reason: String,
}

impl StartRejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A start attempt that passed policy.
#[derive(Debug)]
pub struct Admission {
    /// Configuration to start with, possibly rewritten.
    pub config: SessionConfig,
    /// Reservation held for the lifetime of the resulting process.
    pub slot: Option<TranscodeSlot>,
}

impl Admission {
    pub fn new(config: SessionConfig) -> Self {
        Self { config, slot: None }
    }

    pub fn with_slot(mut self, slot: TranscodeSlot) -> Self {
        self.slot = Some(slot);
        self
    }
}

/// Decides whether a connection may start a transcode, and with what.
///
/// Runs before field validation, with the configuration exactly as the
/// client sent it.
#[async_trait]
pub trait StartPolicy: Send + Sync {
    async fn admit(
        &self,
        peer: &PeerInfo,
        config: SessionConfig,
    ) -> Result<Admission, StartRejection>;
}
