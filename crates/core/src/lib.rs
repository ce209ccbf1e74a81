//! Browser-to-RTMP relay core.
//!
//! Bridges a client's binary media channel into an ffmpeg process that
//! pushes to an RTMP endpoint. See [`relay::RelayServer`] for the entry point.

pub mod auth;
pub mod config;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod relay;
pub mod transcoder;

pub use auth::{
    create_authenticator, ApiKeyAuthenticator, AuthError, AuthRequest, Authenticator,
    NoneAuthenticator, Operator,
};
pub use config::{
    load_config, load_config_from_str, validate_config, AuthMethod, Config, ConfigError,
    SanitizedConfig,
};
pub use connection::{ConnectionEvent, ConnectionId, ConnectionStatus, PeerInfo};
pub use error::{ErrorPayload, RelayError};
pub use protocol::{AckToken, ChannelEvent, ServerMessage};
pub use relay::{
    ClientChannel, RelayEvent, RelayOptions, RelayServer, StartHook, TemplateRewrite,
};
pub use transcoder::{SessionConfig, TranscoderConfig, TranscoderState, TranscoderStatus};
