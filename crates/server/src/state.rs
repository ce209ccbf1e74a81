use std::sync::Arc;

use relay_core::{Authenticator, Config, RelayServer, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    authenticator: Arc<dyn Authenticator>,
    relay: RelayServer,
}

impl AppState {
    pub fn new(config: Config, authenticator: Arc<dyn Authenticator>, relay: RelayServer) -> Self {
        Self {
            config,
            authenticator,
            relay,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn authenticator(&self) -> &dyn Authenticator {
        self.authenticator.as_ref()
    }

    pub fn relay(&self) -> &RelayServer {
        &self.relay
    }
}
