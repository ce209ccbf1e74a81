//! Authentication for the operator API.
//!
//! Media clients are not authenticated here; whether they may stream is
//! decided by the start policy.

mod api_key;
mod none;

pub use api_key::ApiKeyAuthenticator;
pub use none::NoneAuthenticator;

use std::collections::HashMap;
use std::net::IpAddr;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::config::{AuthConfig, AuthMethod};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication required")]
    NotAuthenticated,

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

/// The parts of an HTTP request an authenticator may look at.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    /// Header names are lowercase.
    pub headers: HashMap<String, String>,
    pub source_ip: IpAddr,
}

impl AuthRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Who is calling the operator API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Operator {
    pub name: String,
    pub method: &'static str,
}

impl Operator {
    pub fn anonymous() -> Self {
        Self {
            name: "anonymous".to_string(),
            method: "none",
        }
    }
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, request: &AuthRequest) -> Result<Operator, AuthError>;

    fn method_name(&self) -> &'static str;
}

pub fn create_authenticator(config: &AuthConfig) -> Result<Box<dyn Authenticator>, AuthError> {
    match config.method {
        AuthMethod::None => Ok(Box::new(NoneAuthenticator)),
        AuthMethod::ApiKey => {
            let key = config
                .api_key
                .clone()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| {
                    AuthError::ConfigurationError(
                        "auth.api_key must be set when auth.method is api_key".to_string(),
                    )
                })?;
            Ok(Box::new(ApiKeyAuthenticator::new(key)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_config(method: AuthMethod, api_key: Option<&str>) -> AuthConfig {
        AuthConfig {
            method,
            api_key: api_key.map(String::from),
        }
    }

    #[test]
    fn test_factory_picks_method() {
        let none = create_authenticator(&auth_config(AuthMethod::None, None)).unwrap();
        assert_eq!(none.method_name(), "none");

        let keyed = create_authenticator(&auth_config(AuthMethod::ApiKey, Some("k"))).unwrap();
        assert_eq!(keyed.method_name(), "api_key");
    }

    #[test]
    fn test_factory_requires_key() {
        for key in [None, Some("")] {
            let result = create_authenticator(&auth_config(AuthMethod::ApiKey, key));
            assert!(matches!(result, Err(AuthError::ConfigurationError(_))));
        }
    }

    #[test]
    fn test_header_lookup() {
        let request = AuthRequest {
            headers: HashMap::from([("x-api-key".to_string(), "abc".to_string())]),
            source_ip: "10.0.0.1".parse().unwrap(),
        };
        assert_eq!(request.header("x-api-key"), Some("abc"));
        assert_eq!(request.header("authorization"), None);
    }
}
