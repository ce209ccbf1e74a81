use async_trait::async_trait;

use super::{AuthError, AuthRequest, Authenticator, Operator};

/// Accepts requests carrying the configured key, either as
/// `Authorization: Bearer <key>` or `X-API-Key: <key>`.
pub struct ApiKeyAuthenticator {
    key: String,
}

impl ApiKeyAuthenticator {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    fn presented_key<'a>(&self, request: &'a AuthRequest) -> Option<&'a str> {
        let bearer = request.header("authorization").and_then(|value| {
            value
                .strip_prefix("Bearer ")
                .or_else(|| value.strip_prefix("bearer "))
        });
        bearer.or_else(|| request.header("x-api-key"))
    }
}

#[async_trait]
impl Authenticator for ApiKeyAuthenticator {
    async fn authenticate(&self, request: &AuthRequest) -> Result<Operator, AuthError> {
        let presented = self
            .presented_key(request)
            .ok_or(AuthError::NotAuthenticated)?;

        if !keys_match(presented.as_bytes(), self.key.as_bytes()) {
            return Err(AuthError::InvalidCredentials("Invalid API key".to_string()));
        }

        Ok(Operator {
            name: "operator".to_string(),
            method: "api_key",
        })
    }

    fn method_name(&self) -> &'static str {
        "api_key"
    }
}

/// Compares in time independent of where the inputs differ.
fn keys_match(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
