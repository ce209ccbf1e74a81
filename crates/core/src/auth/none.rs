use async_trait::async_trait;

use super::{AuthError, AuthRequest, Authenticator, Operator};

/// Lets every request through as [`Operator::anonymous`].
#[derive(Debug, Default, Clone, Copy)]
pub struct NoneAuthenticator;

#[async_trait]
impl Authenticator for NoneAuthenticator {
    async fn authenticate(&self, _request: &AuthRequest) -> Result<Operator, AuthError> {
        Ok(Operator::anonymous())
    }

    fn method_name(&self) -> &'static str {
        "none"
    }
}
