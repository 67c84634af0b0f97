//! Identity provider backed by a token given on the command line.

use async_trait::async_trait;
use session_reconciler::{
    AccessToken, AuthSignal, IdentityProvider, ReconcileError, ReconcileResult,
};

/// Reports authenticated exactly when a token was supplied.
pub struct StaticTokenProvider {
    token: Option<String>,
}

impl StaticTokenProvider {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }
}

#[async_trait]
impl IdentityProvider for StaticTokenProvider {
    fn auth_signal(&self) -> Option<AuthSignal> {
        Some(AuthSignal {
            is_authenticated: self.token.is_some(),
            is_loading: false,
        })
    }

    async fn request_access_token(&self) -> ReconcileResult<AccessToken> {
        self.token
            .as_deref()
            .map(AccessToken::new)
            .ok_or_else(|| ReconcileError::TokenUnavailable("no access token supplied".into()))
    }
}
