//! Interfaces to the identity provider and the session backend.

use crate::state::{AccessToken, AuthSignal, ConsentState, SessionCredential};
use crate::ReconcileResult;
use async_trait::async_trait;

/// Source of the user's authentication status and access tokens.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Current authentication signal, or `None` before the provider has reported.
    fn auth_signal(&self) -> Option<AuthSignal>;

    /// Fetch a fresh access token. May fail while the provider is still settling.
    async fn request_access_token(&self) -> ReconcileResult<AccessToken>;
}

/// Backend that issues and validates sessions.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Start a new session for the signed-in user.
    async fn create_session(&self) -> ReconcileResult<SessionCredential>;

    /// Check whether `credential` is still valid for the signed-in user.
    async fn verify_session(&self, credential: &SessionCredential) -> ReconcileResult<bool>;

    /// Look up pending consent items (terms of service and similar).
    async fn fetch_consent_state(&self) -> ReconcileResult<ConsentState>;
}
