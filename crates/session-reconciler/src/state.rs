//! Session value types and the derived session state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a backend session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionCredential(String);

impl SessionCredential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionCredential {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Bearer token issued by the identity provider.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// Authentication status reported by the identity provider.
///
/// `None` in place of a signal means the provider has not reported yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSignal {
    pub is_authenticated: bool,
    pub is_loading: bool,
}

impl AuthSignal {
    pub const LOADING: AuthSignal = AuthSignal {
        is_authenticated: false,
        is_loading: true,
    };

    pub const AUTHENTICATED: AuthSignal = AuthSignal {
        is_authenticated: true,
        is_loading: false,
    };

    pub const UNAUTHENTICATED: AuthSignal = AuthSignal {
        is_authenticated: false,
        is_loading: false,
    };

    /// The provider has finished loading and reports no signed-in user.
    pub fn is_definitively_unauthenticated(&self) -> bool {
        !self.is_loading && !self.is_authenticated
    }
}

/// Result of the backend consent lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConsentState {
    /// Consent data loaded; `pending_count` items still need acceptance.
    Loaded { pending_count: usize },
    /// The lookup failed on the backend side.
    Error,
    /// The lookup could not be authenticated.
    MissingAuth,
}

/// Session state published to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionState {
    Loading,
    Unauthenticated,
    FullyLoggedIn { session_id: SessionCredential },
}

impl SessionState {
    pub fn is_loading(&self) -> bool {
        matches!(self, SessionState::Loading)
    }

    pub fn is_fully_logged_in(&self) -> bool {
        matches!(self, SessionState::FullyLoggedIn { .. })
    }

    pub fn session_id(&self) -> Option<&SessionCredential> {
        match self {
            SessionState::FullyLoggedIn { session_id } => Some(session_id),
            _ => None,
        }
    }
}

/// Engine-internal view of whether a usable credential exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SessionSlot {
    /// No pass has resolved the credential yet.
    Unknown,
    /// Resolved: there is no usable credential.
    Absent,
    /// Resolved: the credential is verified and persisted.
    Active(SessionCredential),
}

/// Derive the published state from the slot and the provider signal.
pub(crate) fn derive_state(slot: &SessionSlot, auth: Option<AuthSignal>) -> SessionState {
    let auth = match auth {
        None => return SessionState::Loading,
        Some(signal) if signal.is_loading => return SessionState::Loading,
        Some(signal) => signal,
    };

    match slot {
        SessionSlot::Unknown => SessionState::Loading,
        SessionSlot::Absent => SessionState::Unauthenticated,
        SessionSlot::Active(credential) if auth.is_authenticated => SessionState::FullyLoggedIn {
            session_id: credential.clone(),
        },
        SessionSlot::Active(_) => SessionState::Unauthenticated,
    }
}
