//! Reconciliation error types.

use thiserror::Error;

/// Error type for collaborator calls and engine operations.
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// The identity provider could not produce an access token
    #[error("Access token unavailable: {0}")]
    TokenUnavailable(String),

    /// Backend call failed for a reason other than transport
    #[error("Backend error: {0}")]
    Backend(String),

    /// Backend answered with a non-success status
    #[error("Backend returned HTTP {status}: {body}")]
    BackendStatus { status: u16, body: String },

    /// No fully logged in session is available
    #[error("Not logged in")]
    NotLoggedIn,

    /// The engine has been shut down
    #[error("Reconciliation engine is shut down")]
    Closed,

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Result type alias using ReconcileError.
pub type ReconcileResult<T> = Result<T, ReconcileError>;
