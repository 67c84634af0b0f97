//! HTTP implementation of [`SessionBackend`].
//!
//! Endpoints, relative to the configured base URL:
//! - `POST /api/sessions/start` -> `{"sessionId": "..."}`
//! - `POST /api/sessions/verify` with `{"sessionId": "..."}` -> `{"valid": bool}`
//! - `GET /api/consent` -> `{"pendingOptIns": [...]}`
//!
//! Every request carries the provider's access token as a bearer token.

use crate::collaborators::{IdentityProvider, SessionBackend};
use crate::state::{ConsentState, SessionCredential};
use crate::{ReconcileError, ReconcileResult};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const START_SESSION_PATH: &str = "/api/sessions/start";
const VERIFY_SESSION_PATH: &str = "/api/sessions/verify";
const CONSENT_PATH: &str = "/api/consent";
const REQUEST_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    #[serde(rename = "sessionId")]
    session_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct StartSessionResponse {
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    valid: bool,
}

#[derive(Debug, Deserialize)]
struct ConsentResponse {
    #[serde(rename = "pendingOptIns", default)]
    pending_opt_ins: Vec<serde_json::Value>,
}

/// Session backend reached over HTTP.
pub struct HttpSessionBackend {
    http_client: Client,
    base_url: String,
    api_key: Option<String>,
    tokens: Arc<dyn IdentityProvider>,
}

impl HttpSessionBackend {
    /// Create a backend client for `base_url`, authenticating with tokens
    /// from `tokens`.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        tokens: Arc<dyn IdentityProvider>,
    ) -> ReconcileResult<Self> {
        let parsed = Url::parse(base_url)?;
        let http_client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http_client,
            base_url: normalize_base_url(&parsed),
            api_key,
            tokens,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn authorize(&self, request: RequestBuilder) -> ReconcileResult<RequestBuilder> {
        let token = self.tokens.request_access_token().await?;
        let mut request = request.header("Authorization", format!("Bearer {}", token.as_str()));
        if let Some(api_key) = &self.api_key {
            request = request.header("apikey", api_key);
        }
        Ok(request)
    }
}

fn normalize_base_url(url: &Url) -> String {
    url.as_str().trim_end_matches('/').to_string()
}

async fn ensure_success(response: Response) -> ReconcileResult<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    warn!(status = %status, body = %body, "backend request failed");
    Err(ReconcileError::BackendStatus {
        status: status.as_u16(),
        body,
    })
}

/// Map a consent response to a [`ConsentState`].
fn consent_from_response(status: StatusCode, body: &str) -> ReconcileResult<ConsentState> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Ok(ConsentState::MissingAuth);
    }
    if !status.is_success() {
        warn!(status = %status, "consent lookup failed");
        return Ok(ConsentState::Error);
    }
    let parsed: ConsentResponse = serde_json::from_str(body)?;
    Ok(ConsentState::Loaded {
        pending_count: parsed.pending_opt_ins.len(),
    })
}

#[async_trait]
impl SessionBackend for HttpSessionBackend {
    async fn create_session(&self) -> ReconcileResult<SessionCredential> {
        let url = self.endpoint(START_SESSION_PATH);
        debug!(url = %url, "Starting backend session");

        let request = self.authorize(self.http_client.post(&url)).await?;
        let response = ensure_success(request.send().await?).await?;
        let data: StartSessionResponse = response.json().await?;

        if data.session_id.trim().is_empty() {
            return Err(ReconcileError::Backend(
                "backend returned an empty session id".to_string(),
            ));
        }
        Ok(SessionCredential::new(data.session_id))
    }

    async fn verify_session(&self, credential: &SessionCredential) -> ReconcileResult<bool> {
        let url = self.endpoint(VERIFY_SESSION_PATH);
        debug!(url = %url, "Verifying backend session");

        let request = self
            .authorize(self.http_client.post(&url))
            .await?
            .json(&VerifyRequest {
                session_id: credential.as_str(),
            });
        let response = request.send().await?;

        // The backend answers 404 for sessions it has never seen.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let data: VerifyResponse = ensure_success(response).await?.json().await?;
        Ok(data.valid)
    }

    async fn fetch_consent_state(&self) -> ReconcileResult<ConsentState> {
        let url = self.endpoint(CONSENT_PATH);

        let request = match self.authorize(self.http_client.get(&url)).await {
            Ok(request) => request,
            Err(e) => {
                debug!(error = %e, "no access token for consent lookup");
                return Ok(ConsentState::MissingAuth);
            }
        };
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        consent_from_response(status, &body)
    }
}
