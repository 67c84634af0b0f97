//! One reconciliation pass.
//!
//! A pass reads the inputs of its cycle, talks to the provider and backend,
//! and commits at most one resolution. It never sleeps: when it needs to wait
//! it returns [`PassOutcome::RetryAfter`] and the worker arms a timer.

use crate::context::{Context, PassScope, Superseded};
use crate::notify::{Notification, NotificationKind, VerificationFailure};
use crate::state::{AuthSignal, ConsentState, SessionCredential};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PassOutcome {
    /// Nothing left to do until the inputs change.
    Settled,
    /// Run another pass of the same cycle after `delay`.
    RetryAfter { delay: Duration, generation: u64 },
}

pub(crate) type PassResult = Result<PassOutcome, Superseded>;

pub(crate) async fn run_pass(ctx: Arc<Context>, generation: u64) -> PassResult {
    let scope = PassScope::new(&ctx, generation);
    let inputs = scope.inputs()?;

    if inputs
        .auth
        .is_some_and(|signal| signal.is_definitively_unauthenticated())
    {
        if inputs.credential.is_some() {
            info!("provider reports no signed-in user, clearing stored session credential");
        }
        scope.commit(|tx| tx.clear_credential())?;
        return Ok(PassOutcome::Settled);
    }

    if inputs.store_unreadable {
        warn!("stored session credential unreadable, waiting for the next change");
        return Ok(PassOutcome::Settled);
    }

    match inputs.credential {
        Some(credential) => reconcile_stored(&scope, credential, inputs.auth).await,
        None if inputs.auth.is_some_and(|signal| signal.is_authenticated) => {
            start_session(&scope).await
        }
        None => {
            debug!("no stored credential, waiting for provider to finish loading");
            Ok(PassOutcome::Settled)
        }
    }
}

fn retry_after(scope: &PassScope<'_>, delay: Duration) -> PassResult {
    Ok(PassOutcome::RetryAfter {
        delay,
        generation: scope.generation(),
    })
}

async fn reconcile_stored(
    scope: &PassScope<'_>,
    credential: SessionCredential,
    auth: Option<AuthSignal>,
) -> PassResult {
    let ctx = scope.ctx();
    let policy = &ctx.retry;

    if let Err(e) = ctx.provider.request_access_token().await {
        let failures = scope.record_token_failure()?;
        if failures < policy.max_token_attempts {
            warn!(
                error = %e,
                attempt = failures,
                max_attempts = policy.max_token_attempts,
                "unable to fetch access token, retrying"
            );
            return retry_after(scope, policy.token_retry_delay());
        }
        error!(
            error = %e,
            attempts = failures,
            "access token still unavailable, leaving session state unchanged"
        );
        return Ok(PassOutcome::Settled);
    }
    scope.reset_token_failures()?;

    if !auth.is_some_and(|signal| signal.is_authenticated) {
        if let Some(retry) = scope.take_propagation_retry(policy.max_propagation_retries)? {
            debug!(
                retry,
                max_retries = policy.max_propagation_retries,
                "provider not authenticated yet, waiting for auth to propagate"
            );
            return retry_after(scope, policy.propagation_retry_delay());
        }

        info!("provider still not authenticated, nudging backend session start");
        if let Err(e) = ctx.backend.create_session().await {
            warn!(error = %e, "backend session nudge failed");
        }
        return Ok(PassOutcome::Settled);
    }

    let valid = match ctx.backend.verify_session(&credential).await {
        Ok(valid) => valid,
        Err(e) => {
            error!(error = %e, "error verifying session");
            return replace_session(scope, VerificationFailure::Unavailable).await;
        }
    };

    if !valid {
        if scope.first_rejection()? {
            info!(session_id = %credential, "stored session failed verification, replacing it");
        }
        return replace_session(scope, VerificationFailure::Rejected).await;
    }

    apply_consent(scope, credential).await
}

/// Drop a credential that failed verification and start a new session for
/// the signed-in user.
async fn replace_session(scope: &PassScope<'_>, reason: VerificationFailure) -> PassResult {
    scope.commit(|tx| {
        tx.notify_once(Notification::VerificationFailed { reason });
        tx.discard_credential();
    })?;
    start_session(scope).await
}

async fn apply_consent(scope: &PassScope<'_>, credential: SessionCredential) -> PassResult {
    let consent = match scope.ctx().backend.fetch_consent_state().await {
        Ok(consent) => consent,
        Err(e) => {
            warn!(error = %e, "consent lookup failed");
            ConsentState::Error
        }
    };

    match consent {
        ConsentState::Loaded { pending_count: 0 } => scope.commit(|tx| {
            tx.rearm(NotificationKind::VerificationFailed);
            tx.rearm(NotificationKind::ConsentRequired);
            tx.rearm(NotificationKind::SetupIncomplete);
            tx.activate(credential);
        })?,
        ConsentState::Loaded { pending_count } => {
            debug!(pending_count, "consent required before the session can be used");
            scope.commit(|tx| {
                tx.rearm(NotificationKind::VerificationFailed);
                tx.notify_once(Notification::ConsentRequired { pending_count });
            })?
        }
        ConsentState::Error => {
            warn!("consent state unavailable but session is valid, allowing access");
            scope.commit(|tx| {
                tx.rearm(NotificationKind::VerificationFailed);
                tx.rearm(NotificationKind::ConsentRequired);
                tx.notify_once(Notification::SetupIncomplete);
                tx.activate(credential);
            })?
        }
        ConsentState::MissingAuth => {
            warn!("no auth for consent lookup but session is valid, allowing access");
            scope.commit(|tx| {
                tx.rearm(NotificationKind::VerificationFailed);
                tx.rearm(NotificationKind::ConsentRequired);
                tx.activate(credential);
            })?
        }
    }
    Ok(PassOutcome::Settled)
}

async fn start_session(scope: &PassScope<'_>) -> PassResult {
    match scope.ctx().backend.create_session().await {
        Ok(credential) => {
            info!(session_id = %credential, "backend session started");
            scope.commit(|tx| {
                tx.rearm(NotificationKind::VerificationFailed);
                tx.activate(credential);
            })?;
        }
        Err(e) => {
            error!(error = %e, "error creating session");
            scope.commit(|tx| tx.clear_credential())?;
        }
    }
    Ok(PassOutcome::Settled)
}
