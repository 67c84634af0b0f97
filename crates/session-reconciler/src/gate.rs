//! Host-side gate that enforces the session state.
//!
//! Hosts that require a session attach an [`AuthGate`] to the engine. The
//! gate sends the user to the landing path whenever the state becomes
//! unauthenticated, and hands out the session id only when fully logged in.

use crate::engine::{ReconciliationEngine, Subscription};
use crate::state::{SessionCredential, SessionState};
use crate::{ReconcileError, ReconcileResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Performs navigation for the host.
pub trait Navigator: Send + Sync {
    fn navigate(&self, target: &str);
}

/// Redirect settings for an [`AuthGate`].
#[derive(Debug, Clone)]
pub struct GatePolicy {
    pub redirect_if_unauthenticated: bool,
    pub landing_path: String,
}

struct Redirector {
    landing_path: String,
    navigator: Arc<dyn Navigator>,
    /// Set while the current unauthenticated stretch has been redirected.
    redirected: AtomicBool,
}

impl Redirector {
    fn observe(&self, state: &SessionState) {
        if *state != SessionState::Unauthenticated {
            self.redirected.store(false, Ordering::SeqCst);
            return;
        }
        if !self.redirected.swap(true, Ordering::SeqCst) {
            info!(target_path = %self.landing_path, "no session, redirecting");
            self.navigator.navigate(&self.landing_path);
        }
    }
}

/// Session gate bound to one engine.
pub struct AuthGate {
    engine: Arc<ReconciliationEngine>,
    subscription: Option<Subscription>,
}

impl AuthGate {
    pub fn attach(
        engine: Arc<ReconciliationEngine>,
        policy: GatePolicy,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        if !policy.redirect_if_unauthenticated {
            return Self {
                engine,
                subscription: None,
            };
        }

        let redirector = Arc::new(Redirector {
            landing_path: policy.landing_path,
            navigator,
            redirected: AtomicBool::new(false),
        });

        let observer = redirector.clone();
        let subscription = engine.subscribe(move |state| observer.observe(state));
        redirector.observe(&engine.current_state());

        Self {
            engine,
            subscription: Some(subscription),
        }
    }

    pub fn state(&self) -> SessionState {
        self.engine.current_state()
    }

    /// The session id, if fully logged in.
    pub fn require_fully_logged_in(&self) -> ReconcileResult<SessionCredential> {
        if self.engine.is_closed() {
            return Err(ReconcileError::Closed);
        }
        match self.engine.current_state() {
            SessionState::FullyLoggedIn { session_id } => Ok(session_id),
            _ => Err(ReconcileError::NotLoggedIn),
        }
    }

    /// Stop redirecting.
    pub fn detach(mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}
