//! Session identity reconciliation.
//!
//! Reconciles three sources of truth into a single [`SessionState`]:
//! - the credential persisted in durable storage
//! - the authentication signal of an [`IdentityProvider`]
//! - validity and consent answers from a [`SessionBackend`]
//!
//! The [`ReconciliationEngine`] re-runs whenever an input changes, retries
//! transient failures on timers, and discards results of superseded passes.
//! Observers read the published state through [`ReconciliationEngine::subscribe`]
//! or [`ReconciliationEngine::watch`].

mod collaborators;
mod context;
mod diagnostics;
mod engine;
mod error;
mod gate;
mod http_backend;
mod notify;
mod pass_fsm;
mod protocol;
mod state;
mod timer;

#[cfg(test)]
mod tests;

pub use collaborators::{IdentityProvider, SessionBackend};
pub use diagnostics::{DiagnosticSink, MemoryDiagnostics, NullDiagnostics, SESSION_ID_PROPERTY};
pub use engine::{EngineBuilder, ReconciliationEngine, Subscription};
pub use error::{ReconcileError, ReconcileResult};
pub use gate::{AuthGate, GatePolicy, Navigator};
pub use http_backend::HttpSessionBackend;
pub use notify::{
    Notification, NotificationKind, NotificationSink, NullNotifier, RecordingNotifier,
    TracingNotifier, VerificationFailure,
};
pub use pass_fsm::EnginePhase;
pub use state::{AccessToken, AuthSignal, ConsentState, SessionCredential, SessionState};
