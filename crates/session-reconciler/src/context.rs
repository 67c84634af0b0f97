//! State shared between the engine handle, its worker and running passes.
//!
//! Every input change starts a new cycle by bumping the generation. A pass
//! only touches shared state through a [`PassScope`] bound to the generation
//! it started under, so results from a superseded pass are discarded.

use crate::collaborators::{IdentityProvider, SessionBackend};
use crate::diagnostics::{DiagnosticSink, SESSION_ID_PROPERTY};
use crate::notify::{Notification, NotificationKind, NotificationLatches, NotificationSink};
use crate::pass_fsm::EnginePhase;
use crate::state::{derive_state, AuthSignal, SessionCredential, SessionSlot, SessionState};
use credential_storage::CredentialSlot;
use parking_lot::Mutex;
use reconciler_config_and_utils::RetryPolicy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

pub(crate) type StateCallback = Arc<dyn Fn(&SessionState) + Send + Sync>;

/// Messages processed by the worker task.
#[derive(Debug)]
pub(crate) enum EngineEvent {
    InputsChanged { seq: u64 },
    RetryDue { generation: u64 },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TriggerSource {
    /// The host reported an input change.
    Host,
    /// Forced re-run, even with unchanged inputs.
    Explicit,
    /// A retry timer fired.
    RetryTimer,
}

/// Worker progress, used by `wait_until_settled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EngineStatus {
    pub(crate) phase: EnginePhase,
    /// Highest trigger sequence number the worker has picked up.
    pub(crate) handled: u64,
}

/// Marker returned when a pass lost its generation or the engine closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Superseded;

#[derive(Debug)]
struct EngineState {
    generation: u64,
    auth: Option<AuthSignal>,
    /// Last credential value read from or written to the store.
    stored: Option<SessionCredential>,
    /// The last store read failed, so `stored` may not match the store.
    store_unreadable: bool,
    slot: SessionSlot,
    token_failures: u32,
    propagation_retries: u32,
    rejection_logged: bool,
    latches: NotificationLatches,
    closed: bool,
}

impl EngineState {
    fn new() -> Self {
        Self {
            generation: 0,
            auth: None,
            stored: None,
            store_unreadable: false,
            slot: SessionSlot::Unknown,
            token_failures: 0,
            propagation_retries: 0,
            rejection_logged: false,
            latches: NotificationLatches::default(),
            closed: false,
        }
    }

    fn begin_cycle(&mut self) {
        self.generation += 1;
        self.token_failures = 0;
        self.propagation_retries = 0;
        self.rejection_logged = false;
    }

    fn derived(&self) -> SessionState {
        if self.store_unreadable {
            return SessionState::Loading;
        }
        derive_state(&self.slot, self.auth)
    }
}

/// Collaborators handed to the engine at construction.
pub(crate) struct Collaborators {
    pub(crate) credentials: CredentialSlot,
    pub(crate) provider: Arc<dyn IdentityProvider>,
    pub(crate) backend: Arc<dyn SessionBackend>,
    pub(crate) notifier: Arc<dyn NotificationSink>,
    pub(crate) diagnostics: Arc<dyn DiagnosticSink>,
}

pub(crate) struct Context {
    credentials: CredentialSlot,
    pub(crate) provider: Arc<dyn IdentityProvider>,
    pub(crate) backend: Arc<dyn SessionBackend>,
    pub(crate) retry: RetryPolicy,
    notifier: Arc<dyn NotificationSink>,
    diagnostics: Arc<dyn DiagnosticSink>,
    state: Mutex<EngineState>,
    events: mpsc::UnboundedSender<EngineEvent>,
    trigger_seq: AtomicU64,
    /// Serializes publication against teardown.
    publish_lock: Mutex<()>,
    published: watch::Sender<SessionState>,
    status: watch::Sender<EngineStatus>,
    subscribers: Mutex<Vec<(u64, StateCallback)>>,
    next_subscriber: AtomicU64,
}

impl Context {
    pub(crate) fn new(
        parts: Collaborators,
        retry: RetryPolicy,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Self {
        let (published, _) = watch::channel(SessionState::Loading);
        let (status, _) = watch::channel(EngineStatus {
            phase: EnginePhase::Idle,
            handled: 0,
        });

        Self {
            credentials: parts.credentials,
            provider: parts.provider,
            backend: parts.backend,
            retry,
            notifier: parts.notifier,
            diagnostics: parts.diagnostics,
            state: Mutex::new(EngineState::new()),
            events,
            trigger_seq: AtomicU64::new(0),
            publish_lock: Mutex::new(()),
            published,
            status,
            subscribers: Mutex::new(Vec::new()),
            next_subscriber: AtomicU64::new(1),
        }
    }

    /// Re-read the inputs and start a new cycle if they changed (or always,
    /// for [`TriggerSource::Explicit`]). Returns true if a cycle started.
    pub(crate) fn trigger(&self, source: TriggerSource) -> bool {
        let started = {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }

            let auth = self.provider.auth_signal();
            let (stored, unreadable) = match self.credentials.get() {
                Ok(value) => (value.map(SessionCredential::new), false),
                Err(e) => {
                    warn!(error = %e, "failed to read stored session credential");
                    (state.stored.clone(), true)
                }
            };

            let changed = auth != state.auth
                || stored != state.stored
                || unreadable != state.store_unreadable;
            state.auth = auth;
            state.stored = stored;
            state.store_unreadable = unreadable;

            if changed || source == TriggerSource::Explicit {
                state.begin_cycle();
                debug!(
                    ?source,
                    generation = state.generation,
                    auth = ?state.auth,
                    has_credential = state.stored.is_some(),
                    store_unreadable = state.store_unreadable,
                    "reconciliation cycle started"
                );
                true
            } else {
                false
            }
        };

        if started {
            let seq = self.trigger_seq.fetch_add(1, Ordering::SeqCst) + 1;
            let _ = self.events.send(EngineEvent::InputsChanged { seq });
        }
        started
    }

    pub(crate) fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Stop all further store writes and publications.
    pub(crate) fn close(&self) {
        let _guard = self.publish_lock.lock();
        let mut state = self.state.lock();
        if !state.closed {
            state.closed = true;
            debug!(generation = state.generation, "reconciliation engine closed");
        }
    }

    pub(crate) fn send(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn event_sender(&self) -> mpsc::UnboundedSender<EngineEvent> {
        self.events.clone()
    }

    pub(crate) fn trigger_seq(&self) -> u64 {
        self.trigger_seq.load(Ordering::SeqCst)
    }

    pub(crate) fn current_state(&self) -> SessionState {
        self.published.borrow().clone()
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.published.subscribe()
    }

    pub(crate) fn status(&self) -> EngineStatus {
        *self.status.borrow()
    }

    pub(crate) fn watch_status(&self) -> watch::Receiver<EngineStatus> {
        self.status.subscribe()
    }

    pub(crate) fn set_status(&self, status: EngineStatus) {
        self.status.send_replace(status);
    }

    pub(crate) fn add_subscriber(&self, callback: StateCallback) -> u64 {
        let id = self.next_subscriber.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().push((id, callback));
        id
    }

    pub(crate) fn remove_subscriber(&self, id: u64) {
        self.subscribers.lock().retain(|(existing, _)| *existing != id);
    }

    /// Publish the state derived from the current slot and signal.
    pub(crate) fn republish(&self) {
        let derived = self.state.lock().derived();
        self.publish(derived);
    }

    /// Publish `next` if it differs from the last published state, then run
    /// subscriber callbacks in registration order.
    ///
    /// Only the worker publishes, so callbacks run without any engine lock
    /// held. A callback may tear the engine down; the remaining callbacks
    /// are then skipped.
    fn publish(&self, next: SessionState) {
        {
            let _guard = self.publish_lock.lock();
            if self.state.lock().closed {
                return;
            }

            let changed = self.published.send_if_modified(|current| {
                if *current == next {
                    return false;
                }
                *current = next.clone();
                true
            });
            if !changed {
                return;
            }
        }

        info!(state = ?next, "session state changed");
        let callbacks: Vec<StateCallback> = self
            .subscribers
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            if self.is_closed() {
                break;
            }
            callback(&next);
        }
    }
}

/// Inputs a pass works from, captured at the start of the pass.
#[derive(Debug, Clone)]
pub(crate) struct PassInputs {
    pub(crate) auth: Option<AuthSignal>,
    pub(crate) credential: Option<SessionCredential>,
    pub(crate) store_unreadable: bool,
}

/// A pass's view of the shared state, bound to one generation.
pub(crate) struct PassScope<'a> {
    ctx: &'a Context,
    generation: u64,
}

impl<'a> PassScope<'a> {
    pub(crate) fn new(ctx: &'a Context, generation: u64) -> Self {
        Self { ctx, generation }
    }

    pub(crate) fn ctx(&self) -> &'a Context {
        self.ctx
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut EngineState) -> T) -> Result<T, Superseded> {
        let mut state = self.ctx.state.lock();
        if state.closed || state.generation != self.generation {
            return Err(Superseded);
        }
        Ok(f(&mut state))
    }

    pub(crate) fn inputs(&self) -> Result<PassInputs, Superseded> {
        self.with_state(|state| PassInputs {
            auth: state.auth,
            credential: state.stored.clone(),
            store_unreadable: state.store_unreadable,
        })
    }

    /// Count a failed token request. Returns the failures so far this cycle.
    pub(crate) fn record_token_failure(&self) -> Result<u32, Superseded> {
        self.with_state(|state| {
            state.token_failures += 1;
            state.token_failures
        })
    }

    pub(crate) fn reset_token_failures(&self) -> Result<(), Superseded> {
        self.with_state(|state| state.token_failures = 0)
    }

    /// Claim one propagation retry. Returns the retry number, or `None` once
    /// `max` retries have been used this cycle.
    pub(crate) fn take_propagation_retry(&self, max: u32) -> Result<Option<u32>, Superseded> {
        self.with_state(|state| {
            if state.propagation_retries >= max {
                return None;
            }
            state.propagation_retries += 1;
            Some(state.propagation_retries)
        })
    }

    /// True the first time a rejection is seen this cycle.
    pub(crate) fn first_rejection(&self) -> Result<bool, Superseded> {
        self.with_state(|state| !std::mem::replace(&mut state.rejection_logged, true))
    }

    /// Apply a resolution atomically, then publish the derived state and
    /// deliver notifications.
    pub(crate) fn commit(&self, f: impl FnOnce(&mut Transaction<'_>)) -> Result<(), Superseded> {
        let (derived, activated, notifications) = self.with_state(|state| {
            let mut tx = Transaction {
                state,
                credentials: &self.ctx.credentials,
                activated: None,
                notifications: Vec::new(),
            };
            f(&mut tx);
            let Transaction {
                state,
                activated,
                notifications,
                ..
            } = tx;
            (state.derived(), activated, notifications)
        })?;

        if let Some(credential) = activated {
            self.ctx
                .diagnostics
                .set_property(SESSION_ID_PROPERTY, credential.as_str());
        }
        for notification in notifications {
            self.ctx.notifier.notify(notification);
        }
        self.ctx.publish(derived);
        Ok(())
    }
}

/// Mutations applied under the state lock by [`PassScope::commit`].
pub(crate) struct Transaction<'a> {
    state: &'a mut EngineState,
    credentials: &'a CredentialSlot,
    activated: Option<SessionCredential>,
    notifications: Vec<Notification>,
}

impl Transaction<'_> {
    /// Persist `credential` and mark it verified.
    ///
    /// `stored` only follows successful writes, so a failed write is not
    /// later mistaken for an outside change to the store.
    pub(crate) fn activate(&mut self, credential: SessionCredential) {
        if self.state.stored.as_ref() != Some(&credential) {
            match self.credentials.set(Some(credential.as_str())) {
                Ok(()) => self.state.stored = Some(credential.clone()),
                Err(e) => error!(error = %e, "failed to persist session credential"),
            }
        }
        self.state.slot = SessionSlot::Active(credential.clone());
        self.activated = Some(credential);
    }

    /// Remove the stored credential and resolve to no session.
    pub(crate) fn clear_credential(&mut self) {
        self.remove_stored();
        self.state.slot = SessionSlot::Absent;
    }

    /// Remove the stored credential while a replacement session is started.
    /// The state stays loading until the replacement resolves.
    pub(crate) fn discard_credential(&mut self) {
        self.remove_stored();
        self.state.slot = SessionSlot::Unknown;
    }

    fn remove_stored(&mut self) {
        match self.credentials.set(None) {
            Ok(()) => {
                self.state.stored = None;
                self.state.store_unreadable = false;
            }
            Err(e) => error!(error = %e, "failed to clear session credential"),
        }
    }

    /// Queue `notification` unless its kind is already latched.
    pub(crate) fn notify_once(&mut self, notification: Notification) {
        if self.state.latches.fire(notification.kind()) {
            self.notifications.push(notification);
        } else {
            debug!(kind = ?notification.kind(), "notification already shown for this condition");
        }
    }

    pub(crate) fn rearm(&mut self, kind: NotificationKind) {
        self.state.latches.rearm(kind);
    }
}
