//! The reconciliation engine handle and its worker task.
//!
//! The handle is cheap to call from any thread: trigger methods only update
//! the shared inputs and wake the worker. The worker owns the pass lifecycle.
//! It runs at most one pass at a time, drops a pass as soon as a newer
//! trigger arrives, and arms retry timers on behalf of passes. All state
//! publication happens on the worker, so subscribers observe transitions in
//! order.

use crate::collaborators::{IdentityProvider, SessionBackend};
use crate::context::{
    Collaborators, Context, EngineEvent, EngineStatus, StateCallback, TriggerSource,
};
use crate::diagnostics::{DiagnosticSink, NullDiagnostics};
use crate::notify::{NotificationSink, TracingNotifier};
use crate::pass_fsm::{EnginePhase, PassMachine, PassMachineInput};
use crate::protocol::{self, PassOutcome, PassResult};
use crate::state::SessionState;
use crate::timer::RetryTimer;
use credential_storage::CredentialSlot;
use parking_lot::Mutex;
use reconciler_config_and_utils::RetryPolicy;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type PassFuture = Pin<Box<dyn Future<Output = PassResult> + Send>>;

/// Builder for [`ReconciliationEngine`].
pub struct EngineBuilder {
    credentials: CredentialSlot,
    provider: Arc<dyn IdentityProvider>,
    backend: Arc<dyn SessionBackend>,
    retry: RetryPolicy,
    notifier: Arc<dyn NotificationSink>,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl EngineBuilder {
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn diagnostics(mut self, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Spawn the worker and run the first reconciliation pass.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self) -> ReconciliationEngine {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(Context::new(
            Collaborators {
                credentials: self.credentials,
                provider: self.provider,
                backend: self.backend,
                notifier: self.notifier,
                diagnostics: self.diagnostics,
            },
            self.retry,
            events_tx,
        ));

        let worker = Worker::new(ctx.clone(), events_rx);
        let handle = tokio::spawn(worker.run());
        ctx.trigger(TriggerSource::Explicit);
        info!("session reconciliation engine started");

        ReconciliationEngine {
            ctx,
            worker: Mutex::new(Some(handle)),
        }
    }
}

/// Handle to a running reconciliation engine.
///
/// Dropping the handle tears the engine down.
pub struct ReconciliationEngine {
    ctx: Arc<Context>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ReconciliationEngine {
    pub fn builder(
        credentials: CredentialSlot,
        provider: Arc<dyn IdentityProvider>,
        backend: Arc<dyn SessionBackend>,
    ) -> EngineBuilder {
        EngineBuilder {
            credentials,
            provider,
            backend,
            retry: RetryPolicy::default(),
            notifier: Arc::new(TracingNotifier),
            diagnostics: Arc::new(NullDiagnostics),
        }
    }

    /// Last published session state.
    pub fn current_state(&self) -> SessionState {
        self.ctx.current_state()
    }

    /// Receiver that observes every published state.
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.ctx.watch_state()
    }

    /// Register `callback` to run on every state transition, in order.
    ///
    /// Callbacks run on the engine's worker task and must not block.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SessionState) + Send + Sync + 'static,
    {
        let callback: StateCallback = Arc::new(callback);
        let id = self.ctx.add_subscriber(callback);
        Subscription {
            ctx: Arc::downgrade(&self.ctx),
            id,
        }
    }

    pub fn phase(&self) -> EnginePhase {
        self.ctx.status().phase
    }

    pub fn is_closed(&self) -> bool {
        self.ctx.is_closed()
    }

    /// The provider's signal may have changed. Starts a new cycle if it did.
    pub fn auth_signal_changed(&self) {
        self.ctx.trigger(TriggerSource::Host);
    }

    /// The stored credential may have changed outside the engine. Starts a
    /// new cycle if it did.
    pub fn credential_changed(&self) {
        self.ctx.trigger(TriggerSource::Host);
    }

    /// Start a new cycle even if no input changed.
    pub fn refresh(&self) {
        self.ctx.trigger(TriggerSource::Explicit);
    }

    /// Wait until every trigger issued so far has been handled and no pass
    /// or retry is pending.
    pub async fn wait_until_settled(&self) {
        let target = self.ctx.trigger_seq();
        let mut status = self.ctx.watch_status();
        let _ = status
            .wait_for(|s| {
                s.phase == EnginePhase::Closed || (s.phase.is_settled() && s.handled >= target)
            })
            .await;
    }

    /// Tear down: cancel pending work and stop the worker. No store writes
    /// or state publications happen after this returns.
    pub async fn shutdown(&self) {
        self.ctx.close();
        self.ctx.send(EngineEvent::Shutdown);

        let worker = self.worker.lock().take();
        if let Some(handle) = worker {
            if let Err(e) = handle.await {
                warn!(error = %e, "reconciliation worker ended abnormally");
            }
            info!("session reconciliation engine stopped");
        }
    }
}

impl Drop for ReconciliationEngine {
    fn drop(&mut self) {
        self.ctx.close();
        self.ctx.send(EngineEvent::Shutdown);
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
        }
    }
}

/// Registration of a state callback. Dropping it removes the callback.
#[must_use = "the callback is removed as soon as the subscription is dropped"]
pub struct Subscription {
    ctx: Weak<Context>,
    id: u64,
}

impl Subscription {
    /// Remove the callback now.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.upgrade() {
            ctx.remove_subscriber(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

enum Step {
    Event(Option<EngineEvent>),
    PassFinished(PassResult),
}

struct Worker {
    ctx: Arc<Context>,
    events: mpsc::UnboundedReceiver<EngineEvent>,
    machine: PassMachine,
    pass: Option<PassFuture>,
    timer: Option<RetryTimer>,
    handled: u64,
}

impl Worker {
    fn new(ctx: Arc<Context>, events: mpsc::UnboundedReceiver<EngineEvent>) -> Self {
        Self {
            ctx,
            events,
            machine: PassMachine::new(),
            pass: None,
            timer: None,
            handled: 0,
        }
    }

    async fn run(mut self) {
        loop {
            let step = tokio::select! {
                biased;
                event = self.events.recv() => Step::Event(event),
                result = next_result(&mut self.pass) => Step::PassFinished(result),
            };

            match step {
                Step::Event(Some(EngineEvent::InputsChanged { seq })) => {
                    self.handled = self.handled.max(seq);
                    self.start_pass(&PassMachineInput::Triggered);
                }
                Step::Event(Some(EngineEvent::RetryDue { generation })) => {
                    self.on_retry_due(generation);
                }
                Step::Event(Some(EngineEvent::Shutdown)) | Step::Event(None) => break,
                Step::PassFinished(result) => self.on_pass_finished(result),
            }
        }

        self.pass = None;
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        self.transition(&PassMachineInput::Shutdown);
        debug!("reconciliation worker stopped");
    }

    fn start_pass(&mut self, input: &PassMachineInput) {
        if let Some(timer) = self.timer.take() {
            debug!("cancelling pending retry timer");
            timer.cancel();
        }
        if self.pass.take().is_some() {
            debug!("superseding in-flight reconciliation pass");
        }

        self.ctx.republish();
        if !self.transition(input) {
            return;
        }

        let generation = self.ctx.generation();
        debug!(generation, "starting reconciliation pass");
        self.pass = Some(Box::pin(protocol::run_pass(self.ctx.clone(), generation)));
    }

    fn on_retry_due(&mut self, generation: u64) {
        let current = self.ctx.generation();
        if self.timer.is_none() || generation != current {
            debug!(generation, current, "ignoring stale retry timer");
            return;
        }
        self.timer = None;

        // Inputs moved on while backing off; the queued trigger starts the next pass.
        if self.ctx.trigger(TriggerSource::RetryTimer) {
            return;
        }
        self.start_pass(&PassMachineInput::RetryDue);
    }

    fn on_pass_finished(&mut self, result: PassResult) {
        self.pass = None;
        match result {
            Ok(PassOutcome::Settled) => {
                self.transition(&PassMachineInput::Settled);
            }
            Ok(PassOutcome::RetryAfter { delay, generation }) => {
                let events = self.ctx.event_sender();
                self.timer = Some(RetryTimer::schedule(delay, move || {
                    let _ = events.send(EngineEvent::RetryDue { generation });
                }));
                debug!(generation, delay_ms = delay.as_millis() as u64, "retry scheduled");
                self.transition(&PassMachineInput::RetryScheduled);
            }
            Err(_) => {
                debug!("reconciliation pass superseded before it could commit");
            }
        }
    }

    /// Apply `input` to the pass machine and publish the new phase.
    fn transition(&mut self, input: &PassMachineInput) -> bool {
        let old_phase = EnginePhase::from(self.machine.state());
        if self.machine.consume(input).is_err() {
            warn!(?input, phase = ?old_phase, "invalid reconciliation phase transition");
            return false;
        }

        let new_phase = EnginePhase::from(self.machine.state());
        if old_phase != new_phase {
            debug!(
                old_phase = ?old_phase,
                new_phase = ?new_phase,
                "Reconciliation phase transition"
            );
        }
        self.ctx.set_status(EngineStatus {
            phase: new_phase,
            handled: self.handled,
        });
        true
    }
}

async fn next_result(pass: &mut Option<PassFuture>) -> PassResult {
    match pass {
        Some(pass) => pass.await,
        None => std::future::pending().await,
    }
}
