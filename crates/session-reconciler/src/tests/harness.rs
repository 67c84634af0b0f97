//! Scripted collaborators and helpers shared by the engine tests.

use crate::{
    AccessToken, AuthSignal, ConsentState, IdentityProvider, MemoryDiagnostics, Navigator,
    RecordingNotifier, ReconcileError, ReconcileResult, ReconciliationEngine, SessionBackend,
    SessionCredential, SessionState, Subscription,
};
use async_trait::async_trait;
use credential_storage::{
    CredentialSlot, DurableStorage, MemoryStorage, StorageError, StorageResult,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub(crate) const KEY: &str = "sessionIdForConvex";

/// Provider whose signal and token behavior tests control directly.
pub(crate) struct MockProvider {
    signal: Mutex<Option<AuthSignal>>,
    failing_tokens: Mutex<u32>,
    token_calls: AtomicUsize,
}

impl MockProvider {
    pub(crate) fn new(signal: Option<AuthSignal>) -> Self {
        Self {
            signal: Mutex::new(signal),
            failing_tokens: Mutex::new(0),
            token_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_signal(&self, signal: Option<AuthSignal>) {
        *self.signal.lock() = signal;
    }

    /// Fail the next `count` token requests.
    pub(crate) fn fail_tokens(&self, count: u32) {
        *self.failing_tokens.lock() = count;
    }

    pub(crate) fn always_fail_tokens(&self) {
        self.fail_tokens(u32::MAX);
    }

    pub(crate) fn token_calls(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for MockProvider {
    fn auth_signal(&self) -> Option<AuthSignal> {
        *self.signal.lock()
    }

    async fn request_access_token(&self) -> ReconcileResult<AccessToken> {
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        let mut failing = self.failing_tokens.lock();
        if *failing > 0 {
            if *failing != u32::MAX {
                *failing -= 1;
            }
            return Err(ReconcileError::TokenUnavailable(
                "provider still settling".to_string(),
            ));
        }
        Ok(AccessToken::new("token-abc"))
    }
}

/// Backend with scripted answers and call counters.
pub(crate) struct MockBackend {
    create_results: Mutex<VecDeque<Result<String, String>>>,
    verify_result: Mutex<Result<bool, String>>,
    consent_result: Mutex<Result<ConsentState, String>>,
    hold: Mutex<Option<Arc<Notify>>>,
    verified: Mutex<Vec<String>>,
    create_calls: AtomicUsize,
    verify_calls: AtomicUsize,
    consent_calls: AtomicUsize,
}

impl MockBackend {
    pub(crate) fn new() -> Self {
        Self {
            create_results: Mutex::new(VecDeque::new()),
            verify_result: Mutex::new(Ok(true)),
            consent_result: Mutex::new(Ok(ConsentState::Loaded { pending_count: 0 })),
            hold: Mutex::new(None),
            verified: Mutex::new(Vec::new()),
            create_calls: AtomicUsize::new(0),
            verify_calls: AtomicUsize::new(0),
            consent_calls: AtomicUsize::new(0),
        }
    }

    /// Queue the result of the next `create_session`. Unqueued calls succeed
    /// with `created-<n>`.
    pub(crate) fn push_create(&self, result: Result<&str, &str>) {
        self.create_results
            .lock()
            .push_back(result.map(str::to_string).map_err(str::to_string));
    }

    pub(crate) fn set_verify(&self, result: Result<bool, &str>) {
        *self.verify_result.lock() = result.map_err(str::to_string);
    }

    pub(crate) fn set_consent(&self, result: Result<ConsentState, &str>) {
        *self.consent_result.lock() = result.map_err(str::to_string);
    }

    /// Block `create_session` and `verify_session` until the returned
    /// notify is triggered.
    pub(crate) fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.hold.lock() = Some(gate.clone());
        gate
    }

    pub(crate) fn release(&self) {
        if let Some(gate) = self.hold.lock().take() {
            gate.notify_waiters();
        }
    }

    pub(crate) fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn consent_calls(&self) -> usize {
        self.consent_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn verified(&self) -> Vec<String> {
        self.verified.lock().clone()
    }

    async fn wait_if_held(&self) {
        let gate = self.hold.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }
}

#[async_trait]
impl SessionBackend for MockBackend {
    async fn create_session(&self) -> ReconcileResult<SessionCredential> {
        let call = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.wait_if_held().await;
        let scripted = self.create_results.lock().pop_front();
        match scripted {
            Some(Ok(id)) => Ok(SessionCredential::new(id)),
            Some(Err(message)) => Err(ReconcileError::Backend(message)),
            None => Ok(SessionCredential::new(format!("created-{}", call))),
        }
    }

    async fn verify_session(&self, credential: &SessionCredential) -> ReconcileResult<bool> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.verified.lock().push(credential.to_string());
        self.wait_if_held().await;
        let result = self.verify_result.lock().clone();
        result.map_err(ReconcileError::Backend)
    }

    async fn fetch_consent_state(&self) -> ReconcileResult<ConsentState> {
        self.consent_calls.fetch_add(1, Ordering::SeqCst);
        let result = self.consent_result.lock().clone();
        result.map_err(ReconcileError::Backend)
    }
}

/// Memory store whose reads and writes can be made to fail.
#[derive(Default)]
pub(crate) struct ScriptedStorage {
    inner: MemoryStorage,
    failing_reads: Mutex<u32>,
    failing_writes: Mutex<bool>,
}

impl ScriptedStorage {
    /// Fail the next `count` reads.
    pub(crate) fn fail_reads(&self, count: u32) {
        *self.failing_reads.lock() = count;
    }

    pub(crate) fn fail_writes(&self, failing: bool) {
        *self.failing_writes.lock() = failing;
    }

    fn unavailable() -> StorageError {
        StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "storage unavailable",
        ))
    }

    fn check_write(&self) -> StorageResult<()> {
        if *self.failing_writes.lock() {
            return Err(Self::unavailable());
        }
        Ok(())
    }
}

impl DurableStorage for ScriptedStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.check_write()?;
        self.inner.set(key, value)
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let mut failing = self.failing_reads.lock();
        if *failing > 0 {
            *failing -= 1;
            return Err(Self::unavailable());
        }
        self.inner.get(key)
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        self.check_write()?;
        self.inner.delete(key)
    }
}

/// Navigator that records every target.
#[derive(Default)]
pub(crate) struct RecordingNavigator {
    targets: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub(crate) fn targets(&self) -> Vec<String> {
        self.targets.lock().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, target: &str) {
        self.targets.lock().push(target.to_string());
    }
}

/// One engine's collaborators.
pub(crate) struct Fixture {
    pub(crate) storage: Arc<ScriptedStorage>,
    pub(crate) provider: Arc<MockProvider>,
    pub(crate) backend: Arc<MockBackend>,
    pub(crate) notifier: Arc<RecordingNotifier>,
    pub(crate) diagnostics: Arc<MemoryDiagnostics>,
}

impl Fixture {
    pub(crate) fn new(signal: Option<AuthSignal>, stored: Option<&str>) -> Self {
        let inner = match stored {
            Some(value) => MemoryStorage::with_entry(KEY, value),
            None => MemoryStorage::new(),
        };
        let storage = ScriptedStorage {
            inner,
            ..ScriptedStorage::default()
        };
        Self {
            storage: Arc::new(storage),
            provider: Arc::new(MockProvider::new(signal)),
            backend: Arc::new(MockBackend::new()),
            notifier: Arc::new(RecordingNotifier::new()),
            diagnostics: Arc::new(MemoryDiagnostics::new()),
        }
    }

    pub(crate) fn start(&self) -> ReconciliationEngine {
        ReconciliationEngine::builder(
            CredentialSlot::new(self.storage.clone(), KEY),
            self.provider.clone(),
            self.backend.clone(),
        )
        .notifier(self.notifier.clone())
        .diagnostics(self.diagnostics.clone())
        .start()
    }

    pub(crate) fn stored(&self) -> Option<String> {
        self.storage.inner.get(KEY).unwrap()
    }

    /// Write the store the way another tab or process would.
    pub(crate) fn store_externally(&self, value: &str) {
        self.storage.inner.set(KEY, value).unwrap();
    }
}

pub(crate) fn logged_in(id: &str) -> SessionState {
    SessionState::FullyLoggedIn {
        session_id: SessionCredential::new(id),
    }
}

/// Records every state delivered to a subscriber.
pub(crate) fn record_states(
    engine: &ReconciliationEngine,
) -> (Arc<Mutex<Vec<SessionState>>>, Subscription) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let subscription = engine.subscribe(move |state| sink.lock().push(state.clone()));
    (log, subscription)
}

/// Poll `condition` on the (paused) test clock until it holds.
pub(crate) async fn until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}
