//! Engine tests against scripted collaborators.
//!
//! All tests run on a paused Tokio clock, so retry delays elapse instantly
//! while keeping their ordering.
//!
//! - `scenarios.rs`    - end-to-end reconciliation outcomes
//! - `retry.rs`        - token and propagation retry bounds
//! - `supersession.rs` - stale passes and timers never commit
//! - `idempotence.rs`  - repeated triggers, latching, ordered delivery
//! - `lifecycle.rs`    - teardown and subscriptions
//! - `gate.rs`         - host redirects and session access
//! - `storage.rs`      - credential store read and write failures

mod harness;
mod storage;

use crate::{AuthSignal, EnginePhase, SessionState};
use harness::{logged_in, Fixture};

/// Basic workflow: a signed-in user with no session gets one.
#[tokio::test(start_paused = true)]
async fn basic_workflow() {
    let fixture = Fixture::new(Some(AuthSignal::AUTHENTICATED), None);
    let engine = fixture.start();

    engine.wait_until_settled().await;

    assert_eq!(engine.current_state(), logged_in("created-1"));
    assert_eq!(engine.phase(), EnginePhase::Idle);
    assert_eq!(fixture.stored().as_deref(), Some("created-1"));

    engine.shutdown().await;
    assert_eq!(engine.phase(), EnginePhase::Closed);
    assert_ne!(engine.current_state(), SessionState::Loading);
}
