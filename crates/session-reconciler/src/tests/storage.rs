//! Credential store failures never mint extra sessions.

use super::harness::{logged_in, Fixture};
use crate::{AuthSignal, SessionState};

#[tokio::test(start_paused = true)]
async fn unreadable_store_holds_loading_without_creating_a_session() {
    let fixture = Fixture::new(Some(AuthSignal::AUTHENTICATED), Some("s0"));
    fixture.storage.fail_reads(1);
    let engine = fixture.start();

    engine.wait_until_settled().await;

    assert_eq!(engine.current_state(), SessionState::Loading);
    assert_eq!(fixture.backend.create_calls(), 0);
    assert_eq!(fixture.backend.verify_calls(), 0);
    assert_eq!(fixture.stored().as_deref(), Some("s0"));

    engine.credential_changed();
    engine.wait_until_settled().await;

    assert_eq!(engine.current_state(), logged_in("s0"));
    assert_eq!(fixture.backend.verified(), vec!["s0".to_string()]);
    assert_eq!(fixture.backend.create_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn store_turning_unreadable_drops_back_to_loading() {
    let fixture = Fixture::new(Some(AuthSignal::AUTHENTICATED), Some("s0"));
    let engine = fixture.start();
    engine.wait_until_settled().await;
    assert_eq!(engine.current_state(), logged_in("s0"));

    fixture.storage.fail_reads(1);
    engine.credential_changed();
    engine.wait_until_settled().await;

    assert_eq!(engine.current_state(), SessionState::Loading);
    assert_eq!(fixture.backend.verify_calls(), 1);
    assert_eq!(fixture.backend.create_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn sign_out_clears_an_unreadable_store() {
    let fixture = Fixture::new(Some(AuthSignal::UNAUTHENTICATED), Some("s0"));
    fixture.storage.fail_reads(1);
    let engine = fixture.start();

    engine.wait_until_settled().await;

    assert_eq!(engine.current_state(), SessionState::Unauthenticated);
    assert_eq!(fixture.stored(), None);
}

#[tokio::test(start_paused = true)]
async fn failed_write_is_not_mistaken_for_an_outside_change() {
    let fixture = Fixture::new(Some(AuthSignal::AUTHENTICATED), None);
    fixture.storage.fail_writes(true);
    let engine = fixture.start();

    engine.wait_until_settled().await;
    assert_eq!(engine.current_state(), logged_in("created-1"));
    assert_eq!(fixture.stored(), None);

    engine.credential_changed();
    engine.auth_signal_changed();
    engine.wait_until_settled().await;

    assert_eq!(fixture.backend.create_calls(), 1);
    assert_eq!(engine.current_state(), logged_in("created-1"));
}
