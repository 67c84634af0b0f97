//! Reconciliation pass lifecycle using rust-fsm.
//!
//! Tracks whether the engine is idle, running a pass, or waiting for a retry
//! timer. Session state itself is derived separately; this machine only
//! describes the worker.
//!
//! ## State Diagram
//!
//! ```text
//! ┌──────────┐  Triggered   ┌──────────┐  RetryScheduled  ┌────────────┐
//! │   Idle   │ ───────────► │ Running  │ ───────────────► │ BackingOff │
//! └──────────┘ ◄─────────── └──────────┘ ◄─────────────── └────────────┘
//!                 Settled        ▲ │      Triggered / RetryDue
//!                                └─┘ Triggered
//!
//!  any state ── Shutdown ──► Closed
//! ```

use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub pass_machine(Idle)

    Idle => {
        Triggered => Running,
        Shutdown => Closed
    },
    Running => {
        // A newer trigger supersedes the pass in flight
        Triggered => Running,
        Settled => Idle,
        RetryScheduled => BackingOff,
        Shutdown => Closed
    },
    BackingOff => {
        Triggered => Running,
        RetryDue => Running,
        Shutdown => Closed
    }
}

pub use pass_machine::Input as PassMachineInput;
pub use pass_machine::State as PassMachineState;
pub use pass_machine::StateMachine as PassMachine;

/// Public view of the worker lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnginePhase {
    /// No pass running and no retry pending.
    Idle,
    /// A pass is in flight.
    Running,
    /// Waiting for a retry timer.
    BackingOff,
    /// Torn down.
    Closed,
}

impl EnginePhase {
    /// Returns true when no further work is scheduled.
    pub fn is_settled(&self) -> bool {
        matches!(self, EnginePhase::Idle | EnginePhase::Closed)
    }
}

impl From<&PassMachineState> for EnginePhase {
    fn from(state: &PassMachineState) -> Self {
        match state {
            PassMachineState::Idle => EnginePhase::Idle,
            PassMachineState::Running => EnginePhase::Running,
            PassMachineState::BackingOff => EnginePhase::BackingOff,
            PassMachineState::Closed => EnginePhase::Closed,
        }
    }
}
