//! Readiness states, events and the transition table
//!
//! ```text
//!   CheckingSchema ──schema asserted──► CheckingIndex ──index asserted──► Creating ──bucket asserted──► Ready
//!        │  ▲                              │  ▲                             │  ▲
//!  failed│  │retry                   failed│  │retry                  failed│  │retry
//!        ▼  │                              ▼  │                             ▼  │
//!      (stall, error surfaced)           (stall, error surfaced)          (stall, error surfaced)
//! ```
//!
//! Skips (no schema, no schema path, no index) are decided by [`on_enter`]
//! rather than by events.

use crate::plan::ReadinessPlan;
use std::fmt;
use std::path::PathBuf;

/// Provisioning state of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadinessState {
    CheckingSchema,
    CheckingIndex,
    Creating,
    Ready,
}

impl ReadinessState {
    pub fn is_ready(self) -> bool {
        self == ReadinessState::Ready
    }
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReadinessState::CheckingSchema => "checkingSchema",
            ReadinessState::CheckingIndex => "checkingIndex",
            ReadinessState::Creating => "creating",
            ReadinessState::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Inputs that drive the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadinessEvent {
    SchemaAsserted,
    IndexAsserted,
    BucketAsserted,
    Failed,
    Retry,
}

impl fmt::Display for ReadinessEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReadinessEvent::SchemaAsserted => "schema.asserted",
            ReadinessEvent::IndexAsserted => "index.asserted",
            ReadinessEvent::BucketAsserted => "bucket.asserted",
            ReadinessEvent::Failed => "failed",
            ReadinessEvent::Retry => "retry",
        };
        f.write_str(name)
    }
}

/// What the controller does in response to an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Move to the given state and run its entry function
    Advance(ReadinessState),
    /// Stay put; the failure is surfaced and the step is not rerun
    Stall,
    /// Run the current state's entry function again
    Reenter,
}

struct Rule {
    state: ReadinessState,
    event: ReadinessEvent,
    action: Action,
}

const fn rule(state: ReadinessState, event: ReadinessEvent, action: Action) -> Rule {
    Rule {
        state,
        event,
        action,
    }
}

use Action::*;
use ReadinessEvent::*;
use ReadinessState::*;

static RULES: &[Rule] = &[
    rule(CheckingSchema, SchemaAsserted, Advance(CheckingIndex)),
    rule(CheckingSchema, Failed, Stall),
    rule(CheckingSchema, Retry, Reenter),
    rule(CheckingIndex, IndexAsserted, Advance(Creating)),
    rule(CheckingIndex, Failed, Stall),
    rule(CheckingIndex, Retry, Reenter),
    rule(Creating, BucketAsserted, Advance(Ready)),
    rule(Creating, Failed, Stall),
    rule(Creating, Retry, Reenter),
];

/// Look up the action for `event` in `state`; `None` means the event is ignored
pub fn transition(state: ReadinessState, event: ReadinessEvent) -> Option<Action> {
    RULES
        .iter()
        .find(|r| r.state == state && r.event == event)
        .map(|r| r.action)
}

/// Side effect a state runs on entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    AssertSchema { name: String, path: PathBuf },
    AssertIndex { index: String, schema: String },
    AssertProperties,
}

/// Outcome of entering a state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// Nothing to do here; continue straight to the given state
    Skip(ReadinessState),
    /// Run the effect and wait for its event
    Run(Effect),
    /// Terminal state reached
    Terminal,
}

/// Decide what entering `state` means for `plan`
pub fn on_enter(plan: &ReadinessPlan, state: ReadinessState) -> Entry {
    match state {
        CheckingSchema => match (&plan.schema, &plan.schema_path) {
            (None, _) => Entry::Skip(Creating),
            (Some(_), None) => Entry::Skip(CheckingIndex),
            (Some(name), Some(path)) => Entry::Run(Effect::AssertSchema {
                name: name.clone(),
                path: path.clone(),
            }),
        },
        CheckingIndex => match (&plan.search_index, &plan.schema) {
            (Some(index), Some(schema)) => Entry::Run(Effect::AssertIndex {
                index: index.clone(),
                schema: schema.clone(),
            }),
            _ => Entry::Skip(Creating),
        },
        Creating => Entry::Run(Effect::AssertProperties),
        Ready => Entry::Terminal,
    }
}
