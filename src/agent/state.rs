//! Session phases and their transition table.

use serde::{Deserialize, Serialize};

use crate::agent::evidence::{Evidence, QueryRecord};
use crate::error::{RagError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Iterating,
    Concluded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    /// Seed evidence is in place.
    Seeded,
    /// A round finished and the model wants more evidence.
    Continue,
    /// The model judged the evidence sufficient.
    Sufficient,
    /// The round budget is spent.
    CapReached,
    /// The request was cancelled.
    Cancel,
}

/// Why a session concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    Sufficient,
    IterationCap,
    Cancelled,
}

/// The transition table.
///
/// `Concluded` is terminal; every event applied to it is rejected, as is any
/// pair not listed here.
pub fn transition(phase: Phase, event: Event) -> Result<Phase> {
    use Event::*;
    use Phase::*;
    match (phase, event) {
        (Init, Seeded) => Ok(Iterating),
        (Init, Cancel) => Ok(Concluded),
        (Iterating, Continue) => Ok(Iterating),
        (Iterating, Sufficient | CapReached | Cancel) => Ok(Concluded),
        (phase, event) => Err(RagError::invalid_operation(format!(
            "no transition from {phase:?} on {event:?}"
        ))),
    }
}

/// Observable state of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub phase: Phase,
    /// Rounds started so far.
    pub round: usize,
    pub queries: Vec<QueryRecord>,
    pub evidence: Vec<Evidence>,
    pub reason: Option<CompletionReason>,
}

impl SessionState {
    pub(crate) fn new() -> Self {
        Self {
            phase: Phase::Init,
            round: 0,
            queries: Vec::new(),
            evidence: Vec::new(),
            reason: None,
        }
    }

    pub(crate) fn apply(&mut self, event: Event) -> Result<Phase> {
        self.phase = transition(self.phase, event)?;
        if self.phase == Phase::Concluded {
            self.reason = Some(match event {
                Event::Sufficient => CompletionReason::Sufficient,
                Event::CapReached => CompletionReason::IterationCap,
                _ => CompletionReason::Cancelled,
            });
        }
        Ok(self.phase)
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Concluded
    }

    /// Whether the session stopped before it could finish its research.
    pub fn is_incomplete(&self) -> bool {
        self.reason == Some(CompletionReason::Cancelled)
    }
}
