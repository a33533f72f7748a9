//! Run events broadcast by directors to [`DirectorHandle`](crate::director::DirectorHandle)
//! subscribers.

use crate::director::RunState;
use crate::errors::Severity;
use crate::id::RunId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: RunId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: RunEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum RunEventKind {
    RunStateChanged { state: RunState },
    ActorInitialized { actor: String },
    ActorSkipped { actor: String, reason: String },
    ActorFired { actor: String, iteration: u64 },
    ActorFinished { actor: String, outcome: String },
    ProcessingError {
        actor: String,
        severity: Severity,
        message: String,
    },
    DeadlockDetected { blocked: usize },
}

impl RunEvent {
    pub fn new(run_id: RunId, kind: RunEventKind) -> Self {
        Self {
            run_id,
            timestamp: Utc::now(),
            kind,
        }
    }

    /// The actor this event is about, if any.
    pub fn actor(&self) -> Option<&str> {
        match &self.kind {
            RunEventKind::ActorInitialized { actor }
            | RunEventKind::ActorSkipped { actor, .. }
            | RunEventKind::ActorFired { actor, .. }
            | RunEventKind::ActorFinished { actor, .. }
            | RunEventKind::ProcessingError { actor, .. } => Some(actor),
            RunEventKind::RunStateChanged { .. } | RunEventKind::DeadlockDetected { .. } => None,
        }
    }
}
