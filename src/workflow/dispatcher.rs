//! Resume dispatcher: the single entry point for inbound action events.
//!
//! Matches an event to the user's checkpoint, rejects anything that does not
//! refer to the draft currently awaiting a decision, and hands the rest to
//! `WorkflowEngine::resume`. The engine repeats the reference check under
//! its per-user lock, so a duplicate racing past this pre-check still cannot
//! be applied twice.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::WorkflowError;
use crate::workflow::engine::WorkflowEngine;
use crate::workflow::queue::DraftRef;
use crate::workflow::state::{Decision, Phase, RunResult};

/// Action a reviewer can take on a draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ApproveDraft,
    RejectDraft,
    SaveDraft,
}

impl ActionKind {
    pub fn decision(self) -> Decision {
        match self {
            Self::ApproveDraft => Decision::Approved,
            Self::RejectDraft => Decision::Rejected,
            Self::SaveDraft => Decision::Saved,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ApproveDraft => "approve_draft",
            Self::RejectDraft => "reject_draft",
            Self::SaveDraft => "save_draft",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve_draft" => Ok(Self::ApproveDraft),
            "reject_draft" => Ok(Self::RejectDraft),
            "save_draft" => Ok(Self::SaveDraft),
            other => Err(format!(
                "unknown action '{other}' (expected approve_draft, reject_draft or save_draft)"
            )),
        }
    }
}

/// An inbound decision, from whatever channel delivered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionEvent {
    pub user_id: String,
    pub kind: ActionKind,
    /// Draft the reviewer was looking at.
    pub draft_index: usize,
    /// Run the prompt belonged to; `None` means "the active one".
    #[serde(default)]
    pub run_id: Option<Uuid>,
}

impl ActionEvent {
    pub fn draft_ref(&self) -> DraftRef {
        DraftRef {
            run_id: self.run_id,
            draft_index: self.draft_index,
        }
    }
}

pub struct ResumeDispatcher {
    engine: Arc<WorkflowEngine>,
}

impl ResumeDispatcher {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }

    /// Route `event` to the user's paused run.
    pub async fn dispatch(&self, event: ActionEvent) -> Result<RunResult, WorkflowError> {
        let user_id = event.user_id.as_str();
        let reference = event.draft_ref();

        let state = self
            .engine
            .store()
            .load(user_id)
            .await?
            .ok_or_else(|| WorkflowError::NoActiveRun {
                user_id: user_id.to_string(),
            })?;

        if state.phase != Phase::AwaitingApproval {
            debug!(user_id, phase = %state.phase, action = %event.kind, "Action for a run that is not paused");
            return Err(WorkflowError::NotAwaitingApproval {
                user_id: user_id.to_string(),
                phase: state.phase.to_string(),
            });
        }

        if let Err(e) = state.check_draft_ref(&reference) {
            warn!(
                user_id,
                action = %event.kind,
                draft_index = event.draft_index,
                current = ?state.current_draft_index,
                error = %e,
                "Rejected stale or duplicate action"
            );
            return Err(e);
        }

        self.engine
            .resume(user_id, event.kind.decision(), reference)
            .await
    }
}
