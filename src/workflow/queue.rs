//! Draft approval queue: strict front-to-back resolution over a run's drafts.
//!
//! The queue has no storage of its own: it is a view over
//! `WorkflowState::drafts` and `WorkflowState::current_draft_index`.
//! Drafts are resolved in order 0, 1, 2, … and never reordered or skipped.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::WorkflowError;
use crate::workflow::state::{Decision, Draft, WorkflowState};

/// What an inbound decision claims to be about.
///
/// The draft index is always required so a replayed decision can be told
/// apart from a decision on the next draft. The run id is optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftRef {
    pub run_id: Option<Uuid>,
    pub draft_index: usize,
}

impl DraftRef {
    /// Draft `draft_index` of whichever run is active.
    pub fn index(draft_index: usize) -> Self {
        Self {
            run_id: None,
            draft_index,
        }
    }

    pub fn at(run_id: Uuid, draft_index: usize) -> Self {
        Self {
            run_id: Some(run_id),
            draft_index,
        }
    }
}

/// Mutable view of the queue inside a `WorkflowState`.
pub struct ApprovalQueue<'a> {
    drafts: &'a mut [Draft],
    current: &'a mut Option<usize>,
}

impl WorkflowState {
    pub fn approval_queue(&mut self) -> ApprovalQueue<'_> {
        ApprovalQueue {
            drafts: &mut self.drafts,
            current: &mut self.current_draft_index,
        }
    }

    /// Validate a reference against this run without mutating anything.
    ///
    /// Returns the index the decision applies to.
    pub fn check_draft_ref(&self, reference: &DraftRef) -> Result<usize, WorkflowError> {
        if let Some(run_id) = reference.run_id
            && run_id != self.run_id
        {
            return Err(WorkflowError::StaleRun {
                expected: self.run_id,
                received: run_id,
            });
        }

        match self.current_draft_index {
            Some(current) if current == reference.draft_index => Ok(current),
            expected => Err(WorkflowError::StaleDecision {
                expected,
                received: reference.draft_index,
            }),
        }
    }
}

impl ApprovalQueue<'_> {
    /// Point the cursor at the first draft. `None` if there is nothing to review.
    pub fn begin(&mut self) -> Option<usize> {
        *self.current = if self.drafts.is_empty() { None } else { Some(0) };
        *self.current
    }

    /// Record `decision` on the current draft and advance.
    ///
    /// Returns the next index awaiting a decision, or `None` when the queue
    /// is exhausted.
    pub fn resolve(&mut self, decision: Decision) -> Result<Option<usize>, WorkflowError> {
        if !decision.is_terminal() {
            return Err(WorkflowError::InvalidDecision(
                "a draft cannot be resolved as pending".into(),
            ));
        }

        let index = self
            .current
            .ok_or_else(|| WorkflowError::InvalidDecision("no draft is awaiting a decision".into()))?;

        let draft = self
            .drafts
            .get_mut(index)
            .ok_or_else(|| WorkflowError::InvalidDecision(format!("draft {index} does not exist")))?;

        if draft.decision.is_terminal() {
            return Err(WorkflowError::StaleDecision {
                expected: None,
                received: index,
            });
        }
        draft.decision = decision;

        let next = index + 1;
        *self.current = (next < self.drafts.len()).then_some(next);
        Ok(*self.current)
    }
}

/// Queue invariant: every draft before the cursor is decided, the cursor
/// draft is pending, and nothing after it has been decided.
///
/// Without a cursor, drafts must be either all pending (not yet offered) or
/// all decided (exhausted).
pub fn is_well_formed(drafts: &[Draft], current: Option<usize>) -> bool {
    match current {
        Some(index) => {
            index < drafts.len()
                && drafts[..index].iter().all(|d| d.decision.is_terminal())
                && drafts[index..].iter().all(|d| !d.decision.is_terminal())
        }
        None => {
            drafts.iter().all(|d| d.decision.is_terminal())
                || drafts.iter().all(|d| !d.decision.is_terminal())
        }
    }
}

/// Per-decision draft counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionCounts {
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
    pub saved: usize,
}

impl DecisionCounts {
    pub fn tally(drafts: &[Draft]) -> Self {
        drafts.iter().fold(Self::default(), |mut acc, d| {
            match d.decision {
                Decision::Pending => acc.pending += 1,
                Decision::Approved => acc.approved += 1,
                Decision::Rejected => acc.rejected += 1,
                Decision::Saved => acc.saved += 1,
            }
            acc
        })
    }
}
