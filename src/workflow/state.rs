//! Workflow state: the single per-user record the engine mutates and checkpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::mail::EmailMessage;
use crate::mail::types::preview;
use crate::workflow::queue::{DecisionCounts, is_well_formed};

/// Macro-step of a workflow run.
///
/// Transitions only move forward through this order; `Failed` is reachable
/// from any phase and is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Fetching,
    Classifying,
    Drafting,
    AwaitingApproval,
    Finalizing,
    Completed,
    Failed,
}

impl Phase {
    /// Position in the forward order.
    fn rank(self) -> u8 {
        match self {
            Self::Fetching => 0,
            Self::Classifying => 1,
            Self::Drafting => 2,
            Self::AwaitingApproval => 3,
            Self::Finalizing => 4,
            Self::Completed => 5,
            Self::Failed => 6,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether moving from `self` to `next` respects the forward-only order.
    pub fn can_transition_to(self, next: Phase) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Self::Failed || next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fetching => "fetching",
            Self::Classifying => "classifying",
            Self::Drafting => "drafting",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fetching" => Ok(Self::Fetching),
            "classifying" => Ok(Self::Classifying),
            "drafting" => Ok(Self::Drafting),
            "awaiting_approval" => Ok(Self::AwaitingApproval),
            "finalizing" => Ok(Self::Finalizing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("Unknown phase: {other}")),
        }
    }
}

/// The human's choice for one draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Waiting for the reviewer.
    Pending,
    /// Sent via the mail store.
    Approved,
    /// Deleted from the mail store.
    Rejected,
    /// Left in the mail store as a draft.
    Saved,
}

impl Decision {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
            Self::Saved => write!(f, "saved"),
        }
    }
}

/// A message the classifier decided needs a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyTarget {
    /// ID of the message in `WorkflowState::emails`.
    pub email_id: String,
    /// "high" / "medium" / "low" as reported by the classifier.
    pub priority: String,
    /// Why a reply is needed.
    pub reason: String,
}

/// A generated reply stored in the mail store, awaiting a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    /// Message this draft replies to (lookup only).
    pub source_email_id: String,
    /// Draft ID in the mail store.
    pub draft_id: String,
    /// Generated reply text.
    pub content: String,
    pub recipient: String,
    pub subject: String,
    pub priority: String,
    pub decision: Decision,
}

impl Draft {
    pub fn new(source: &EmailMessage, target: &ReplyTarget, draft_id: String, content: String) -> Self {
        Self {
            source_email_id: source.id.clone(),
            draft_id,
            content,
            recipient: source.from.clone(),
            subject: source.reply_subject(),
            priority: target.priority.clone(),
            decision: Decision::Pending,
        }
    }
}

/// Everything needed to resume a run from cold state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Owner key; at most one active run per user.
    pub user_id: String,
    /// Identifies this run; a new `start` gets a new one.
    pub run_id: Uuid,
    pub phase: Phase,
    pub emails: Vec<EmailMessage>,
    pub needs_response: Vec<ReplyTarget>,
    pub drafts: Vec<Draft>,
    /// Draft awaiting a decision; only set in `AwaitingApproval`.
    pub current_draft_index: Option<usize>,
    /// Inbox digest produced during classification.
    pub digest: Option<String>,
    /// Accumulated log of completed actions and notes.
    pub summary: String,
    pub failure: Option<String>,
    /// When the current draft was offered to the reviewer.
    pub awaiting_since: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    /// Fresh run in `Fetching`.
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            run_id: Uuid::new_v4(),
            phase: Phase::Fetching,
            emails: Vec::new(),
            needs_response: Vec::new(),
            drafts: Vec::new(),
            current_draft_index: None,
            digest: None,
            summary: String::new(),
            failure: None,
            awaiting_since: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, refusing backward transitions.
    pub fn transition(&mut self, next: Phase) -> Result<(), String> {
        if !self.phase.can_transition_to(next) {
            return Err(format!("illegal phase transition {} -> {}", self.phase, next));
        }
        tracing::debug!(
            user_id = %self.user_id,
            run_id = %self.run_id,
            from = %self.phase,
            to = %next,
            "Phase transition"
        );
        self.phase = next;
        if next != Phase::AwaitingApproval {
            self.current_draft_index = None;
            self.awaiting_since = None;
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Append one line to the summary log.
    pub fn note(&mut self, line: impl AsRef<str>) {
        if !self.summary.is_empty() {
            self.summary.push('\n');
        }
        self.summary.push_str(line.as_ref());
        self.updated_at = Utc::now();
    }

    pub fn email(&self, id: &str) -> Option<&EmailMessage> {
        self.emails.iter().find(|e| e.id == id)
    }

    pub fn counts(&self) -> DecisionCounts {
        DecisionCounts::tally(&self.drafts)
    }

    /// Whether the record satisfies the queue and phase invariants.
    pub fn is_consistent(&self) -> bool {
        if !is_well_formed(&self.drafts, self.current_draft_index) {
            return false;
        }
        match self.phase {
            Phase::AwaitingApproval => self.current_draft_index.is_some(),
            _ => self.current_draft_index.is_none(),
        }
    }

    /// Parked on an approval for longer than `threshold`.
    pub fn is_stale(&self, threshold: std::time::Duration, now: DateTime<Utc>) -> bool {
        match (self.phase, self.awaiting_since) {
            (Phase::AwaitingApproval, Some(since)) => {
                let age = now.signed_duration_since(since);
                age.to_std().is_ok_and(|age| age > threshold)
            }
            _ => false,
        }
    }

    /// Append the closing section: digest and decision tallies.
    pub fn append_final_summary(&mut self) {
        if self.emails.is_empty() {
            if self.summary.is_empty() {
                self.note("No unread messages to process.");
            }
            return;
        }

        if let Some(digest) = self.digest.clone().filter(|d| !d.trim().is_empty()) {
            self.note(format!("📧 Email summary\n{}", digest.trim()));
        }

        let counts = self.counts();
        self.note(format!(
            "📝 {} of {} message(s) needed a reply; {} draft(s) created: {} approved, {} rejected, {} saved.",
            self.needs_response.len(),
            self.emails.len(),
            self.drafts.len(),
            counts.approved,
            counts.rejected,
            counts.saved,
        ));
    }

    /// The result a caller would have seen at this checkpoint, if it is a
    /// suspension point or a terminal state.
    pub fn run_result(&self) -> Option<RunResult> {
        match self.phase {
            Phase::AwaitingApproval => {
                let index = self.current_draft_index?;
                let draft = self.drafts.get(index)?;
                Some(RunResult::Paused {
                    run_id: self.run_id,
                    draft: DraftSummary::new(index, self.drafts.len(), draft),
                })
            }
            Phase::Completed => Some(RunResult::Completed {
                run_id: self.run_id,
                summary: self.summary.clone(),
            }),
            Phase::Failed => Some(RunResult::Failed {
                run_id: self.run_id,
                reason: self
                    .failure
                    .clone()
                    .unwrap_or_else(|| "unknown failure".to_string()),
            }),
            _ => None,
        }
    }
}

/// What the reviewer is being asked about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftSummary {
    pub index: usize,
    pub total: usize,
    pub draft_id: String,
    pub source_email_id: String,
    pub recipient: String,
    pub subject: String,
    pub preview: String,
}

impl DraftSummary {
    pub fn new(index: usize, total: usize, draft: &Draft) -> Self {
        Self {
            index,
            total,
            draft_id: draft.draft_id.clone(),
            source_email_id: draft.source_email_id.clone(),
            recipient: draft.recipient.clone(),
            subject: draft.subject.clone(),
            preview: preview(&draft.content, 280),
        }
    }
}

/// Outcome of a `start` or `resume` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunResult {
    /// Suspended until a decision arrives for `draft`.
    Paused { run_id: Uuid, draft: DraftSummary },
    Completed { run_id: Uuid, summary: String },
    Failed { run_id: Uuid, reason: String },
}

impl RunResult {
    pub fn run_id(&self) -> Uuid {
        match self {
            Self::Paused { run_id, .. }
            | Self::Completed { run_id, .. }
            | Self::Failed { run_id, .. } => *run_id,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Paused { .. } => "paused",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}
