//! Workflow engine: drives a run through its phases and parks it at each
//! approval.
//!
//! All progress happens inside a `start` or `resume` call. Between calls the
//! run exists only as its checkpoint; `resume` rehydrates it and re-enters
//! the state machine at the recorded phase.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{StartPolicy, WorkflowConfig};
use crate::error::{DatabaseError, MailError, WorkflowError};
use crate::llm::Assistant;
use crate::mail::{EmailMessage, MailStore};
use crate::notify::{DecisionNotifier, DecisionRequest};
use crate::store::CheckpointStore;
use crate::workflow::queue::DraftRef;
use crate::workflow::state::{Decision, Draft, Phase, ReplyTarget, RunResult, WorkflowState};

/// External collaborators the engine talks to.
#[derive(Clone)]
pub struct EngineDeps {
    pub store: Arc<dyn CheckpointStore>,
    pub mail: Arc<dyn MailStore>,
    pub assistant: Arc<dyn Assistant>,
    pub notifier: Arc<dyn DecisionNotifier>,
}

/// Inspection view of a non-terminal run.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveRun {
    pub user_id: String,
    pub run_id: Uuid,
    pub phase: Phase,
    pub current_draft_index: Option<usize>,
    pub total_drafts: usize,
    pub awaiting_since: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// Parked on an approval for longer than the configured threshold.
    pub stale: bool,
}

/// A phase that could not complete; the run fails with this reason.
type StepResult = Result<(), String>;

pub struct WorkflowEngine {
    store: Arc<dyn CheckpointStore>,
    mail: Arc<dyn MailStore>,
    assistant: Arc<dyn Assistant>,
    notifier: Arc<dyn DecisionNotifier>,
    config: WorkflowConfig,
    /// One mutex per user; every read-modify-write of a checkpoint holds it.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl WorkflowEngine {
    pub fn new(config: WorkflowConfig, deps: EngineDeps) -> Self {
        Self {
            store: deps.store,
            mail: deps.mail,
            assistant: deps.assistant,
            notifier: deps.notifier,
            config,
            locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    fn lock_for(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(user_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Begin a new run for `user_id` and drive it to its first suspension
    /// point or to completion.
    pub async fn start(&self, user_id: &str) -> Result<RunResult, WorkflowError> {
        let lock = self.lock_for(user_id);
        let _guard = lock.lock().await;

        if let Some(existing) = self.store.load(user_id).await?
            && !existing.phase.is_terminal()
        {
            if self.config.start_policy == StartPolicy::ResumeCurrent
                && let Some(result) = existing.run_result()
            {
                info!(
                    user_id,
                    run_id = %existing.run_id,
                    "Start while paused, returning current run"
                );
                return Ok(result);
            }
            warn!(user_id, run_id = %existing.run_id, phase = %existing.phase, "Start rejected, run already active");
            return Err(WorkflowError::AlreadyRunning {
                user_id: user_id.to_string(),
            });
        }

        let mut state = WorkflowState::new(user_id);
        info!(user_id, run_id = %state.run_id, "Workflow run started");
        self.drive(&mut state).await
    }

    /// Apply `decision` to the draft awaiting one and continue the run.
    ///
    /// Rejections (`NoActiveRun`, `NotAwaitingApproval`, `StaleDecision`,
    /// `StaleRun`, `InvalidDecision`) leave the checkpoint untouched.
    pub async fn resume(
        &self,
        user_id: &str,
        decision: Decision,
        reference: DraftRef,
    ) -> Result<RunResult, WorkflowError> {
        if !decision.is_terminal() {
            return Err(WorkflowError::InvalidDecision(
                "decision must be approve, reject or save".into(),
            ));
        }

        let lock = self.lock_for(user_id);
        let _guard = lock.lock().await;

        let mut state = self
            .store
            .load(user_id)
            .await?
            .ok_or_else(|| WorkflowError::NoActiveRun {
                user_id: user_id.to_string(),
            })?;

        if state.phase != Phase::AwaitingApproval {
            return Err(WorkflowError::NotAwaitingApproval {
                user_id: user_id.to_string(),
                phase: state.phase.to_string(),
            });
        }
        if !state.is_consistent() {
            error!(user_id, run_id = %state.run_id, "Checkpoint violates queue invariants");
            return Err(WorkflowError::Store(DatabaseError::Serialization(format!(
                "checkpoint for {user_id} is inconsistent"
            ))));
        }

        let index = state.check_draft_ref(&reference)?;
        let Some(draft) = state.drafts.get(index).cloned() else {
            return Err(WorkflowError::StaleDecision {
                expected: state.current_draft_index,
                received: index,
            });
        };

        if let Err(e) = self.apply_decision(decision, &draft).await {
            return self
                .fail(
                    &mut state,
                    format!("could not apply {decision} to draft {}: {e}", index + 1),
                )
                .await;
        }

        let next = state.approval_queue().resolve(decision)?;
        state.note(decision_line(decision, &draft, index, state.drafts.len()));
        info!(
            user_id,
            run_id = %state.run_id,
            draft_index = index,
            %decision,
            "Decision applied"
        );

        if next.is_none()
            && let Err(reason) = state.transition(Phase::Finalizing)
        {
            return self.fail(&mut state, reason).await;
        }
        self.drive(&mut state).await
    }

    /// Current checkpoint for `user_id`, if any.
    pub async fn status(&self, user_id: &str) -> Result<Option<WorkflowState>, WorkflowError> {
        Ok(self.store.load(user_id).await?)
    }

    /// Operator cancellation: drop the checkpoint whatever its phase.
    pub async fn cancel(&self, user_id: &str) -> Result<bool, WorkflowError> {
        let lock = self.lock_for(user_id);
        let _guard = lock.lock().await;
        let removed = self.store.clear(user_id).await?;
        if removed {
            info!(user_id, "Workflow checkpoint cleared by operator");
        }
        Ok(removed)
    }

    /// Non-terminal runs with their staleness.
    pub async fn active_runs(&self) -> Result<Vec<ActiveRun>, WorkflowError> {
        let now = Utc::now();
        let runs = self.store.list_active().await?;
        Ok(runs
            .into_iter()
            .map(|s| ActiveRun {
                stale: s.is_stale(self.config.stale_after, now),
                user_id: s.user_id,
                run_id: s.run_id,
                phase: s.phase,
                current_draft_index: s.current_draft_index,
                total_drafts: s.drafts.len(),
                awaiting_since: s.awaiting_since,
                updated_at: s.updated_at,
            })
            .collect())
    }

    // ── State machine ───────────────────────────────────────────────

    async fn drive(&self, state: &mut WorkflowState) -> Result<RunResult, WorkflowError> {
        loop {
            let step = match state.phase {
                Phase::Fetching => self.fetch(state).await,
                Phase::Classifying => self.classify(state).await,
                Phase::Drafting => self.draft_replies(state).await,
                Phase::AwaitingApproval => return self.park(state).await,
                Phase::Finalizing => return self.finalize(state).await,
                Phase::Completed | Phase::Failed => return result_of(state),
            };
            if let Err(reason) = step {
                return self.fail(state, reason).await;
            }
        }
    }

    async fn fetch(&self, state: &mut WorkflowState) -> StepResult {
        let emails = self
            .mail
            .fetch_unread(self.config.fetch_limit, self.config.thread_depth)
            .await
            .map_err(|e| format!("fetching unread mail failed: {e}"))?;

        debug!(user_id = %state.user_id, count = emails.len(), "Fetched messages");
        if emails.is_empty() {
            return state.transition(Phase::Finalizing);
        }

        state.note(format!("📥 Fetched {} message(s).", emails.len()));
        state.emails = emails;
        state.transition(Phase::Classifying)
    }

    async fn classify(&self, state: &mut WorkflowState) -> StepResult {
        let classification = self
            .assistant
            .classify_needs_response(&state.emails)
            .await
            .map_err(|e| format!("classifying messages failed: {e}"))?;

        state.needs_response = subset_in_order(&state.emails, classification.needs_response);
        state.digest = classification.digest;
        state.note(format!(
            "🔍 {} of {} message(s) need a reply.",
            state.needs_response.len(),
            state.emails.len()
        ));

        if state.needs_response.is_empty() {
            state.transition(Phase::Finalizing)
        } else {
            state.transition(Phase::Drafting)
        }
    }

    async fn draft_replies(&self, state: &mut WorkflowState) -> StepResult {
        let targets = state.needs_response.clone();
        for target in &targets {
            let Some(email) = state.email(&target.email_id).cloned() else {
                continue;
            };

            let content = match self.assistant.generate_reply(&email, target).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(email_id = %email.id, error = %e, "Reply generation failed, skipping");
                    state.note(format!("⚠️ Could not draft a reply to \"{}\": {e}", email.subject));
                    continue;
                }
            };

            match self.mail.create_draft(&email, &content).await {
                Ok(draft_id) => {
                    state.drafts.push(Draft::new(&email, target, draft_id, content));
                }
                Err(e) => {
                    warn!(email_id = %email.id, error = %e, "Draft creation failed, skipping");
                    state.note(format!("⚠️ Could not save a draft for \"{}\": {e}", email.subject));
                }
            }
        }

        info!(
            user_id = %state.user_id,
            run_id = %state.run_id,
            drafts = state.drafts.len(),
            "Drafting complete"
        );
        let first = state.approval_queue().begin();
        match first {
            Some(_) => state.transition(Phase::AwaitingApproval),
            None => state.transition(Phase::Finalizing),
        }
    }

    /// Offer the current draft to the reviewer and checkpoint.
    async fn park(&self, state: &mut WorkflowState) -> Result<RunResult, WorkflowError> {
        let Some(index) = state.current_draft_index else {
            return self
                .fail(state, "awaiting approval without a current draft".into())
                .await;
        };
        if index >= state.drafts.len() {
            return self
                .fail(state, format!("draft {index} does not exist"))
                .await;
        }
        state.awaiting_since = Some(Utc::now());

        let delivered = {
            let draft = &state.drafts[index];
            let request = DecisionRequest {
                user_id: &state.user_id,
                run_id: state.run_id,
                draft_index: index,
                total: state.drafts.len(),
                draft,
                source: state.email(&draft.source_email_id),
            };
            self.notifier.request_decision(request).await
        };

        // The run stays resumable through the API even if the prompt was lost.
        if let Err(e) = delivered {
            warn!(user_id = %state.user_id, draft_index = index, error = %e, "Approval request not delivered");
            state.note(format!(
                "⚠️ Approval request for draft {} was not delivered: {e}",
                index + 1
            ));
        }

        self.store.save(state).await?;
        info!(
            user_id = %state.user_id,
            run_id = %state.run_id,
            draft_index = index,
            total = state.drafts.len(),
            "Run paused for approval"
        );
        result_of(state)
    }

    async fn finalize(&self, state: &mut WorkflowState) -> Result<RunResult, WorkflowError> {
        state.append_final_summary();
        if let Err(reason) = state.transition(Phase::Completed) {
            return self.fail(state, reason).await;
        }

        if let Err(e) = self.notifier.notify_summary(&state.user_id, &state.summary).await {
            warn!(user_id = %state.user_id, error = %e, "Final summary not delivered");
            state.note(format!("⚠️ Summary was not delivered: {e}"));
        }

        self.persist_finished(state).await?;
        info!(user_id = %state.user_id, run_id = %state.run_id, "Workflow run completed");
        result_of(state)
    }

    /// Move to `Failed`, persist, and report the failure as a result.
    async fn fail(
        &self,
        state: &mut WorkflowState,
        reason: String,
    ) -> Result<RunResult, WorkflowError> {
        error!(
            user_id = %state.user_id,
            run_id = %state.run_id,
            phase = %state.phase,
            reason = %reason,
            "Workflow run failed"
        );
        state.note(format!("❌ Failed during {}: {reason}", state.phase));
        state.failure = Some(reason);
        if state.transition(Phase::Failed).is_err() {
            state.phase = Phase::Failed;
            state.current_draft_index = None;
            state.awaiting_since = None;
        }

        if let Err(e) = self.notifier.notify_summary(&state.user_id, &state.summary).await {
            warn!(user_id = %state.user_id, error = %e, "Failure summary not delivered");
            state.note(format!("⚠️ Summary was not delivered: {e}"));
        }

        self.persist_finished(state).await?;
        result_of(state)
    }

    async fn persist_finished(&self, state: &WorkflowState) -> Result<(), WorkflowError> {
        if self.config.retain_finished {
            self.store.save(state).await?;
        } else {
            self.store.clear(&state.user_id).await?;
        }
        Ok(())
    }

    async fn apply_decision(&self, decision: Decision, draft: &Draft) -> Result<(), MailError> {
        match decision {
            Decision::Approved => self.mail.send_draft(&draft.draft_id).await,
            Decision::Rejected => self.mail.delete_draft(&draft.draft_id).await,
            Decision::Saved | Decision::Pending => Ok(()),
        }
    }
}

fn result_of(state: &WorkflowState) -> Result<RunResult, WorkflowError> {
    state.run_result().ok_or_else(|| {
        WorkflowError::Store(DatabaseError::Serialization(format!(
            "run {} has no result in phase {}",
            state.run_id, state.phase
        )))
    })
}

/// Keep only targets that name a fetched message, once each, in fetch order.
fn subset_in_order(emails: &[EmailMessage], targets: Vec<ReplyTarget>) -> Vec<ReplyTarget> {
    let mut picked: Vec<Option<ReplyTarget>> = vec![None; emails.len()];
    for target in targets {
        if let Some(position) = emails.iter().position(|e| e.id == target.email_id)
            && picked[position].is_none()
        {
            picked[position] = Some(target);
        }
    }
    picked.into_iter().flatten().collect()
}

fn decision_line(decision: Decision, draft: &Draft, index: usize, total: usize) -> String {
    let (icon, verb) = match decision {
        Decision::Approved => ("✅", "sent"),
        Decision::Rejected => ("❌", "rejected"),
        Decision::Saved => ("💾", "saved as draft"),
        Decision::Pending => ("⏳", "left pending"),
    };
    format!(
        "{icon} Reply {}/{total} to {} ({}) {verb}.",
        index + 1,
        draft.recipient,
        draft.subject
    )
}
