//! Notification channel: where reviewers are asked for decisions.
//!
//! Sending is fire-and-forget from the engine's point of view: decisions come
//! back later as inbound action events, never as a return value.

pub mod slack;

pub use slack::{SlackAction, SlackConfig, SlackNotifier, parse_action_payload, post_response};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::NotifyError;
use crate::mail::EmailMessage;
use crate::workflow::state::Draft;

/// Everything a reviewer needs to decide on one draft.
#[derive(Debug, Clone, Copy)]
pub struct DecisionRequest<'a> {
    pub user_id: &'a str,
    pub run_id: Uuid,
    pub draft_index: usize,
    pub total: usize,
    pub draft: &'a Draft,
    /// The message being replied to, when still present in the run.
    pub source: Option<&'a EmailMessage>,
}

#[async_trait]
pub trait DecisionNotifier: Send + Sync {
    /// Ask the user to approve, reject or save a draft.
    async fn request_decision(&self, request: DecisionRequest<'_>) -> Result<(), NotifyError>;

    /// Deliver the closing summary of a finished run.
    async fn notify_summary(&self, user_id: &str, text: &str) -> Result<(), NotifyError>;
}
