//! Scripted collaborators shared by the integration suites.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use inbox_assist::config::WorkflowConfig;
use inbox_assist::error::{LlmError, MailError, NotifyError};
use inbox_assist::llm::{Assistant, Classification};
use inbox_assist::mail::{EmailMessage, MailStore};
use inbox_assist::notify::{DecisionNotifier, DecisionRequest};
use inbox_assist::store::{CheckpointStore, InMemoryCheckpointStore};
use inbox_assist::workflow::{EngineDeps, ReplyTarget, WorkflowEngine};

// ── Scripted collaborators ──────────────────────────────────────────────

#[derive(Default)]
pub struct ScriptedMail {
    pub inbox: Vec<EmailMessage>,
    pub fail_fetch: bool,
    pub fail_send: bool,
    pub fail_draft_for: Option<String>,
    pub sent: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl MailStore for ScriptedMail {
    async fn fetch_unread(
        &self,
        limit: usize,
        _thread_depth: usize,
    ) -> Result<Vec<EmailMessage>, MailError> {
        if self.fail_fetch {
            return Err(MailError::RequestFailed {
                operation: "list_unread".into(),
                reason: "connection refused".into(),
            });
        }
        Ok(self.inbox.iter().take(limit).cloned().collect())
    }

    async fn create_draft(&self, source: &EmailMessage, _content: &str) -> Result<String, MailError> {
        if self.fail_draft_for.as_deref() == Some(source.id.as_str()) {
            return Err(MailError::Rejected {
                operation: "create_draft".into(),
                status: 500,
                body: "backend error".into(),
            });
        }
        Ok(format!("draft-{}", source.id))
    }

    async fn send_draft(&self, draft_id: &str) -> Result<(), MailError> {
        if self.fail_send {
            return Err(MailError::RequestFailed {
                operation: "send_draft".into(),
                reason: "timeout".into(),
            });
        }
        self.sent.lock().unwrap().push(draft_id.to_string());
        Ok(())
    }

    async fn delete_draft(&self, draft_id: &str) -> Result<(), MailError> {
        self.deleted.lock().unwrap().push(draft_id.to_string());
        Ok(())
    }
}

/// Picks the configured ids and writes a canned reply.
pub struct ScriptedAssistant {
    pub reply_to: Vec<String>,
    pub fail_classify: bool,
}

#[async_trait]
impl Assistant for ScriptedAssistant {
    async fn classify_needs_response(
        &self,
        emails: &[EmailMessage],
    ) -> Result<Classification, LlmError> {
        if self.fail_classify {
            return Err(LlmError::RequestFailed {
                provider: "scripted".into(),
                reason: "overloaded".into(),
            });
        }
        Ok(Classification {
            needs_response: emails
                .iter()
                .filter(|e| self.reply_to.contains(&e.id))
                .map(|e| ReplyTarget {
                    email_id: e.id.clone(),
                    priority: "high".into(),
                    reason: "asks a question".into(),
                })
                .collect(),
            digest: Some(format!("{} messages about lunch.", emails.len())),
        })
    }

    async fn generate_reply(
        &self,
        email: &EmailMessage,
        _target: &ReplyTarget,
    ) -> Result<String, LlmError> {
        Ok(format!("Thanks for \"{}\"!", email.subject))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub fail: bool,
    pub fail_summary: bool,
    pub requests: Mutex<Vec<(String, Uuid, usize)>>,
    pub summaries: Mutex<Vec<String>>,
}

#[async_trait]
impl DecisionNotifier for RecordingNotifier {
    async fn request_decision(&self, request: DecisionRequest<'_>) -> Result<(), NotifyError> {
        if self.fail {
            return Err(NotifyError::Api {
                channel: "test".into(),
                error: "channel_not_found".into(),
            });
        }
        self.requests.lock().unwrap().push((
            request.user_id.to_string(),
            request.run_id,
            request.draft_index,
        ));
        Ok(())
    }

    async fn notify_summary(&self, _user_id: &str, text: &str) -> Result<(), NotifyError> {
        if self.fail_summary {
            return Err(NotifyError::SendFailed {
                channel: "test".into(),
                reason: "connection reset".into(),
            });
        }
        self.summaries.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

pub fn email(id: &str) -> EmailMessage {
    EmailMessage {
        id: id.into(),
        thread_id: format!("thread-{id}"),
        message_id: Some(format!("{id}@example.com")),
        from: format!("{id}@sender.example.com"),
        to: vec!["me@example.com".into()],
        subject: format!("Lunch {id}"),
        body: "Are you free on Tuesday?".into(),
        date: None,
        is_important: false,
    }
}

/// Scripted assistant wanting replies to `reply_to`.
pub fn assistant(reply_to: &[&str]) -> ScriptedAssistant {
    ScriptedAssistant {
        reply_to: reply_to.iter().map(|s| s.to_string()).collect(),
        fail_classify: false,
    }
}

/// Engine over an in-memory store with an inbox of `ids`.
pub fn engine_with_inbox(
    ids: &[&str],
    reply_to: &[&str],
) -> (Arc<WorkflowEngine>, Arc<ScriptedMail>, Arc<RecordingNotifier>) {
    let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
    let mail = Arc::new(ScriptedMail {
        inbox: ids.iter().map(|id| email(id)).collect(),
        ..Default::default()
    });
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = Arc::new(WorkflowEngine::new(
        WorkflowConfig::default(),
        EngineDeps {
            store,
            mail: mail.clone(),
            assistant: Arc::new(assistant(reply_to)),
            notifier: notifier.clone(),
        },
    ));
    (engine, mail, notifier)
}
