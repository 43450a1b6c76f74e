//! Mail store collaborator: fetch unread messages and manage reply drafts.

pub mod gmail;
pub mod types;

pub use gmail::{GmailConfig, GmailMailStore};
pub use types::{EmailMessage, strip_quoted_text};

use async_trait::async_trait;

use crate::error::MailError;

/// Backend-agnostic mail store.
#[async_trait]
pub trait MailStore: Send + Sync {
    /// Recent unread messages, with up to `thread_depth` recent messages from
    /// each unread message's thread, deduplicated and in first-seen order.
    async fn fetch_unread(
        &self,
        limit: usize,
        thread_depth: usize,
    ) -> Result<Vec<EmailMessage>, MailError>;

    /// Store `content` as a reply draft to `source`. Returns the draft ID.
    async fn create_draft(&self, source: &EmailMessage, content: &str)
    -> Result<String, MailError>;

    async fn send_draft(&self, draft_id: &str) -> Result<(), MailError>;

    async fn delete_draft(&self, draft_id: &str) -> Result<(), MailError>;
}
