//! Gmail REST mail store.
//!
//! Uses a pre-issued OAuth access token; token acquisition and refresh
//! happen outside this crate. Messages are fetched in `raw` format and
//! parsed locally with mail-parser; reply drafts are built with lettre.

use std::collections::HashSet;

use async_trait::async_trait;
use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use chrono::{DateTime, Utc};
use lettre::Message;
use lettre::message::Mailbox;
use mail_parser::MessageParser;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::MailStore;
use super::types::{EmailMessage, extract_addresses, strip_quoted_text};
use crate::config::require_env;
use crate::error::{ConfigError, MailError};

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

/// Query for the unread primary inbox.
const UNREAD_QUERY: &str = "is:unread category:primary";

/// Gmail emits URL-safe base64 with or without padding.
const GMAIL_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Gmail connection settings.
#[derive(Debug, Clone)]
pub struct GmailConfig {
    pub access_token: SecretString,
    /// Mailbox owner; `me` means the token's account.
    pub user: String,
    pub api_base: String,
}

impl GmailConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let access_token = SecretString::from(require_env("GMAIL_ACCESS_TOKEN")?);
        let user = std::env::var("GMAIL_USER").unwrap_or_else(|_| "me".to_string());
        let api_base =
            std::env::var("GMAIL_API_BASE").unwrap_or_else(|_| GMAIL_API_BASE.to_string());
        Ok(Self {
            access_token,
            user,
            api_base,
        })
    }
}

/// Mail store backed by the Gmail REST API.
pub struct GmailMailStore {
    config: GmailConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
    #[serde(rename = "threadId")]
    thread_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct ThreadResource {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    id: String,
    #[serde(rename = "threadId")]
    thread_id: String,
    #[serde(rename = "labelIds", default)]
    label_ids: Vec<String>,
    raw: String,
}

#[derive(Debug, Deserialize)]
struct DraftResource {
    id: String,
}

impl GmailMailStore {
    pub fn new(config: GmailConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/users/{}/{path}", self.config.api_base, self.config.user)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, MailError> {
        let resp = self
            .client
            .get(self.url(path))
            .bearer_auth(self.config.access_token.expose_secret())
            .query(query)
            .send()
            .await
            .map_err(|e| request_failed(operation, e))?;
        read_json(operation, resp).await
    }

    async fn list_unread(&self, limit: usize) -> Result<Vec<MessageRef>, MailError> {
        let list: MessageList = self
            .get_json(
                "list_unread",
                "messages",
                &[
                    ("q", UNREAD_QUERY.to_string()),
                    ("maxResults", limit.to_string()),
                ],
            )
            .await?;
        Ok(list.messages)
    }

    /// IDs of the last `depth` messages in a thread, oldest first.
    async fn recent_in_thread(&self, thread_id: &str, depth: usize) -> Result<Vec<String>, MailError> {
        let thread: ThreadResource = self
            .get_json(
                "get_thread",
                &format!("threads/{thread_id}"),
                &[("format", "minimal".to_string())],
            )
            .await?;
        let skip = thread.messages.len().saturating_sub(depth);
        Ok(thread.messages.into_iter().skip(skip).map(|m| m.id).collect())
    }

    async fn get_message(&self, id: &str) -> Result<EmailMessage, MailError> {
        let raw: RawMessage = self
            .get_json(
                "get_message",
                &format!("messages/{id}"),
                &[("format", "raw".to_string())],
            )
            .await?;
        parse_raw_message(&raw)
    }
}

#[async_trait]
impl MailStore for GmailMailStore {
    async fn fetch_unread(
        &self,
        limit: usize,
        thread_depth: usize,
    ) -> Result<Vec<EmailMessage>, MailError> {
        let unread = self.list_unread(limit).await?;
        debug!(count = unread.len(), "Listed unread messages");

        let mut ids = Vec::new();
        for message in &unread {
            if thread_depth == 0 {
                ids.push(message.id.clone());
                continue;
            }
            ids.extend(self.recent_in_thread(&message.thread_id, thread_depth).await?);
        }

        let mut seen = HashSet::new();
        let mut emails = Vec::new();
        for id in ids {
            if !seen.insert(id.clone()) {
                continue;
            }
            emails.push(self.get_message(&id).await?);
        }

        info!(
            unread = unread.len(),
            fetched = emails.len(),
            "Fetched unread messages with thread context"
        );
        Ok(emails)
    }

    async fn create_draft(&self, source: &EmailMessage, content: &str) -> Result<String, MailError> {
        let raw = build_reply_raw(source, content)?;
        let body = serde_json::json!({
            "message": {
                "raw": raw,
                "threadId": source.thread_id,
            }
        });

        let resp = self
            .client
            .post(self.url("drafts"))
            .bearer_auth(self.config.access_token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| request_failed("create_draft", e))?;
        let draft: DraftResource = read_json("create_draft", resp).await?;

        info!(draft_id = %draft.id, source_id = %source.id, "Reply draft created");
        Ok(draft.id)
    }

    async fn send_draft(&self, draft_id: &str) -> Result<(), MailError> {
        let resp = self
            .client
            .post(self.url("drafts/send"))
            .bearer_auth(self.config.access_token.expose_secret())
            .json(&serde_json::json!({ "id": draft_id }))
            .send()
            .await
            .map_err(|e| request_failed("send_draft", e))?;
        check_status("send_draft", resp).await?;

        info!(draft_id, "Draft sent");
        Ok(())
    }

    async fn delete_draft(&self, draft_id: &str) -> Result<(), MailError> {
        let resp = self
            .client
            .delete(self.url(&format!("drafts/{draft_id}")))
            .bearer_auth(self.config.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| request_failed("delete_draft", e))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            warn!(draft_id, "Draft already gone");
            return Ok(());
        }
        check_status("delete_draft", resp).await?;

        info!(draft_id, "Draft deleted");
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn request_failed(operation: &str, e: reqwest::Error) -> MailError {
    MailError::RequestFailed {
        operation: operation.to_string(),
        reason: e.to_string(),
    }
}

async fn check_status(operation: &str, resp: reqwest::Response) -> Result<reqwest::Response, MailError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(MailError::Rejected {
        operation: operation.to_string(),
        status: status.as_u16(),
        body,
    })
}

async fn read_json<T: serde::de::DeserializeOwned>(
    operation: &str,
    resp: reqwest::Response,
) -> Result<T, MailError> {
    check_status(operation, resp)
        .await?
        .json()
        .await
        .map_err(|e| request_failed(operation, e))
}

/// Decode and parse a Gmail `raw` message resource.
fn parse_raw_message(raw: &RawMessage) -> Result<EmailMessage, MailError> {
    let bytes = GMAIL_BASE64
        .decode(raw.raw.trim())
        .map_err(|e| MailError::Parse {
            id: raw.id.clone(),
            reason: format!("base64: {e}"),
        })?;

    let parsed = MessageParser::default()
        .parse(&bytes)
        .ok_or_else(|| MailError::Parse {
            id: raw.id.clone(),
            reason: "not an RFC 5322 message".into(),
        })?;

    let from = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".into());

    Ok(EmailMessage {
        id: raw.id.clone(),
        thread_id: raw.thread_id.clone(),
        message_id: parsed.message_id().map(|s| s.to_string()),
        from,
        to: extract_addresses(parsed.to()),
        subject: parsed.subject().unwrap_or("(no subject)").to_string(),
        body: strip_quoted_text(&extract_text(&parsed)),
        date: parsed.date().and_then(to_utc),
        is_important: raw.label_ids.iter().any(|l| l == "IMPORTANT"),
    })
}

fn to_utc(d: &mail_parser::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(d.to_timestamp(), 0)
}

/// Extract readable text from a parsed email.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    "(no readable content)".to_string()
}

fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Build a base64url-encoded RFC 5322 reply to `source`.
fn build_reply_raw(source: &EmailMessage, content: &str) -> Result<String, MailError> {
    let from = source
        .reply_from()
        .ok_or_else(|| MailError::Build(format!("message {} has no recipient to reply as", source.id)))?;

    let mut builder = Message::builder()
        .from(
            from.parse::<Mailbox>()
                .map_err(|e| MailError::Build(format!("Invalid from address: {e}")))?,
        )
        .to(source
            .from
            .parse::<Mailbox>()
            .map_err(|e| MailError::Build(format!("Invalid to address: {e}")))?)
        .subject(source.reply_subject());

    if let Some(ref message_id) = source.message_id {
        let id = if message_id.starts_with('<') {
            message_id.clone()
        } else {
            format!("<{message_id}>")
        };
        builder = builder.in_reply_to(id.clone()).references(id);
    }

    let message = builder
        .body(content.to_string())
        .map_err(|e| MailError::Build(format!("Failed to build email: {e}")))?;

    Ok(GMAIL_BASE64.encode(message.formatted()))
}
