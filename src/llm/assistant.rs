//! Inbox assistant: classification, digest and reply drafting on top of an
//! `LlmProvider`.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::error::LlmError;
use crate::mail::EmailMessage;
use crate::mail::types::preview;
use crate::workflow::state::ReplyTarget;

/// Body characters shown to the classifier per message.
const CLASSIFY_BODY_CHARS: usize = 500;

/// Body characters shown to the digest prompt per message.
const DIGEST_BODY_CHARS: usize = 300;

const CLASSIFY_MAX_TOKENS: u32 = 1000;
const DIGEST_MAX_TOKENS: u32 = 500;
const REPLY_MAX_TOKENS: u32 = 500;

const CLASSIFY_TEMPERATURE: f32 = 0.1;
const REPLY_TEMPERATURE: f32 = 0.4;

/// Which fetched messages need a reply, plus a digest of the batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    /// Subset of the input, in input order, without duplicates.
    pub needs_response: Vec<ReplyTarget>,
    pub digest: Option<String>,
}

/// The language-model collaborator the workflow engine talks to.
#[async_trait]
pub trait Assistant: Send + Sync {
    async fn classify_needs_response(
        &self,
        emails: &[EmailMessage],
    ) -> Result<Classification, LlmError>;

    async fn generate_reply(
        &self,
        email: &EmailMessage,
        target: &ReplyTarget,
    ) -> Result<String, LlmError>;
}

/// `Assistant` backed by a chat completion provider.
pub struct LlmAssistant {
    llm: Arc<dyn LlmProvider>,
}

impl LlmAssistant {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    async fn digest(&self, emails: &[EmailMessage]) -> Result<String, LlmError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(DIGEST_SYSTEM_PROMPT),
            ChatMessage::user(format_for_digest(emails)),
        ])
        .with_max_tokens(DIGEST_MAX_TOKENS);

        let response = self.llm.complete(request).await?;
        Ok(response.content.trim().to_string())
    }
}

#[async_trait]
impl Assistant for LlmAssistant {
    async fn classify_needs_response(
        &self,
        emails: &[EmailMessage],
    ) -> Result<Classification, LlmError> {
        if emails.is_empty() {
            return Ok(Classification::default());
        }

        let request = CompletionRequest::new(vec![
            ChatMessage::system(CLASSIFY_SYSTEM_PROMPT),
            ChatMessage::user(format_for_classification(emails)),
        ])
        .with_temperature(CLASSIFY_TEMPERATURE)
        .with_max_tokens(CLASSIFY_MAX_TOKENS);

        let response = self.llm.complete(request).await?;
        let needs_response = parse_classification(&response.content, emails).map_err(|e| {
            warn!(
                raw_response = %response.content,
                error = %e,
                "Failed to parse classification response"
            );
            e
        })?;

        // The digest is informational; a failed call must not sink the run.
        let digest = match self.digest(emails).await {
            Ok(text) if !text.is_empty() => Some(text),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Digest generation failed");
                None
            }
        };

        info!(
            total = emails.len(),
            needs_response = needs_response.len(),
            "Classified inbox"
        );
        Ok(Classification {
            needs_response,
            digest,
        })
    }

    async fn generate_reply(
        &self,
        email: &EmailMessage,
        target: &ReplyTarget,
    ) -> Result<String, LlmError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(REPLY_SYSTEM_PROMPT),
            ChatMessage::user(format_for_reply(email, target)),
        ])
        .with_temperature(REPLY_TEMPERATURE)
        .with_max_tokens(REPLY_MAX_TOKENS);

        let response = self.llm.complete(request).await?;
        let content = response.content.trim();
        if content.is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.llm.model_name().to_string(),
                reason: "empty reply draft".into(),
            });
        }

        debug!(email_id = %email.id, chars = content.len(), "Reply drafted");
        Ok(content.to_string())
    }
}

// ── Prompts ─────────────────────────────────────────────────────────

const DIGEST_SYSTEM_PROMPT: &str = "\
You are an email assistant. Write a concise, professional high-level summary \
of the unread emails you are given. Focus on key themes and topics, urgent or \
important emails, action items required, and senders who need responses. \
Plain text only, no preamble.";

const CLASSIFY_SYSTEM_PROMPT: &str = r#"You decide which emails need a reply from the mailbox owner.

Consider:
- Is this a personal email that expects a response?
- Is it from someone important (manager, client, colleague)?
- Does it ask a question or require action?
- Is it spam, a newsletter, a notification or promotional content? Never reply to those.

Respond with ONLY a JSON object (no markdown, no explanation):
{"emails_to_respond": [{"email_id": "<ID from the input>", "priority": "high|medium|low", "reason": "<brief reason>"}]}

Use an empty list when nothing needs a reply. Only use IDs that appear in the input."#;

const REPLY_SYSTEM_PROMPT: &str = "\
You are a professional email assistant drafting a reply on behalf of the \
mailbox owner. Be courteous, address the key points of the original email, \
keep it concise but complete, match its tone, and include a clear call to \
action if one is needed. Output only the reply body: no subject line, no \
placeholders, no commentary.";

fn format_for_classification(emails: &[EmailMessage]) -> String {
    let mut out = String::from("Emails:\n");
    for email in emails {
        out.push_str(&format!(
            "ID: {}\nFrom: {}\nSubject: {}\nDate: {}\nImportant: {}\nBody: {}\n---\n",
            email.id,
            email.from,
            email.subject,
            format_date(email),
            email.is_important,
            preview(&email.body, CLASSIFY_BODY_CHARS),
        ));
    }
    out
}

fn format_for_digest(emails: &[EmailMessage]) -> String {
    let mut out = String::from("Unread emails:\n");
    for (i, email) in emails.iter().enumerate() {
        out.push_str(&format!(
            "{}. From: {}\n   Subject: {}\n   Date: {}\n   Important: {}\n   Body: {}\n\n",
            i + 1,
            email.from,
            email.subject,
            format_date(email),
            email.is_important,
            preview(&email.body, DIGEST_BODY_CHARS),
        ));
    }
    out
}

fn format_for_reply(email: &EmailMessage, target: &ReplyTarget) -> String {
    format!(
        "Original email:\nFrom: {}\nSubject: {}\nBody:\n{}\n\nPriority: {}\nWhy a reply is needed: {}\n\nWrite the reply:",
        email.from, email.subject, email.body, target.priority, target.reason,
    )
}

fn format_date(email: &EmailMessage) -> String {
    email
        .date
        .map(|d| d.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "unknown".into())
}

// ── Response parsing ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawClassification {
    #[serde(default)]
    emails_to_respond: Vec<RawTarget>,
}

#[derive(Debug, Deserialize)]
struct RawTarget {
    email_id: String,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

/// Parse the classifier's JSON into targets drawn from `emails`.
///
/// Unknown IDs are dropped, duplicates collapsed, and the result follows the
/// order of `emails` rather than the model's order.
fn parse_classification(
    response: &str,
    emails: &[EmailMessage],
) -> Result<Vec<ReplyTarget>, LlmError> {
    let json_str = extract_json_object(response);
    let raw: RawClassification = serde_json::from_str(&json_str)?;

    let mut seen = HashSet::new();
    let mut chosen: Vec<(usize, ReplyTarget)> = Vec::new();
    for item in raw.emails_to_respond {
        let email_id = item.email_id.trim();
        let Some(position) = emails.iter().position(|e| e.id == email_id) else {
            debug!(email_id, "Classifier returned an unknown email id");
            continue;
        };
        if !seen.insert(position) {
            continue;
        }
        chosen.push((
            position,
            ReplyTarget {
                email_id: email_id.to_string(),
                priority: normalize_priority(item.priority.as_deref()),
                reason: item.reason.unwrap_or_default(),
            },
        ));
    }

    chosen.sort_by_key(|(position, _)| *position);
    Ok(chosen.into_iter().map(|(_, target)| target).collect())
}

fn normalize_priority(raw: Option<&str>) -> String {
    match raw.map(|p| p.trim().to_ascii_lowercase()).as_deref() {
        Some("high") => "high".into(),
        Some("low") => "low".into(),
        _ => "medium".into(),
    }
}

/// Extract a JSON object from LLM output that may be wrapped in a code block.
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::llm::provider::CompletionResponse;

    fn email(id: &str) -> EmailMessage {
        EmailMessage {
            id: id.into(),
            thread_id: format!("t-{id}"),
            message_id: None,
            from: "alice@example.com".into(),
            to: vec!["me@example.com".into()],
            subject: format!("Subject {id}"),
            body: "Can we meet?".into(),
            date: None,
            is_important: false,
        }
    }

    /// Returns scripted responses in order and records every request.
    struct ScriptedLlm {
        responses: Mutex<Vec<Result<String, ()>>>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<Result<&str, ()>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(
                    responses
                        .into_iter()
                        .rev()
                        .map(|r| r.map(str::to_string))
                        .collect(),
                ),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.requests.lock().unwrap().push(request);
            let next = self.responses.lock().unwrap().pop().unwrap_or(Err(()));
            match next {
                Ok(content) => Ok(CompletionResponse {
                    content,
                    input_tokens: 10,
                    output_tokens: 5,
                }),
                Err(()) => Err(LlmError::RequestFailed {
                    provider: "scripted".into(),
                    reason: "boom".into(),
                }),
            }
        }
    }

    #[test]
    fn classification_keeps_input_order_and_drops_unknowns() {
        let emails = vec![email("a"), email("b"), email("c")];
        let response = r#"{"emails_to_respond": [
            {"email_id": "c", "priority": "High", "reason": "question"},
            {"email_id": "zzz", "priority": "low", "reason": "hallucinated"},
            {"email_id": "a", "priority": "low", "reason": "invite"},
            {"email_id": "c", "priority": "low", "reason": "duplicate"}
        ]}"#;

        let targets = parse_classification(response, &emails).unwrap();
        let ids: Vec<&str> = targets.iter().map(|t| t.email_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(targets[1].priority, "high");
        assert_eq!(targets[1].reason, "question");
    }

    #[test]
    fn classification_accepts_markdown_wrapped_json() {
        let emails = vec![email("a")];
        let response = "Here you go:\n```json\n{\"emails_to_respond\": [{\"email_id\": \"a\"}]}\n```";
        let targets = parse_classification(response, &emails).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].priority, "medium");
    }

    #[test]
    fn classification_rejects_garbage() {
        assert!(parse_classification("no idea", &[email("a")]).is_err());
    }

    #[test]
    fn extract_json_from_surrounding_text() {
        assert_eq!(
            extract_json_object("Sure! {\"a\": 1} hope that helps"),
            "{\"a\": 1}"
        );
    }

    #[tokio::test]
    async fn classify_survives_digest_failure() {
        let llm = ScriptedLlm::new(vec![
            Ok(r#"{"emails_to_respond": [{"email_id": "a", "priority": "high", "reason": "q"}]}"#),
            Err(()),
        ]);
        let assistant = LlmAssistant::new(llm.clone());

        let result = assistant
            .classify_needs_response(&[email("a"), email("b")])
            .await
            .unwrap();
        assert_eq!(result.needs_response.len(), 1);
        assert!(result.digest.is_none());
        assert_eq!(llm.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn classify_empty_inbox_makes_no_calls() {
        let llm = ScriptedLlm::new(vec![]);
        let assistant = LlmAssistant::new(llm.clone());
        let result = assistant.classify_needs_response(&[]).await.unwrap();
        assert_eq!(result, Classification::default());
        assert!(llm.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reply_prompt_carries_priority_and_reason() {
        let llm = ScriptedLlm::new(vec![Ok("  Tuesday works for me.  ")]);
        let assistant = LlmAssistant::new(llm.clone());
        let target = ReplyTarget {
            email_id: "a".into(),
            priority: "high".into(),
            reason: "meeting request".into(),
        };

        let reply = assistant.generate_reply(&email("a"), &target).await.unwrap();
        assert_eq!(reply, "Tuesday works for me.");

        let requests = llm.requests.lock().unwrap();
        let prompt = &requests[0].messages[1].content;
        assert!(prompt.contains("Priority: high"));
        assert!(prompt.contains("meeting request"));
    }

    #[tokio::test]
    async fn empty_reply_is_an_error() {
        let llm = ScriptedLlm::new(vec![Ok("   ")]);
        let assistant = LlmAssistant::new(llm);
        let target = ReplyTarget {
            email_id: "a".into(),
            priority: "low".into(),
            reason: String::new(),
        };
        assert!(assistant.generate_reply(&email("a"), &target).await.is_err());
    }
}
