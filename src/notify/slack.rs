//! Slack notifier: Block Kit approval prompts and interactive payloads.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};
use uuid::Uuid;

use super::{DecisionNotifier, DecisionRequest};
use crate::config::require_env;
use crate::error::{ConfigError, NotifyError};
use crate::mail::types::preview;
use crate::workflow::dispatcher::{ActionEvent, ActionKind};

const CHANNEL: &str = "slack";

/// Section blocks are capped at 3000 characters.
const SECTION_TEXT_LIMIT: usize = 2800;

#[derive(Debug, Clone)]
pub struct SlackConfig {
    pub bot_token: SecretString,
    pub api_base: String,
}

impl SlackConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bot_token: SecretString::from(require_env("SLACK_BOT_TOKEN")?),
            api_base: std::env::var("SLACK_API_BASE")
                .unwrap_or_else(|_| "https://slack.com/api".to_string()),
        })
    }
}

/// Posts approval prompts and summaries as direct messages to the user.
pub struct SlackNotifier {
    config: SlackConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

impl SlackNotifier {
    pub fn new(config: SlackConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/{method}", self.config.api_base)
    }

    async fn post_message(&self, body: Value) -> Result<(), NotifyError> {
        let resp = self
            .client
            .post(self.api_url("chat.postMessage"))
            .bearer_auth(self.config.bot_token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::SendFailed {
                channel: CHANNEL.into(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(NotifyError::SendFailed {
                channel: CHANNEL.into(),
                reason: format!("HTTP {}", resp.status()),
            });
        }

        // Slack reports API errors in the body of a 200.
        let parsed: SlackResponse = resp.json().await.map_err(|e| NotifyError::SendFailed {
            channel: CHANNEL.into(),
            reason: format!("unreadable response: {e}"),
        })?;
        if !parsed.ok {
            return Err(NotifyError::Api {
                channel: CHANNEL.into(),
                error: parsed.error.unwrap_or_else(|| "unknown_error".into()),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DecisionNotifier for SlackNotifier {
    async fn request_decision(&self, request: DecisionRequest<'_>) -> Result<(), NotifyError> {
        let (text, blocks) = approval_message(&request);
        self.post_message(json!({
            "channel": request.user_id,
            "text": text,
            "blocks": blocks,
        }))
        .await?;

        info!(
            user_id = request.user_id,
            run_id = %request.run_id,
            draft_index = request.draft_index,
            "Approval request posted"
        );
        Ok(())
    }

    async fn notify_summary(&self, user_id: &str, text: &str) -> Result<(), NotifyError> {
        self.post_message(json!({
            "channel": user_id,
            "text": preview(text, SECTION_TEXT_LIMIT),
        }))
        .await?;
        debug!(user_id, "Summary posted");
        Ok(())
    }
}

/// Button value carrying the run and draft a click refers to.
pub fn action_value(run_id: Uuid, draft_index: usize) -> String {
    format!("{run_id}:{draft_index}")
}

/// Fallback text plus Block Kit blocks for one approval prompt.
fn approval_message(request: &DecisionRequest<'_>) -> (String, Value) {
    let draft = request.draft;
    let mut text = format!(
        "*Email draft for approval* ({}/{})\n\n*To:* {}\n*Subject:* {}\n*Priority:* {}\n",
        request.draft_index + 1,
        request.total,
        draft.recipient,
        draft.subject,
        draft.priority,
    );
    if let Some(source) = request.source {
        text.push_str(&format!(
            "*Replying to:* {}\n> {}\n",
            source.from,
            preview(&source.body, 200).replace('\n', "\n> "),
        ));
    }
    text.push_str(&format!("\n*Draft:*\n{}", draft.content));
    let text = preview(&text, SECTION_TEXT_LIMIT);

    let value = action_value(request.run_id, request.draft_index);
    let button = |label: &str, kind: ActionKind, style: Option<&str>| {
        let mut b = json!({
            "type": "button",
            "text": { "type": "plain_text", "text": label, "emoji": true },
            "value": value,
            "action_id": kind.as_str(),
        });
        if let Some(style) = style {
            b["style"] = json!(style);
        }
        b
    };

    let blocks = json!([
        { "type": "section", "text": { "type": "mrkdwn", "text": text } },
        {
            "type": "actions",
            "block_id": format!("draft_approval_{}_{}", request.run_id, request.draft_index),
            "elements": [
                button("✅ Approve & Send", ActionKind::ApproveDraft, Some("primary")),
                button("❌ Reject", ActionKind::RejectDraft, Some("danger")),
                button("💾 Save Draft", ActionKind::SaveDraft, None),
            ],
        },
        {
            "type": "context",
            "elements": [{ "type": "mrkdwn", "text": format!("*Draft ID:* {}", draft.draft_id) }],
        },
    ]);

    (text, blocks)
}

// ── Interactive payloads ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct InteractivePayload {
    #[serde(rename = "type")]
    kind: String,
    user: PayloadUser,
    #[serde(default)]
    response_url: Option<String>,
    #[serde(default)]
    actions: Vec<PayloadAction>,
}

#[derive(Debug, Deserialize)]
struct PayloadUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PayloadAction {
    action_id: String,
    #[serde(default)]
    value: Option<String>,
}

/// A button click decoded from a Slack interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlackAction {
    pub event: ActionEvent,
    /// Where Slack accepts a follow-up message for this click.
    pub response_url: Option<String>,
}

/// Turn the JSON `payload` form field of a Slack interaction into an event.
///
/// Every button we post carries `<run_id>:<draft_index>`, so a click without
/// that value is rejected rather than applied to whatever draft is current.
pub fn parse_action_payload(payload: &str) -> Result<SlackAction, NotifyError> {
    let parsed: InteractivePayload = serde_json::from_str(payload)
        .map_err(|e| NotifyError::InvalidPayload(format!("malformed JSON: {e}")))?;

    if parsed.kind != "block_actions" {
        return Err(NotifyError::InvalidPayload(format!(
            "unsupported interaction type '{}'",
            parsed.kind
        )));
    }

    let action = parsed
        .actions
        .first()
        .ok_or_else(|| NotifyError::InvalidPayload("no actions in payload".into()))?;

    let kind: ActionKind = action
        .action_id
        .parse::<ActionKind>()
        .map_err(NotifyError::InvalidPayload)?;

    let value = action.value.as_deref().ok_or_else(|| {
        NotifyError::InvalidPayload(format!(
            "button '{}' has no draft reference",
            action.action_id
        ))
    })?;
    let (run_id, draft_index) = parse_action_value(value)?;

    Ok(SlackAction {
        event: ActionEvent {
            user_id: parsed.user.id,
            kind,
            draft_index,
            run_id: Some(run_id),
        },
        response_url: parsed.response_url,
    })
}

fn parse_action_value(value: &str) -> Result<(Uuid, usize), NotifyError> {
    let Some((run, index)) = value.split_once(':') else {
        return Err(NotifyError::InvalidPayload(format!(
            "button value '{value}' is not <run_id>:<draft_index>"
        )));
    };
    let run_id = run
        .parse::<Uuid>()
        .map_err(|e| NotifyError::InvalidPayload(format!("bad run id: {e}")))?;
    let draft_index = index
        .parse::<usize>()
        .map_err(|e| NotifyError::InvalidPayload(format!("bad draft index: {e}")))?;
    Ok((run_id, draft_index))
}

/// Post the outcome of a click back to its `response_url`.
///
/// Slack ignores the body of the interaction response itself, so this is the
/// only way the reviewer sees what happened to their click.
pub async fn post_response(
    client: &reqwest::Client,
    response_url: &str,
    text: &str,
) -> Result<(), NotifyError> {
    let resp = client
        .post(response_url)
        .json(&json!({
            "text": preview(text, SECTION_TEXT_LIMIT),
            "replace_original": true,
        }))
        .send()
        .await
        .map_err(|e| NotifyError::SendFailed {
            channel: CHANNEL.into(),
            reason: e.to_string(),
        })?;

    if !resp.status().is_success() {
        return Err(NotifyError::SendFailed {
            channel: CHANNEL.into(),
            reason: format!("response_url returned HTTP {}", resp.status()),
        });
    }
    Ok(())
}
