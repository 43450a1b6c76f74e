//! Email message type, quote stripping, and address extraction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An unread message fetched from the mail store.
///
/// Immutable once fetched; drafts refer back to it by `id` only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    /// Mail-store message ID.
    pub id: String,
    /// Mail-store thread ID (replies are filed into the same thread).
    pub thread_id: String,
    /// RFC 5322 Message-ID header, used for reply threading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Sender address.
    pub from: String,
    /// To recipients.
    pub to: Vec<String>,
    pub subject: String,
    /// Body text with quoted history stripped.
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    /// Flagged important by the mail store.
    #[serde(default)]
    pub is_important: bool,
}

impl EmailMessage {
    /// Subject line for a reply: `Re: <subject>`, without stacking prefixes.
    pub fn reply_subject(&self) -> String {
        let subject = self.subject.trim();
        if subject.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("re:")) {
            subject.to_string()
        } else {
            format!("Re: {subject}")
        }
    }

    /// Address a reply is sent from: the first address this message was sent to.
    pub fn reply_from(&self) -> Option<&str> {
        self.to.first().map(String::as_str)
    }
}

/// Body text without quoted history: `>` lines are dropped and everything
/// from an "On ... wrote:" or "Original Message" separator onward is cut.
pub fn strip_quoted_text(body: &str) -> String {
    let mut result = Vec::new();

    for line in body.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with('>') {
            continue;
        }

        if trimmed.starts_with("On ") && trimmed.ends_with("wrote:") {
            break;
        }

        if trimmed.starts_with("---") && trimmed.contains("Original Message") {
            break;
        }

        result.push(line);
    }

    while result.last().is_some_and(|l| l.trim().is_empty()) {
        result.pop();
    }

    result.join("\n")
}

/// Plain addresses from a parsed header, flattening groups.
pub fn extract_addresses(addr: Option<&mail_parser::Address>) -> Vec<String> {
    let Some(addr) = addr else {
        return Vec::new();
    };
    match addr {
        mail_parser::Address::List(addrs) => addrs
            .iter()
            .filter_map(|a| a.address.as_ref().map(|s| s.to_string()))
            .collect(),
        mail_parser::Address::Group(groups) => groups
            .iter()
            .flat_map(|g| {
                g.addresses
                    .iter()
                    .filter_map(|a| a.address.as_ref().map(|s| s.to_string()))
            })
            .collect(),
    }
}

/// Truncate to at most `max` characters, marking the cut with an ellipsis.
pub fn preview(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{}…", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(subject: &str) -> EmailMessage {
        EmailMessage {
            id: "m1".into(),
            thread_id: "t1".into(),
            message_id: Some("<abc@example.com>".into()),
            from: "alice@example.com".into(),
            to: vec!["me@example.com".into()],
            subject: subject.into(),
            body: "Can we meet Tuesday?".into(),
            date: None,
            is_important: false,
        }
    }

    #[test]
    fn quoted_lines_are_dropped() {
        let body = "Tuesday is fine.\n> When works for you?\n>> earlier thread\nSee you then";
        assert_eq!(strip_quoted_text(body), "Tuesday is fine.\nSee you then");
    }

    #[test]
    fn attribution_line_ends_the_body() {
        let body = "Agreed.\n\nOn Tue, Mar 3, 2026 at 9:15 AM Bob <bob@example.com> wrote:\nolder text";
        assert_eq!(strip_quoted_text(body), "Agreed.");
    }

    #[test]
    fn forwarded_separator_ends_the_body() {
        let body = "FYI below\n\n----- Original Message -----\nFrom: someone";
        assert_eq!(strip_quoted_text(body), "FYI below");
    }

    #[test]
    fn unquoted_body_is_unchanged() {
        let body = "Line one\nLine two";
        assert_eq!(strip_quoted_text(body), body);
    }

    #[test]
    fn reply_subject_adds_prefix_once() {
        assert_eq!(message("Lunch").reply_subject(), "Re: Lunch");
        assert_eq!(message("RE: Lunch").reply_subject(), "RE: Lunch");
    }

    #[test]
    fn reply_from_uses_first_recipient() {
        assert_eq!(message("x").reply_from(), Some("me@example.com"));
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        assert_eq!(preview("héllo world", 5), "héllo…");
        assert_eq!(preview("short", 10), "short");
    }

    #[test]
    fn email_message_deserializes_without_optional_fields() {
        let json = r#"{
            "id": "m1",
            "thread_id": "t1",
            "from": "alice@example.com",
            "to": ["bob@example.com"],
            "subject": "Test",
            "body": "Hello"
        }"#;
        let msg: EmailMessage = serde_json::from_str(json).unwrap();
        assert!(msg.message_id.is_none());
        assert!(msg.date.is_none());
        assert!(!msg.is_important);
    }
}
