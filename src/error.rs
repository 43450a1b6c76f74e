//! Error types for Inbox Assist.

use std::time::Duration;

use uuid::Uuid;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Checkpoint persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Mail store errors.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Mail request {operation} failed: {reason}")]
    RequestFailed { operation: String, reason: String },

    #[error("Mail store rejected {operation} with status {status}: {body}")]
    Rejected {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("Failed to parse message {id}: {reason}")]
    Parse { id: String, reason: String },

    #[error("Failed to build draft: {0}")]
    Build(String),
}

/// Notification channel errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Failed to send notification on {channel}: {reason}")]
    SendFailed { channel: String, reason: String },

    #[error("Notification channel {channel} returned error: {error}")]
    Api { channel: String, error: String },

    #[error("Invalid interactive payload: {0}")]
    InvalidPayload(String),
}

/// Errors surfaced to callers of the workflow engine and dispatcher.
///
/// None of these mutate the persisted checkpoint except `Store`, which means
/// the checkpoint could not be written at all.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("A workflow run is already active for user {user_id}")]
    AlreadyRunning { user_id: String },

    #[error("No active workflow run for user {user_id}")]
    NoActiveRun { user_id: String },

    #[error("Workflow for user {user_id} is {phase}, not awaiting approval")]
    NotAwaitingApproval { user_id: String, phase: String },

    #[error("Stale decision: draft {received} does not match the pending draft {expected:?}")]
    StaleDecision {
        expected: Option<usize>,
        received: usize,
    },

    #[error("Decision references run {received}, but the active run is {expected}")]
    StaleRun { expected: Uuid, received: Uuid },

    #[error("Invalid decision: {0}")]
    InvalidDecision(String),

    #[error("Checkpoint store unavailable: {0}")]
    Store(#[from] DatabaseError),
}
