//! Versioned JSON envelope for persisted workflow state.
//!
//! Records written by an incompatible build are refused on load instead of
//! being half-deserialized into a run that cannot resume correctly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;
use crate::workflow::state::WorkflowState;

const KIND: &str = "workflow_state";

/// Bump when `WorkflowState` changes shape incompatibly.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Envelope<S> {
    kind: String,
    version: u32,
    saved_at: DateTime<Utc>,
    state: S,
}

pub fn encode(state: &WorkflowState) -> Result<String, DatabaseError> {
    let envelope = Envelope {
        kind: KIND.to_string(),
        version: SCHEMA_VERSION,
        saved_at: Utc::now(),
        state,
    };
    serde_json::to_string(&envelope).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

pub fn decode(raw: &str) -> Result<WorkflowState, DatabaseError> {
    let envelope: Envelope<serde_json::Value> = serde_json::from_str(raw)
        .map_err(|e| DatabaseError::Serialization(format!("unreadable checkpoint: {e}")))?;

    if envelope.kind != KIND {
        return Err(DatabaseError::Serialization(format!(
            "unexpected record kind '{}'",
            envelope.kind
        )));
    }
    if envelope.version != SCHEMA_VERSION {
        return Err(DatabaseError::Serialization(format!(
            "checkpoint schema v{} is not supported (expected v{SCHEMA_VERSION})",
            envelope.version
        )));
    }

    serde_json::from_value(envelope.state)
        .map_err(|e| DatabaseError::Serialization(format!("corrupt checkpoint state: {e}")))
}
