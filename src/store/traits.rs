//! `CheckpointStore`: the durable per-user record of a workflow run.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::workflow::state::WorkflowState;

/// Keyed by `user_id`; at most one record per user.
///
/// `save` replaces the whole record atomically. A failed `save` leaves the
/// previous record intact.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, state: &WorkflowState) -> Result<(), DatabaseError>;

    async fn load(&self, user_id: &str) -> Result<Option<WorkflowState>, DatabaseError>;

    /// Remove the record. Returns whether one existed.
    async fn clear(&self, user_id: &str) -> Result<bool, DatabaseError>;

    /// All records whose phase is not terminal, oldest update first.
    async fn list_active(&self) -> Result<Vec<WorkflowState>, DatabaseError>;
}
