//! libSQL backend: durable `CheckpointStore` implementation.
//!
//! Uses libsql's native async API. Supports local file and in-memory
//! databases. The full state lives in the `state` column as a versioned
//! envelope; the other columns are denormalized for inspection queries.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use super::envelope;
use super::migrations;
use super::traits::CheckpointStore;
use crate::error::DatabaseError;
use crate::workflow::state::WorkflowState;

/// libSQL checkpoint store.
///
/// Holds a single connection reused for all operations.
pub struct LibSqlCheckpointStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlCheckpointStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Checkpoint database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

/// Convert `Option<usize>` to libsql Value.
fn opt_index(index: Option<usize>) -> libsql::Value {
    match index {
        Some(i) => libsql::Value::Integer(i as i64),
        None => libsql::Value::Null,
    }
}

#[async_trait]
impl CheckpointStore for LibSqlCheckpointStore {
    async fn save(&self, state: &WorkflowState) -> Result<(), DatabaseError> {
        let raw = envelope::encode(state)?;

        // One statement: the row is either fully replaced or untouched.
        self.conn()
            .execute(
                "INSERT INTO workflow_checkpoints
                    (user_id, run_id, phase, current_draft_index, state, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (user_id) DO UPDATE SET
                    run_id = ?2,
                    phase = ?3,
                    current_draft_index = ?4,
                    state = ?5,
                    created_at = ?6,
                    updated_at = ?7",
                params![
                    state.user_id.as_str(),
                    state.run_id.to_string(),
                    state.phase.as_str(),
                    opt_index(state.current_draft_index),
                    raw,
                    state.created_at.to_rfc3339(),
                    state.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_checkpoint: {e}")))?;

        debug!(
            user_id = %state.user_id,
            run_id = %state.run_id,
            phase = %state.phase,
            "Checkpoint saved"
        );
        Ok(())
    }

    async fn load(&self, user_id: &str) -> Result<Option<WorkflowState>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT state FROM workflow_checkpoints WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_checkpoint: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("load_checkpoint row: {e}")))?;

        match row {
            Some(row) => {
                let raw: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("load_checkpoint column: {e}")))?;
                envelope::decode(&raw).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn clear(&self, user_id: &str) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "DELETE FROM workflow_checkpoints WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("clear_checkpoint: {e}")))?;
        Ok(count > 0)
    }

    async fn list_active(&self) -> Result<Vec<WorkflowState>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT state FROM workflow_checkpoints
                 WHERE phase NOT IN ('completed', 'failed')
                 ORDER BY updated_at ASC",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_active: {e}")))?;

        let mut active = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_active row: {e}")))?
        {
            let raw: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("list_active column: {e}")))?;
            active.push(envelope::decode(&raw)?);
        }
        Ok(active)
    }
}
