//! In-process checkpoint store.
//!
//! Holds the same encoded envelopes the libSQL store writes, so callers see
//! identical round-trip behaviour.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::envelope;
use super::traits::CheckpointStore;
use crate::error::DatabaseError;
use crate::workflow::state::WorkflowState;

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    records: RwLock<HashMap<String, String>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, state: &WorkflowState) -> Result<(), DatabaseError> {
        let raw = envelope::encode(state)?;
        self.records.write().await.insert(state.user_id.clone(), raw);
        Ok(())
    }

    async fn load(&self, user_id: &str) -> Result<Option<WorkflowState>, DatabaseError> {
        let records = self.records.read().await;
        records.get(user_id).map(|raw| envelope::decode(raw)).transpose()
    }

    async fn clear(&self, user_id: &str) -> Result<bool, DatabaseError> {
        Ok(self.records.write().await.remove(user_id).is_some())
    }

    async fn list_active(&self) -> Result<Vec<WorkflowState>, DatabaseError> {
        let records = self.records.read().await;
        let mut active = Vec::new();
        for raw in records.values() {
            let state = envelope::decode(raw)?;
            if !state.phase.is_terminal() {
                active.push(state);
            }
        }
        active.sort_by_key(|s| s.updated_at);
        Ok(active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::state::Phase;

    #[tokio::test]
    async fn save_load_clear() {
        let store = InMemoryCheckpointStore::new();
        assert!(store.load("U1").await.unwrap().is_none());

        let state = WorkflowState::new("U1");
        store.save(&state).await.unwrap();
        assert_eq!(store.load("U1").await.unwrap(), Some(state));

        assert!(store.clear("U1").await.unwrap());
        assert!(!store.clear("U1").await.unwrap());
        assert!(store.load("U1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_replaces_previous_record() {
        let store = InMemoryCheckpointStore::new();
        let first = WorkflowState::new("U1");
        let second = WorkflowState::new("U1");
        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();

        let loaded = store.load("U1").await.unwrap().unwrap();
        assert_eq!(loaded.run_id, second.run_id);
    }

    #[tokio::test]
    async fn list_active_skips_finished_runs() {
        let store = InMemoryCheckpointStore::new();
        let live = WorkflowState::new("U1");
        let mut done = WorkflowState::new("U2");
        done.phase = Phase::Completed;
        store.save(&live).await.unwrap();
        store.save(&done).await.unwrap();

        let active = store.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].user_id, "U1");
    }
}
