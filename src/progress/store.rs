//! `ProgressStore` trait and the in-memory backend.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::DatabaseError;

use super::model::{ConversationTurn, ProgressRecord};

/// Backend-agnostic persistence for progress records and the turn log.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Load a user's progress, or `None` if they have never started.
    async fn load(&self, user_id: &str) -> Result<Option<ProgressRecord>, DatabaseError>;

    /// Save a record with compare-and-swap on `record.version`.
    ///
    /// `record.version` must equal the stored version (0 for a new record).
    /// On success the stored version becomes `record.version + 1`, which is
    /// returned. A mismatch yields `DatabaseError::Conflict`.
    async fn save(&self, user_id: &str, record: &ProgressRecord) -> Result<u64, DatabaseError>;

    /// Append turns to the user's ordered conversation log.
    async fn append_turns(
        &self,
        user_id: &str,
        turns: &[ConversationTurn],
    ) -> Result<(), DatabaseError>;

    /// The most recent `limit` turns, oldest first.
    async fn recent_turns(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, DatabaseError>;
}

/// In-memory store, for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryProgressStore {
    records: RwLock<HashMap<String, ProgressRecord>>,
    turns: RwLock<HashMap<String, Vec<ConversationTurn>>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn load(&self, user_id: &str) -> Result<Option<ProgressRecord>, DatabaseError> {
        Ok(self.records.read().await.get(user_id).cloned())
    }

    async fn save(&self, user_id: &str, record: &ProgressRecord) -> Result<u64, DatabaseError> {
        let mut records = self.records.write().await;
        let stored_version = records.get(user_id).map(|r| r.version).unwrap_or(0);
        if stored_version != record.version {
            return Err(DatabaseError::Conflict {
                user_id: user_id.to_string(),
            });
        }

        let mut saved = record.clone();
        saved.version = record.version + 1;
        let version = saved.version;
        records.insert(user_id.to_string(), saved);
        Ok(version)
    }

    async fn append_turns(
        &self,
        user_id: &str,
        turns: &[ConversationTurn],
    ) -> Result<(), DatabaseError> {
        self.turns
            .write()
            .await
            .entry(user_id.to_string())
            .or_default()
            .extend_from_slice(turns);
        Ok(())
    }

    async fn recent_turns(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, DatabaseError> {
        let turns = self.turns.read().await;
        let Some(log) = turns.get(user_id) else {
            return Ok(Vec::new());
        };
        let start = log.len().saturating_sub(limit);
        Ok(log[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::PhaseMap;

    #[tokio::test]
    async fn save_then_load() {
        let store = MemoryProgressStore::new();
        assert!(store.load("u1").await.unwrap().is_none());

        let record = ProgressRecord::new("u1", &PhaseMap::standard());
        let version = store.save("u1", &record).await.unwrap();
        assert_eq!(version, 1);

        let loaded = store.load("u1").await.unwrap().unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.current_phase, 1);
    }

    #[tokio::test]
    async fn stale_version_conflicts() {
        let store = MemoryProgressStore::new();
        let record = ProgressRecord::new("u1", &PhaseMap::standard());
        store.save("u1", &record).await.unwrap();

        // Second writer still holds version 0.
        let err = store.save("u1", &record).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Conflict { .. }));
    }

    #[tokio::test]
    async fn recent_turns_keeps_order_and_limit() {
        let store = MemoryProgressStore::new();
        let turns: Vec<_> = (0..5)
            .map(|i| ConversationTurn::user(format!("msg {i}")))
            .collect();
        store.append_turns("u1", &turns).await.unwrap();

        let recent = store.recent_turns("u1", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].text, "msg 3");
        assert_eq!(recent[1].text, "msg 4");
        assert!(store.recent_turns("nobody", 5).await.unwrap().is_empty());
    }
}
