//! libSQL backend for `ProgressStore`.
//!
//! Supports local file and in-memory databases. Saves use compare-and-swap
//! on the `version` column so writers in other processes cannot clobber an
//! advancement they did not see.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::routing::AgentKind;

use super::migrations;
use super::model::{ConversationTurn, ProgressRecord, Speaker};
use super::store::ProgressStore;

/// libSQL progress store.
///
/// Holds a single connection reused for all operations.
pub struct LibSqlProgressStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlProgressStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db)?;
        migrations::run_migrations(&store.conn).await?;
        info!(path = %path.display(), "Progress store opened");
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

        let store = Self::from_database(db)?;
        migrations::run_migrations(&store.conn).await?;
        Ok(store)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn opt_text(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn parse_agent(s: &str) -> Result<AgentKind, DatabaseError> {
    s.parse()
        .map_err(|e| DatabaseError::Serialization(format!("{e}")))
}

/// Narrow an INTEGER column, rejecting values the field cannot hold.
fn column_int<T: TryFrom<i64>>(value: i64, column: &str) -> Result<T, DatabaseError> {
    T::try_from(value)
        .map_err(|_| DatabaseError::Serialization(format!("{column} out of range: {value}")))
}

fn row_to_record(row: &libsql::Row) -> Result<ProgressRecord, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("progress row: {e}"));

    let current_phase: i64 = row.get(1).map_err(get_err)?;
    let is_complete: i64 = row.get(2).map_err(get_err)?;
    let agent_str: String = row.get(3).map_err(get_err)?;
    let phase_data_str: String = row.get(4).map_err(get_err)?;
    let version: i64 = row.get(5).map_err(get_err)?;
    let created_str: String = row.get(6).map_err(get_err)?;
    let updated_str: String = row.get(7).map_err(get_err)?;
    let completed_str: Option<String> = row.get(8).ok();

    let phase_data = serde_json::from_str(&phase_data_str)
        .map_err(|e| DatabaseError::Serialization(format!("phase_data: {e}")))?;

    Ok(ProgressRecord {
        user_id: row.get(0).map_err(get_err)?,
        current_phase: column_int(current_phase, "current_phase")?,
        is_complete: is_complete != 0,
        phase_data,
        current_agent: parse_agent(&agent_str)?,
        version: column_int(version, "version")?,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
        completed_at: completed_str.as_deref().map(parse_datetime),
    })
}

fn row_to_turn(row: &libsql::Row) -> Result<ConversationTurn, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("turn row: {e}"));

    let speaker_str: String = row.get(0).map_err(get_err)?;
    let agent_str: Option<String> = row.get(2).ok();
    let created_str: String = row.get(4).map_err(get_err)?;

    let speaker = match speaker_str.as_str() {
        "agent" => Speaker::Agent,
        _ => Speaker::User,
    };
    let agent = agent_str.as_deref().map(parse_agent).transpose()?;

    Ok(ConversationTurn {
        speaker,
        text: row.get(1).map_err(get_err)?,
        timestamp: parse_datetime(&created_str),
        agent,
        session_id: row.get(3).ok(),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl ProgressStore for LibSqlProgressStore {
    async fn load(&self, user_id: &str) -> Result<Option<ProgressRecord>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT user_id, current_phase, is_complete, current_agent, phase_data,
                        version, created_at, updated_at, completed_at
                 FROM progress WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_record(&row).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("load: {e}"))),
        }
    }

    async fn save(&self, user_id: &str, record: &ProgressRecord) -> Result<u64, DatabaseError> {
        let phase_data = serde_json::to_string(&record.phase_data)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let next_version = record.version + 1;
        let completed_at = record.completed_at.map(|t| t.to_rfc3339());

        let result = if record.version == 0 {
            self.conn
                .execute(
                    "INSERT INTO progress (user_id, current_phase, is_complete, current_agent,
                        phase_data, version, created_at, updated_at, completed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT (user_id) DO NOTHING",
                    params![
                        user_id,
                        record.current_phase as i64,
                        record.is_complete as i64,
                        record.current_agent.label(),
                        phase_data,
                        next_version as i64,
                        record.created_at.to_rfc3339(),
                        record.updated_at.to_rfc3339(),
                        opt_text(completed_at),
                    ],
                )
                .await
        } else {
            self.conn
                .execute(
                    "UPDATE progress SET current_phase = ?1, is_complete = ?2, current_agent = ?3,
                        phase_data = ?4, version = ?5, updated_at = ?6, completed_at = ?7
                     WHERE user_id = ?8 AND version = ?9",
                    params![
                        record.current_phase as i64,
                        record.is_complete as i64,
                        record.current_agent.label(),
                        phase_data,
                        next_version as i64,
                        record.updated_at.to_rfc3339(),
                        opt_text(completed_at),
                        user_id,
                        record.version as i64,
                    ],
                )
                .await
        };
        let changed = result.map_err(|e| DatabaseError::Query(format!("save: {e}")))?;

        if changed == 0 {
            return Err(DatabaseError::Conflict {
                user_id: user_id.to_string(),
            });
        }

        debug!(user_id, version = next_version, phase = record.current_phase, "Progress saved");
        Ok(next_version)
    }

    async fn append_turns(
        &self,
        user_id: &str,
        turns: &[ConversationTurn],
    ) -> Result<(), DatabaseError> {
        if turns.is_empty() {
            return Ok(());
        }

        // One multi-row INSERT, so an exchange lands whole or not at all.
        let mut rows = Vec::with_capacity(turns.len());
        let mut values = Vec::with_capacity(turns.len() * 6);
        for (i, turn) in turns.iter().enumerate() {
            let base = i * 6;
            rows.push(format!(
                "(?{}, ?{}, ?{}, ?{}, ?{}, ?{})",
                base + 1,
                base + 2,
                base + 3,
                base + 4,
                base + 5,
                base + 6
            ));
            values.extend([
                libsql::Value::Text(user_id.to_string()),
                libsql::Value::Text(turn.speaker.to_string()),
                libsql::Value::Text(turn.text.clone()),
                opt_text(turn.agent.map(|a| a.label().to_string())),
                opt_text(turn.session_id.clone()),
                libsql::Value::Text(turn.timestamp.to_rfc3339()),
            ]);
        }
        let sql = format!(
            "INSERT INTO conversation_turns (user_id, speaker, text, agent, session_id, created_at)
             VALUES {}",
            rows.join(", ")
        );

        self.conn
            .execute(&sql, libsql::params_from_iter(values))
            .await
            .map_err(|e| DatabaseError::Query(format!("append_turns: {e}")))?;
        Ok(())
    }

    async fn recent_turns(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT speaker, text, agent, session_id, created_at
                 FROM conversation_turns WHERE user_id = ?1
                 ORDER BY id DESC LIMIT ?2",
                params![user_id, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_turns: {e}")))?;

        let mut turns = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_turn(&row) {
                Ok(turn) => turns.push(turn),
                Err(e) => tracing::warn!("Skipping conversation turn row: {e}"),
            }
        }
        turns.reverse();
        Ok(turns)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::routing::PhaseMap;

    async fn test_store() -> LibSqlProgressStore {
        LibSqlProgressStore::new_memory().await.unwrap()
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let store = test_store().await;
        let map = PhaseMap::standard();
        let mut record = ProgressRecord::new("u1", &map);
        record
            .complete_phase(&map, json!({ "fitness_level": "beginner" }))
            .unwrap();

        let version = store.save("u1", &record).await.unwrap();
        assert_eq!(version, 1);

        let loaded = store.load("u1").await.unwrap().unwrap();
        assert_eq!(loaded.current_phase, 2);
        assert_eq!(loaded.current_agent, AgentKind::GoalSetting);
        assert_eq!(loaded.phase_data["phase_1"]["fitness_level"], "beginner");
        assert_eq!(loaded.version, 1);
        assert!(!loaded.is_complete);
    }

    #[tokio::test]
    async fn missing_user_loads_none() {
        let store = test_store().await;
        assert!(store.load("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn compare_and_swap_detects_stale_writers() {
        let store = test_store().await;
        let map = PhaseMap::standard();
        let record = ProgressRecord::new("u1", &map);

        store.save("u1", &record).await.unwrap();
        // Inserting again at version 0 must conflict.
        assert!(matches!(
            store.save("u1", &record).await,
            Err(DatabaseError::Conflict { .. })
        ));

        let mut current = store.load("u1").await.unwrap().unwrap();
        let stale = current.clone();
        current.complete_phase(&map, json!({})).unwrap();
        assert_eq!(store.save("u1", &current).await.unwrap(), 2);

        // A writer still holding version 1 loses.
        assert!(matches!(
            store.save("u1", &stale).await,
            Err(DatabaseError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn completed_record_persists_completion() {
        let store = test_store().await;
        let map = PhaseMap::standard();
        let mut record = ProgressRecord::new("u1", &map);
        for _ in 0..4 {
            record.complete_phase(&map, json!({ "ok": true })).unwrap();
        }
        store.save("u1", &record).await.unwrap();

        let loaded = store.load("u1").await.unwrap().unwrap();
        assert!(loaded.is_complete);
        assert_eq!(loaded.current_agent, AgentKind::General);
        assert!(loaded.completed_at.is_some());
        assert_eq!(loaded.phase_data.len(), 4);
    }

    #[tokio::test]
    async fn turns_come_back_oldest_first() {
        let store = test_store().await;
        let turns = vec![
            ConversationTurn::user("hi").with_session(Some("s1".to_string())),
            ConversationTurn::agent(AgentKind::Assessment, "hello! how often do you train?"),
            ConversationTurn::user("three times a week"),
        ];
        store.append_turns("u1", &turns).await.unwrap();

        let recent = store.recent_turns("u1", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].speaker, Speaker::Agent);
        assert_eq!(recent[0].agent, Some(AgentKind::Assessment));
        assert_eq!(recent[1].text, "three times a week");

        let all = store.recent_turns("u1", 10).await.unwrap();
        assert_eq!(all[0].session_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn oversized_phase_column_fails_to_load() {
        let store = test_store().await;
        let now = Utc::now().to_rfc3339();
        store
            .conn
            .execute(
                "INSERT INTO progress (user_id, current_phase, is_complete, current_agent,
                     phase_data, version, created_at, updated_at)
                 VALUES (?1, ?2, 0, 'assessment', '{}', 1, ?3, ?3)",
                params!["u1", 4_294_967_297_i64, now],
            )
            .await
            .unwrap();

        let err = store.load("u1").await.unwrap_err();
        assert!(matches!(err, DatabaseError::Serialization(ref m) if m.contains("current_phase")));
    }

    #[tokio::test]
    async fn negative_version_fails_to_load() {
        let store = test_store().await;
        let now = Utc::now().to_rfc3339();
        store
            .conn
            .execute(
                "INSERT INTO progress (user_id, current_phase, is_complete, current_agent,
                     phase_data, version, created_at, updated_at)
                 VALUES ('u1', 1, 0, 'assessment', '{}', -1, ?1, ?1)",
                params![now],
            )
            .await
            .unwrap();

        let err = store.load("u1").await.unwrap_err();
        assert!(matches!(err, DatabaseError::Serialization(ref m) if m.contains("version")));
    }

    #[tokio::test]
    async fn failed_append_leaves_no_partial_exchange() {
        let store = test_store().await;
        store
            .conn
            .execute_batch(
                "CREATE TRIGGER reject_agent_turns BEFORE INSERT ON conversation_turns
                 WHEN NEW.speaker = 'agent'
                 BEGIN SELECT RAISE(ABORT, 'agent turns rejected'); END;",
            )
            .await
            .unwrap();

        let turns = [
            ConversationTurn::user("hello"),
            ConversationTurn::agent(AgentKind::Assessment, "hi there"),
        ];
        assert!(store.append_turns("u1", &turns).await.is_err());
        assert!(store.recent_turns("u1", 10).await.unwrap().is_empty());

        store.append_turns("u1", &turns[..1]).await.unwrap();
        assert_eq!(store.recent_turns("u1", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("progress.db");
        let map = PhaseMap::standard();

        {
            let store = LibSqlProgressStore::new_local(&path).await.unwrap();
            store
                .save("u1", &ProgressRecord::new("u1", &map))
                .await
                .unwrap();
        }

        let store = LibSqlProgressStore::new_local(&path).await.unwrap();
        let loaded = store.load("u1").await.unwrap().unwrap();
        assert_eq!(loaded.current_phase, 1);
    }
}
