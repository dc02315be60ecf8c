//! Append-only snapshot stores.
//!
//! Snapshots are never mutated once written. Appends validate that the
//! snapshot belongs to a session, is not a duplicate, and that any drift
//! vector references a snapshot already stored for the same session.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

use super::schema::{initialize_schema, is_initialized};
use super::types::{IntentSnapshot, SnapshotId};
use crate::error::{Error, Result};

/// Persistence for intent snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Append a snapshot to its session's history.
    async fn append(&self, snapshot: &IntentSnapshot) -> Result<()>;

    /// All snapshots for a session, oldest first.
    async fn history(&self, session_id: &str) -> Result<Vec<IntentSnapshot>>;

    /// Most recent snapshot for a session.
    async fn latest(&self, session_id: &str) -> Result<Option<IntentSnapshot>> {
        Ok(self.history(session_id).await?.pop())
    }

    /// Drop a session's history. Returns the number of snapshots removed.
    async fn delete_session(&self, session_id: &str) -> Result<usize>;
}

fn check_session(snapshot: &IntentSnapshot) -> Result<()> {
    if snapshot.session_id.trim().is_empty() {
        return Err(Error::validation("snapshot has no session id"));
    }
    Ok(())
}

/// In-memory snapshot store.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    sessions: RwLock<HashMap<String, Vec<IntentSnapshot>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn append(&self, snapshot: &IntentSnapshot) -> Result<()> {
        check_session(snapshot)?;
        let mut sessions = self.sessions.write().await;

        if sessions
            .values()
            .flatten()
            .any(|existing| existing.id == snapshot.id)
        {
            return Err(Error::validation(format!(
                "snapshot {} already stored",
                snapshot.id
            )));
        }

        let history = sessions.entry(snapshot.session_id.clone()).or_default();
        if let Some(drift) = &snapshot.drift {
            if !history.iter().any(|s| s.id == drift.previous_snapshot_id) {
                return Err(Error::validation(format!(
                    "drift references unknown snapshot {}",
                    drift.previous_snapshot_id
                )));
            }
        }

        history.push(snapshot.clone());
        // Stable sort keeps append order for equal timestamps
        history.sort_by_key(|s| s.timestamp);
        Ok(())
    }

    async fn history(&self, session_id: &str) -> Result<Vec<IntentSnapshot>> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn latest(&self, session_id: &str) -> Result<Option<IntentSnapshot>> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .and_then(|h| h.last().cloned()))
    }

    async fn delete_session(&self, session_id: &str) -> Result<usize> {
        Ok(self
            .sessions
            .write()
            .await
            .remove(session_id)
            .map(|h| h.len())
            .unwrap_or(0))
    }
}

/// SQLite-backed snapshot store.
pub struct SqliteSnapshotStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSnapshotStore {
    /// Open or create a snapshot store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::Storage(e.to_string()))?;

        if !is_initialized(&conn) {
            initialize_schema(&conn).map_err(|e| Error::Storage(e.to_string()))?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Storage(e.to_string()))?;
        initialize_schema(&conn).map_err(|e| Error::Storage(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock connection: {}", e)))?;
        f(&conn).map_err(|e| Error::Storage(e.to_string()))
    }

    fn row_to_snapshot(row: &rusqlite::Row) -> rusqlite::Result<IntentSnapshot> {
        let id: String = row.get(0)?;
        let intent_json: String = row.get(5)?;
        let drift_json: Option<String> = row.get(7)?;

        let to_sql_err = |e: Box<dyn std::error::Error + Send + Sync>| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e)
        };

        Ok(IntentSnapshot {
            id: SnapshotId::parse(&id).map_err(|e| to_sql_err(Box::new(e)))?,
            session_id: row.get(1)?,
            timestamp: parse_datetime(row.get(2)?),
            ambiguity_score: row.get(3)?,
            raw_input: row.get(4)?,
            extracted_intent: serde_json::from_str(&intent_json)
                .map_err(|e| to_sql_err(Box::new(e)))?,
            confidence: row.get(6)?,
            drift: drift_json
                .map(|d| serde_json::from_str(&d))
                .transpose()
                .map_err(|e| to_sql_err(Box::new(e)))?,
        })
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn append(&self, snapshot: &IntentSnapshot) -> Result<()> {
        check_session(snapshot)?;
        let intent_json = serde_json::to_string(&snapshot.extracted_intent)?;
        let drift_json = snapshot
            .drift
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock connection: {}", e)))?;

        let exists: Option<String> = conn
            .query_row(
                "SELECT id FROM intent_snapshots WHERE id = ?1",
                params![snapshot.id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Storage(e.to_string()))?;
        if exists.is_some() {
            return Err(Error::validation(format!(
                "snapshot {} already stored",
                snapshot.id
            )));
        }

        if let Some(drift) = &snapshot.drift {
            let previous: Option<String> = conn
                .query_row(
                    "SELECT id FROM intent_snapshots WHERE id = ?1 AND session_id = ?2",
                    params![drift.previous_snapshot_id.to_string(), snapshot.session_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| Error::Storage(e.to_string()))?;
            if previous.is_none() {
                return Err(Error::validation(format!(
                    "drift references unknown snapshot {}",
                    drift.previous_snapshot_id
                )));
            }
        }

        conn.execute(
            "INSERT INTO intent_snapshots (
                id, session_id, timestamp, ambiguity_score, raw_input,
                extracted_intent, confidence, drift
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                snapshot.id.to_string(),
                snapshot.session_id,
                format_datetime(&snapshot.timestamp),
                snapshot.ambiguity_score,
                snapshot.raw_input,
                intent_json,
                snapshot.confidence,
                drift_json,
            ],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }

    async fn history(&self, session_id: &str) -> Result<Vec<IntentSnapshot>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, timestamp, ambiguity_score, raw_input,
                        extracted_intent, confidence, drift
                 FROM intent_snapshots WHERE session_id = ?1
                 ORDER BY timestamp ASC, seq ASC",
            )?;
            let rows = stmt.query_map(params![session_id], Self::row_to_snapshot)?;
            rows.collect()
        })
    }

    async fn latest(&self, session_id: &str) -> Result<Option<IntentSnapshot>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, session_id, timestamp, ambiguity_score, raw_input,
                        extracted_intent, confidence, drift
                 FROM intent_snapshots WHERE session_id = ?1
                 ORDER BY timestamp DESC, seq DESC LIMIT 1",
                params![session_id],
                Self::row_to_snapshot,
            )
            .optional()
        })
    }

    async fn delete_session(&self, session_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM intent_snapshots WHERE session_id = ?1",
                params![session_id],
            )
        })
    }
}

// Fixed-width UTC timestamps sort lexically in time order
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
