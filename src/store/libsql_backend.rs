//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::lesson::model::{Chunk, ChunkResponse, EducationalSession, Lesson};
use crate::store::migrations;
use crate::store::traits::Database;
use crate::voice::session::{Speaker, VoiceMessage, VoiceSession};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
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

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn load_voice_messages(&self, session_id: &str) -> Result<Vec<VoiceMessage>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT speaker, message, timestamp FROM voice_session_messages
                 WHERE session_id = ?1 ORDER BY id ASC",
                params![session_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_voice_messages: {e}")))?;

        let mut messages = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let speaker: String = row.get(0).unwrap_or_default();
            let message: String = row.get(1).unwrap_or_default();
            let timestamp: String = row.get(2).unwrap_or_default();
            messages.push(VoiceMessage {
                timestamp: parse_datetime(&timestamp),
                message,
                speaker: speaker.parse().unwrap_or(Speaker::User),
            });
        }
        Ok(messages)
    }

    async fn read_voice_metadata(&self, session_id: Uuid) -> Result<serde_json::Value, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT metadata FROM voice_sessions WHERE id = ?1",
                params![session_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("read metadata: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let meta_str: String = row.get(0).unwrap_or_else(|_| "{}".to_string());
                Ok(serde_json::from_str(&meta_str).unwrap_or(serde_json::json!({})))
            }
            Ok(None) => Err(DatabaseError::NotFound {
                entity: "voice_session".to_string(),
                id: session_id.to_string(),
            }),
            Err(e) => Err(DatabaseError::Query(format!("read metadata: {e}"))),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to a libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

const VOICE_COLUMNS: &str = "id, conversation_id, registered_at, last_activity, metadata";

const EDU_COLUMNS: &str = "id, lesson_id, current_chunk_index, completed, personalization_enabled, last_turn_key, report_id, created_at, updated_at";

/// Map a row (in VOICE_COLUMNS order) to a voice session without messages.
fn row_to_voice_session(row: &libsql::Row) -> Result<VoiceSession, libsql::Error> {
    let id_str: String = row.get(0)?;
    let conversation_id: Option<String> = row.get(1).ok();
    let registered: String = row.get(2)?;
    let last_activity: String = row.get(3)?;
    let metadata: String = row.get(4).unwrap_or_else(|_| "{}".to_string());

    Ok(VoiceSession {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        conversation_id,
        registered_at: parse_datetime(&registered),
        last_activity: parse_datetime(&last_activity),
        messages: Vec::new(),
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::json!({})),
    })
}

/// Map a row (in EDU_COLUMNS order) to an educational session.
fn row_to_educational_session(row: &libsql::Row) -> Result<EducationalSession, libsql::Error> {
    let created: String = row.get(7)?;
    let updated: String = row.get(8)?;
    Ok(EducationalSession {
        id: row.get(0)?,
        lesson_id: row.get(1)?,
        current_chunk_index: row.get::<i64>(2)?.max(0) as u32,
        completed: row.get::<i64>(3)? != 0,
        personalization_enabled: row.get::<i64>(4)? != 0,
        last_turn_key: row.get(5).ok(),
        report_id: row.get(6).ok(),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

fn row_to_chunk_response(row: &libsql::Row) -> Result<ChunkResponse, libsql::Error> {
    let id_str: String = row.get(0)?;
    let timestamp: String = row.get(5)?;
    Ok(ChunkResponse {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        session_id: row.get(1)?,
        chunk_id: row.get(2)?,
        user_response: row.get(3)?,
        acknowledgment: row.get(4)?,
        timestamp: parse_datetime(&timestamp),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Voice sessions ──────────────────────────────────────────────

    async fn create_voice_session(&self, session: &VoiceSession) -> Result<(), DatabaseError> {
        let meta_str = serde_json::to_string(&session.metadata)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        self.conn()
            .execute(
                "INSERT INTO voice_sessions (id, conversation_id, registered_at, last_activity, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    session.id.to_string(),
                    opt_text(session.conversation_id.as_deref()),
                    session.registered_at.to_rfc3339(),
                    session.last_activity.to_rfc3339(),
                    meta_str
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_voice_session: {e}")))?;

        for message in &session.messages {
            self.append_voice_message(session.id, message).await?;
        }

        debug!(session_id = %session.id, "Voice session registered");
        Ok(())
    }

    async fn get_voice_session(&self, id: Uuid) -> Result<Option<VoiceSession>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {VOICE_COLUMNS} FROM voice_sessions WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_voice_session: {e}")))?;

        let mut session = match rows.next().await {
            Ok(Some(row)) => row_to_voice_session(&row)
                .map_err(|e| DatabaseError::Query(format!("get_voice_session row: {e}")))?,
            Ok(None) => return Ok(None),
            Err(e) => return Err(DatabaseError::Query(format!("get_voice_session: {e}"))),
        };
        session.messages = self.load_voice_messages(&id.to_string()).await?;
        Ok(Some(session))
    }

    async fn find_voice_session_by_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<VoiceSession>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {VOICE_COLUMNS} FROM voice_sessions WHERE conversation_id = ?1
                     ORDER BY registered_at DESC LIMIT 1"
                ),
                params![conversation_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_voice_session_by_conversation: {e}")))?;

        let mut session = match rows.next().await {
            Ok(Some(row)) => row_to_voice_session(&row).map_err(|e| {
                DatabaseError::Query(format!("find_voice_session_by_conversation row: {e}"))
            })?,
            Ok(None) => return Ok(None),
            Err(e) => {
                return Err(DatabaseError::Query(format!(
                    "find_voice_session_by_conversation: {e}"
                )));
            }
        };
        session.messages = self.load_voice_messages(&session.id.to_string()).await?;
        Ok(Some(session))
    }

    async fn append_voice_message(
        &self,
        session_id: Uuid,
        message: &VoiceMessage,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO voice_session_messages (session_id, speaker, message, timestamp)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                session_id.to_string(),
                message.speaker.as_str(),
                message.message.as_str(),
                message.timestamp.to_rfc3339()
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("append_voice_message: {e}")))?;

        conn.execute(
            "UPDATE voice_sessions SET last_activity = ?2 WHERE id = ?1",
            params![session_id.to_string(), Utc::now().to_rfc3339()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("touch last_activity: {e}")))?;

        Ok(())
    }

    async fn update_voice_session_metadata_field(
        &self,
        session_id: Uuid,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), DatabaseError> {
        let mut metadata = self.read_voice_metadata(session_id).await?;

        if let serde_json::Value::Object(ref mut map) = metadata {
            map.insert(key.to_string(), value.clone());
        }

        let meta_str = serde_json::to_string(&metadata)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        self.conn()
            .execute(
                "UPDATE voice_sessions SET metadata = ?1 WHERE id = ?2",
                params![meta_str, session_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update metadata: {e}")))?;

        Ok(())
    }

    // ── Lessons ─────────────────────────────────────────────────────

    async fn upsert_lesson(&self, lesson: &Lesson) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO lessons (id, title, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (id) DO UPDATE SET title = ?2, updated_at = ?3",
            params![lesson.id.as_str(), lesson.title.as_str(), Utc::now().to_rfc3339()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("upsert_lesson: {e}")))?;

        conn.execute(
            "DELETE FROM chunks WHERE lesson_id = ?1",
            params![lesson.id.as_str()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("upsert_lesson clear chunks: {e}")))?;

        for chunk in &lesson.chunks {
            conn.execute(
                "INSERT INTO chunks (id, lesson_id, order_index, title, content, question)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    chunk.id.as_str(),
                    lesson.id.as_str(),
                    chunk.order_index as i64,
                    chunk.title.as_str(),
                    chunk.content.as_str(),
                    chunk.question.as_str()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_lesson chunk {}: {e}", chunk.id)))?;
        }

        debug!(lesson_id = %lesson.id, chunks = lesson.chunks.len(), "Lesson upserted");
        Ok(())
    }

    async fn get_lesson_title(&self, lesson_id: &str) -> Result<Option<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT title FROM lessons WHERE id = ?1", params![lesson_id])
            .await
            .map_err(|e| DatabaseError::Query(format!("get_lesson_title: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<String>(0).ok()),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_lesson_title: {e}"))),
        }
    }

    async fn get_chunks_for_lesson(&self, lesson_id: &str) -> Result<Vec<Chunk>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, lesson_id, order_index, title, content, question FROM chunks
                 WHERE lesson_id = ?1 ORDER BY order_index ASC",
                params![lesson_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_chunks_for_lesson: {e}")))?;

        let mut chunks = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            chunks.push(Chunk {
                id: row.get(0).unwrap_or_default(),
                lesson_id: row.get(1).unwrap_or_default(),
                order_index: row.get::<i64>(2).unwrap_or(0).max(0) as u32,
                title: row.get(3).unwrap_or_default(),
                content: row.get(4).unwrap_or_default(),
                question: row.get(5).unwrap_or_default(),
            });
        }
        Ok(chunks)
    }

    // ── Educational sessions ────────────────────────────────────────

    async fn create_educational_session(
        &self,
        session: &EducationalSession,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO educational_sessions ({EDU_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    session.id.as_str(),
                    session.lesson_id.as_str(),
                    session.current_chunk_index as i64,
                    session.completed as i64,
                    session.personalization_enabled as i64,
                    opt_text(session.last_turn_key.as_deref()),
                    opt_text(session.report_id.as_deref()),
                    session.created_at.to_rfc3339(),
                    session.updated_at.to_rfc3339()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_educational_session: {e}")))?;
        Ok(())
    }

    async fn get_educational_session(
        &self,
        id: &str,
    ) -> Result<Option<EducationalSession>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {EDU_COLUMNS} FROM educational_sessions WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_educational_session: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_educational_session(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("get_educational_session row: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_educational_session: {e}"))),
        }
    }

    async fn update_educational_progress(
        &self,
        id: &str,
        current_chunk_index: u32,
        completed: bool,
        last_turn_key: Option<&str>,
    ) -> Result<(), DatabaseError> {
        // MAX() and OR keep the index monotonic and completion sticky even
        // if a stale writer races a newer one.
        let count = self
            .conn()
            .execute(
                "UPDATE educational_sessions
                 SET current_chunk_index = MAX(current_chunk_index, ?2),
                     completed = (completed OR ?3),
                     last_turn_key = COALESCE(?4, last_turn_key),
                     updated_at = ?5
                 WHERE id = ?1",
                params![
                    id,
                    current_chunk_index as i64,
                    completed as i64,
                    opt_text(last_turn_key),
                    Utc::now().to_rfc3339()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_educational_progress: {e}")))?;

        if count == 0 {
            return Err(DatabaseError::NotFound {
                entity: "educational_session".to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn set_educational_report(
        &self,
        id: &str,
        report_id: &str,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE educational_sessions SET report_id = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, report_id, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_educational_report: {e}")))?;
        Ok(())
    }

    // ── Chunk responses ─────────────────────────────────────────────

    async fn insert_chunk_response(&self, response: &ChunkResponse) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO chunk_responses (id, session_id, chunk_id, user_response, acknowledgment, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    response.id.to_string(),
                    response.session_id.as_str(),
                    response.chunk_id.as_str(),
                    response.user_response.as_str(),
                    response.acknowledgment.as_str(),
                    response.timestamp.to_rfc3339()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_chunk_response: {e}")))?;
        Ok(())
    }

    async fn list_chunk_responses(
        &self,
        session_id: &str,
    ) -> Result<Vec<ChunkResponse>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, session_id, chunk_id, user_response, acknowledgment, timestamp
                 FROM chunk_responses WHERE session_id = ?1 ORDER BY timestamp ASC, rowid ASC",
                params![session_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_chunk_responses: {e}")))?;

        let mut responses = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            responses.push(
                row_to_chunk_response(&row)
                    .map_err(|e| DatabaseError::Query(format!("list_chunk_responses row: {e}")))?,
            );
        }
        Ok(responses)
    }

    async fn count_chunk_responses(
        &self,
        session_id: &str,
        chunk_id: &str,
    ) -> Result<usize, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM chunk_responses WHERE session_id = ?1 AND chunk_id = ?2",
                params![session_id, chunk_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_chunk_responses: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0).max(0) as usize),
            _ => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::session::EDUCATIONAL_SESSION_KEY;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn make_lesson(id: &str, chunk_count: u32) -> Lesson {
        Lesson {
            id: id.to_string(),
            title: format!("Lesson {id}"),
            chunks: (0..chunk_count)
                .map(|i| Chunk {
                    id: format!("{id}-c{i}"),
                    lesson_id: id.to_string(),
                    order_index: i,
                    title: format!("Part {}", i + 1),
                    content: format!("Content {}", i + 1),
                    question: format!("Question {}?", i + 1),
                })
                .collect(),
        }
    }

    // ── Voice sessions ──────────────────────────────────────────────

    #[tokio::test]
    async fn voice_session_roundtrip_with_messages() {
        let db = test_db().await;
        let session = VoiceSession::new(Some("conv-1".to_string()));
        db.create_voice_session(&session).await.unwrap();

        db.append_voice_message(session.id, &VoiceMessage::new(Speaker::User, "hello"))
            .await
            .unwrap();
        db.append_voice_message(session.id, &VoiceMessage::new(Speaker::Agent, "hi there"))
            .await
            .unwrap();

        let fetched = db.get_voice_session(session.id).await.unwrap().unwrap();
        assert_eq!(fetched.conversation_id.as_deref(), Some("conv-1"));
        assert_eq!(fetched.messages.len(), 2);
        assert_eq!(fetched.messages[0].speaker, Speaker::User);
        assert_eq!(fetched.messages[1].message, "hi there");
        assert!(fetched.last_activity >= session.last_activity);
    }

    #[tokio::test]
    async fn voice_session_not_found() {
        let db = test_db().await;
        assert!(db.get_voice_session(Uuid::new_v4()).await.unwrap().is_none());
        assert!(
            db.find_voice_session_by_conversation("missing")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn find_by_conversation_returns_newest() {
        let db = test_db().await;
        let older = VoiceSession::new(Some("conv-x".to_string()));
        db.create_voice_session(&older).await.unwrap();

        let mut newer = VoiceSession::new(Some("conv-x".to_string()));
        newer.registered_at = older.registered_at + chrono::Duration::seconds(5);
        db.create_voice_session(&newer).await.unwrap();

        let found = db
            .find_voice_session_by_conversation("conv-x")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, newer.id);
    }

    #[tokio::test]
    async fn metadata_field_update_preserves_other_keys() {
        let db = test_db().await;
        let mut session = VoiceSession::new(None);
        session.metadata = serde_json::json!({"caller": "web"});
        db.create_voice_session(&session).await.unwrap();

        db.update_voice_session_metadata_field(
            session.id,
            EDUCATIONAL_SESSION_KEY,
            &serde_json::json!("edu-1"),
        )
        .await
        .unwrap();

        let fetched = db.get_voice_session(session.id).await.unwrap().unwrap();
        assert_eq!(fetched.metadata["caller"], "web");
        assert_eq!(fetched.educational_session_id(), Some("edu-1"));
    }

    #[tokio::test]
    async fn metadata_update_on_missing_session_fails() {
        let db = test_db().await;
        let result = db
            .update_voice_session_metadata_field(Uuid::new_v4(), "k", &serde_json::json!(1))
            .await;
        assert!(matches!(result, Err(DatabaseError::NotFound { .. })));
    }

    // ── Lessons ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn chunks_are_ordered_and_upsert_replaces() {
        let db = test_db().await;
        let mut lesson = make_lesson("budget", 3);
        lesson.chunks.reverse();
        db.upsert_lesson(&lesson).await.unwrap();

        let chunks = db.get_chunks_for_lesson("budget").await.unwrap();
        let order: Vec<u32> = chunks.iter().map(|c| c.order_index).collect();
        assert_eq!(order, vec![0, 1, 2]);

        db.upsert_lesson(&make_lesson("budget", 2)).await.unwrap();
        assert_eq!(db.get_chunks_for_lesson("budget").await.unwrap().len(), 2);
        assert_eq!(
            db.get_lesson_title("budget").await.unwrap().as_deref(),
            Some("Lesson budget")
        );
    }

    // ── Educational sessions ────────────────────────────────────────

    #[tokio::test]
    async fn educational_session_progress_is_monotonic() {
        let db = test_db().await;
        let session = EducationalSession::new("conv-1", "budget");
        db.create_educational_session(&session).await.unwrap();

        db.update_educational_progress("conv-1", 2, false, Some("2:yes"))
            .await
            .unwrap();
        // Stale writer tries to move backwards and un-complete.
        db.update_educational_progress("conv-1", 1, false, None)
            .await
            .unwrap();

        let fetched = db.get_educational_session("conv-1").await.unwrap().unwrap();
        assert_eq!(fetched.current_chunk_index, 2);
        assert_eq!(fetched.last_turn_key.as_deref(), Some("2:yes"));

        db.update_educational_progress("conv-1", 3, true, None)
            .await
            .unwrap();
        db.update_educational_progress("conv-1", 3, false, None)
            .await
            .unwrap();
        let fetched = db.get_educational_session("conv-1").await.unwrap().unwrap();
        assert!(fetched.completed);
    }

    #[tokio::test]
    async fn progress_update_on_missing_session_fails() {
        let db = test_db().await;
        let result = db.update_educational_progress("nope", 1, false, None).await;
        assert!(matches!(result, Err(DatabaseError::NotFound { .. })));
    }

    #[tokio::test]
    async fn report_id_is_stored() {
        let db = test_db().await;
        db.create_educational_session(&EducationalSession::new("conv-r", "budget"))
            .await
            .unwrap();
        db.set_educational_report("conv-r", "report-9").await.unwrap();
        let fetched = db.get_educational_session("conv-r").await.unwrap().unwrap();
        assert_eq!(fetched.report_id.as_deref(), Some("report-9"));
    }

    // ── Chunk responses ─────────────────────────────────────────────

    #[tokio::test]
    async fn chunk_responses_are_append_only() {
        let db = test_db().await;
        db.insert_chunk_response(&ChunkResponse::new("s1", "c0", "first", "thanks"))
            .await
            .unwrap();
        db.insert_chunk_response(&ChunkResponse::new("s1", "c0", "again", "thanks"))
            .await
            .unwrap();
        db.insert_chunk_response(&ChunkResponse::new("s1", "c1", "next", "thanks"))
            .await
            .unwrap();
        db.insert_chunk_response(&ChunkResponse::new("s2", "c0", "other", "thanks"))
            .await
            .unwrap();

        let responses = db.list_chunk_responses("s1").await.unwrap();
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0].user_response, "first");
        assert_eq!(db.count_chunk_responses("s1", "c0").await.unwrap(), 2);
        assert_eq!(db.count_chunk_responses("s1", "c9").await.unwrap(), 0);
    }
}
