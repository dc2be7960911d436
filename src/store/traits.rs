//! Unified `Database` trait: single async interface for all persistence.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::lesson::model::{Chunk, ChunkResponse, EducationalSession, Lesson};
use crate::voice::session::{VoiceMessage, VoiceSession};

/// Backend-agnostic database trait covering voice sessions, lessons,
/// educational sessions, and the chunk response log.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Voice sessions ──────────────────────────────────────────────

    /// Register a new voice session (and any messages it already carries).
    async fn create_voice_session(&self, session: &VoiceSession) -> Result<(), DatabaseError>;

    /// Get a voice session with its full message history.
    async fn get_voice_session(&self, id: Uuid) -> Result<Option<VoiceSession>, DatabaseError>;

    /// Most recently registered voice session for a platform conversation id.
    async fn find_voice_session_by_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<VoiceSession>, DatabaseError>;

    /// Append a message and refresh `last_activity`.
    async fn append_voice_message(
        &self,
        session_id: Uuid,
        message: &VoiceMessage,
    ) -> Result<(), DatabaseError>;

    /// Set a single field in the session's metadata object.
    async fn update_voice_session_metadata_field(
        &self,
        session_id: Uuid,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), DatabaseError>;

    // ── Lessons ─────────────────────────────────────────────────────

    /// Insert or replace a lesson and all of its chunks.
    async fn upsert_lesson(&self, lesson: &Lesson) -> Result<(), DatabaseError>;

    /// Lesson title, if the lesson exists.
    async fn get_lesson_title(&self, lesson_id: &str) -> Result<Option<String>, DatabaseError>;

    /// Chunks of a lesson ordered by `order_index`.
    async fn get_chunks_for_lesson(&self, lesson_id: &str) -> Result<Vec<Chunk>, DatabaseError>;

    // ── Educational sessions ────────────────────────────────────────

    async fn create_educational_session(
        &self,
        session: &EducationalSession,
    ) -> Result<(), DatabaseError>;

    async fn get_educational_session(
        &self,
        id: &str,
    ) -> Result<Option<EducationalSession>, DatabaseError>;

    /// Persist position, completion, and the key of the turn that produced them.
    async fn update_educational_progress(
        &self,
        id: &str,
        current_chunk_index: u32,
        completed: bool,
        last_turn_key: Option<&str>,
    ) -> Result<(), DatabaseError>;

    async fn set_educational_report(&self, id: &str, report_id: &str)
    -> Result<(), DatabaseError>;

    // ── Chunk responses ─────────────────────────────────────────────

    async fn insert_chunk_response(&self, response: &ChunkResponse) -> Result<(), DatabaseError>;

    /// All responses for a session, oldest first.
    async fn list_chunk_responses(
        &self,
        session_id: &str,
    ) -> Result<Vec<ChunkResponse>, DatabaseError>;

    async fn count_chunk_responses(
        &self,
        session_id: &str,
        chunk_id: &str,
    ) -> Result<usize, DatabaseError>;
}
