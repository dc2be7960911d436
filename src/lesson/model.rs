//! Lesson, chunk, and educational session data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An authored lesson: an ordered sequence of chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    pub id: String,
    pub title: String,
    pub chunks: Vec<Chunk>,
}

/// One ordered unit of lesson content plus its follow-up question.
///
/// Immutable once authored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub lesson_id: String,
    pub order_index: u32,
    pub title: String,
    /// Personalizable content template.
    pub content: String,
    pub question: String,
}

/// Progress of one caller through one lesson.
///
/// Keyed by the platform conversation id. `current_chunk_index` never
/// decreases and `completed` never reverts once set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EducationalSession {
    pub id: String,
    pub lesson_id: String,
    pub current_chunk_index: u32,
    pub completed: bool,
    pub personalization_enabled: bool,
    /// Key of the last structured turn applied; a repeat is a platform retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_turn_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EducationalSession {
    /// Start a session at the first chunk of a lesson.
    pub fn new(id: impl Into<String>, lesson_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            lesson_id: lesson_id.into(),
            current_chunk_index: 0,
            completed: false,
            personalization_enabled: false,
            last_turn_key: None,
            report_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_personalization(mut self, enabled: bool) -> Self {
        self.personalization_enabled = enabled;
        self
    }
}

/// Append-only log entry of a caller's answer to a chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkResponse {
    pub id: Uuid,
    pub session_id: String,
    pub chunk_id: String,
    pub user_response: String,
    pub acknowledgment: String,
    pub timestamp: DateTime<Utc>,
}

impl ChunkResponse {
    pub fn new(
        session_id: impl Into<String>,
        chunk_id: impl Into<String>,
        user_response: impl Into<String>,
        acknowledgment: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            chunk_id: chunk_id.into(),
            user_response: user_response.into(),
            acknowledgment: acknowledgment.into(),
            timestamp: Utc::now(),
        }
    }
}

/// What kind of reply a turn produced, which decides barge-in policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryKind {
    /// New lesson content; the caller must hear it through.
    Chunk,
    /// Conversational answer; the caller may interrupt.
    Qa,
}

impl DeliveryKind {
    pub fn is_chunk_delivery(&self) -> bool {
        matches!(self, Self::Chunk)
    }

    pub fn is_interruptible(&self) -> bool {
        !self.is_chunk_delivery()
    }
}
