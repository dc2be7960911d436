//! Chunk progression state machine for structured lesson conversations.
//!
//! One educational session walks one lesson's chunks in order. Each user
//! turn logs a response to the current chunk, advances exactly once, and
//! either delivers the next chunk or completes the lesson.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{LessonError, ReportError};
use crate::lesson::model::{Chunk, ChunkResponse, DeliveryKind, EducationalSession};
use crate::lesson::personalize::ContentPersonalizer;
use crate::lesson::report::ReportGenerator;
use crate::store::Database;

/// Acknowledgment logged with every chunk response and spoken before the next chunk.
pub const ACKNOWLEDGMENT: &str = "Thanks for sharing that.";

/// Spoken when the report call fails or times out.
pub const REPORT_PENDING_MESSAGE: &str = "Your personalized report will be available shortly.";

/// What a structured turn did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Session created, first chunk delivered.
    Started,
    /// Moved to the chunk at this index and delivered it.
    Advanced { index: u32 },
    /// Chunks exhausted. `report_id` is set when the report call succeeded.
    Completed { report_id: Option<String> },
    /// Repeated turn key; the current state was re-delivered unchanged.
    Replayed,
}

/// Reply produced by a structured turn.
#[derive(Debug, Clone)]
pub struct StructuredReply {
    pub text: String,
    pub delivery: DeliveryKind,
    pub outcome: TurnOutcome,
}

/// Idempotency key for one user turn. A platform retry reproduces it exactly.
///
/// A platform turn id, or a request carrying more than one user turn,
/// identifies the turn on its own. A lone message does not: the caller may
/// simply say the same thing twice, so such a key only marks a retry inside
/// the engine's retry window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnKey {
    value: String,
    distinct: bool,
}

impl TurnKey {
    /// Key from the number of user turns in the request and the latest one's text.
    pub fn from_history(user_turns: usize, user_text: &str) -> Self {
        Self {
            value: format!("{user_turns}:{}", user_text.trim()),
            distinct: user_turns > 1,
        }
    }

    /// Key from a turn id supplied by the platform.
    pub fn from_turn_id(turn_id: &str) -> Self {
        Self {
            value: format!("id:{}", turn_id.trim()),
            distinct: true,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Whether the key alone distinguishes this turn from any other.
    pub fn is_distinct(&self) -> bool {
        self.distinct
    }
}

/// Engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub report_timeout: Duration,
    /// Past this, the raw chunk content is delivered instead.
    pub personalize_timeout: Duration,
    /// How long after a turn is applied a repeated non-distinct key counts as a retry.
    pub retry_window: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            report_timeout: Duration::from_secs(15),
            personalize_timeout: Duration::from_secs(10),
            retry_window: Duration::from_secs(5),
        }
    }
}

/// Owns chunk position, completion, and the response log.
pub struct EducationalSessionEngine {
    db: Arc<dyn Database>,
    personalizer: Arc<dyn ContentPersonalizer>,
    reports: Arc<dyn ReportGenerator>,
    config: EngineConfig,
}

impl EducationalSessionEngine {
    pub fn new(
        db: Arc<dyn Database>,
        personalizer: Arc<dyn ContentPersonalizer>,
        reports: Arc<dyn ReportGenerator>,
        config: EngineConfig,
    ) -> Self {
        Self {
            db,
            personalizer,
            reports,
            config,
        }
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub async fn get_session(&self, id: &str) -> Result<Option<EducationalSession>, LessonError> {
        Ok(self.db.get_educational_session(id).await?)
    }

    /// The chunk the caller is on, or `None` once the lesson is exhausted.
    pub async fn get_current_chunk(&self, id: &str) -> Result<Option<Chunk>, LessonError> {
        let session = self.require_session(id).await?;
        if session.completed {
            return Ok(None);
        }
        let chunks = self.db.get_chunks_for_lesson(&session.lesson_id).await?;
        Ok(chunks.get(session.current_chunk_index as usize).cloned())
    }

    /// Whether a lesson is in progress and its current chunk has no response yet.
    pub async fn current_chunk_unanswered(&self, id: &str) -> Result<bool, LessonError> {
        match self.get_current_chunk(id).await? {
            Some(chunk) => Ok(self.db.count_chunk_responses(id, &chunk.id).await? == 0),
            None => Ok(false),
        }
    }

    pub async fn list_responses(&self, id: &str) -> Result<Vec<ChunkResponse>, LessonError> {
        Ok(self.db.list_chunk_responses(id).await?)
    }

    // ── Primitive operations ────────────────────────────────────────

    /// Move to the next chunk. Returns whether one exists.
    ///
    /// Not idempotent: call once per user turn. Completes the session when
    /// the new index reaches the chunk count; a completed session is left
    /// unchanged and returns `false`.
    pub async fn advance_to_next_chunk(&self, id: &str) -> Result<bool, LessonError> {
        let session = self.require_session(id).await?;
        self.advance(&session, None).await
    }

    /// Append a response to the log.
    pub async fn save_chunk_response(
        &self,
        id: &str,
        chunk_id: &str,
        user_text: &str,
        ack_text: &str,
    ) -> Result<ChunkResponse, LessonError> {
        self.require_session(id).await?;
        let response = ChunkResponse::new(id, chunk_id, user_text, ack_text);
        self.db.insert_chunk_response(&response).await?;
        debug!(session_id = id, chunk_id, "Chunk response saved");
        Ok(response)
    }

    /// Personalize chunk content when enabled, otherwise return it unchanged.
    pub async fn process_chunk_content(
        &self,
        id: &str,
        raw_content: &str,
        personalization_enabled: bool,
    ) -> Result<String, LessonError> {
        if !personalization_enabled {
            return Ok(raw_content.to_string());
        }
        let history = self.db.list_chunk_responses(id).await?;
        let timeout = self.config.personalize_timeout;
        tokio::time::timeout(timeout, self.personalizer.personalize(raw_content, &history))
            .await
            .map_err(|_| LessonError::Personalization(format!("timed out after {timeout:?}")))?
    }

    // ── Turns ───────────────────────────────────────────────────────

    /// Create a session for `lesson_id` under `id` and deliver the first chunk.
    ///
    /// If a session already exists under `id` its current chunk is delivered
    /// instead, without resetting progress.
    pub async fn start_session(
        &self,
        id: &str,
        lesson_id: &str,
        personalization_enabled: bool,
    ) -> Result<StructuredReply, LessonError> {
        let chunks = self.db.get_chunks_for_lesson(lesson_id).await?;
        let Some(first) = chunks.first() else {
            return Err(LessonError::EmptyLesson(lesson_id.to_string()));
        };

        if let Some(existing) = self.db.get_educational_session(id).await? {
            debug!(session_id = id, "Educational session already exists, replaying");
            return self.redeliver(&existing).await;
        }

        let session = EducationalSession::new(id, lesson_id)
            .with_personalization(personalization_enabled);
        self.db.create_educational_session(&session).await?;

        let title = self
            .db
            .get_lesson_title(lesson_id)
            .await?
            .unwrap_or_else(|| lesson_id.to_string());

        info!(session_id = id, lesson_id, chunks = chunks.len(), "Educational session started");

        let content = self.deliverable_content(&session, first).await;
        Ok(StructuredReply {
            text: format!(
                "Welcome to {title}.\n\n{}",
                format_chunk(first, &content)
            ),
            delivery: DeliveryKind::Chunk,
            outcome: TurnOutcome::Started,
        })
    }

    /// Apply one user turn: log the answer, advance once, deliver what's next.
    ///
    /// A platform retry of the last applied turn, and any turn against a
    /// completed session, re-delivers the current state without touching it.
    pub async fn process_turn(
        &self,
        id: &str,
        user_text: &str,
        turn_key: &TurnKey,
    ) -> Result<StructuredReply, LessonError> {
        let session = self.require_session(id).await?;

        if self.is_retry(&session, turn_key) {
            info!(session_id = id, "Repeated turn, re-delivering without advancing");
            return self.redeliver(&session).await;
        }

        if session.completed {
            debug!(session_id = id, "Lesson already complete, nothing to apply");
            return self.redeliver(&session).await;
        }

        let chunks = self.db.get_chunks_for_lesson(&session.lesson_id).await?;
        let current = chunks
            .get(session.current_chunk_index as usize)
            .ok_or_else(|| LessonError::EmptyLesson(session.lesson_id.clone()))?;

        self.save_chunk_response(id, &current.id, user_text, ACKNOWLEDGMENT)
            .await?;

        let has_next = self.advance(&session, Some(turn_key.as_str())).await?;

        if has_next {
            let index = session.current_chunk_index + 1;
            let next = chunks
                .get(index as usize)
                .ok_or_else(|| LessonError::EmptyLesson(session.lesson_id.clone()))?;
            let content = self.deliverable_content(&session, next).await;
            info!(session_id = id, chunk_index = index, "Delivering next chunk");
            return Ok(StructuredReply {
                text: format!("{ACKNOWLEDGMENT}\n\n{}", format_chunk(next, &content)),
                delivery: DeliveryKind::Chunk,
                outcome: TurnOutcome::Advanced { index },
            });
        }

        info!(session_id = id, "Lesson complete, generating report");
        let report_id = match self.generate_report(id).await {
            Ok(report_id) => {
                if let Err(e) = self.db.set_educational_report(id, &report_id).await {
                    warn!(session_id = id, error = %e, "Failed to store report id");
                }
                Some(report_id)
            }
            Err(e) => {
                warn!(session_id = id, error = %e, "Report generation failed");
                None
            }
        };
        Ok(self.completion_reply(&session, report_id).await)
    }

    // ── Internals ───────────────────────────────────────────────────

    async fn require_session(&self, id: &str) -> Result<EducationalSession, LessonError> {
        self.db
            .get_educational_session(id)
            .await?
            .ok_or_else(|| LessonError::SessionNotFound(id.to_string()))
    }

    fn is_retry(&self, session: &EducationalSession, key: &TurnKey) -> bool {
        if session.last_turn_key.as_deref() != Some(key.as_str()) {
            return false;
        }
        if key.is_distinct() {
            return true;
        }
        // Clock skew reads as "just applied".
        (Utc::now() - session.updated_at)
            .to_std()
            .map(|age| age < self.config.retry_window)
            .unwrap_or(true)
    }

    async fn advance(
        &self,
        session: &EducationalSession,
        turn_key: Option<&str>,
    ) -> Result<bool, LessonError> {
        if session.completed {
            return Ok(false);
        }

        let chunk_count = self.db.get_chunks_for_lesson(&session.lesson_id).await?.len() as u32;
        let next_index = session.current_chunk_index + 1;
        let has_next = next_index < chunk_count;
        let stored_index = next_index.min(chunk_count.max(session.current_chunk_index));

        self.db
            .update_educational_progress(&session.id, stored_index, !has_next, turn_key)
            .await?;

        debug!(
            session_id = %session.id,
            chunk_index = stored_index,
            completed = !has_next,
            "Advanced"
        );
        Ok(has_next)
    }

    async fn generate_report(&self, id: &str) -> Result<String, ReportError> {
        let timeout = self.config.report_timeout;
        tokio::time::timeout(timeout, self.reports.generate(id))
            .await
            .map_err(|_| ReportError::Timeout(timeout))?
    }

    /// Personalized content, or the raw template if personalization fails.
    async fn deliverable_content(&self, session: &EducationalSession, chunk: &Chunk) -> String {
        match self
            .process_chunk_content(&session.id, &chunk.content, session.personalization_enabled)
            .await
        {
            Ok(content) => content,
            Err(e) => {
                warn!(session_id = %session.id, chunk_id = %chunk.id, error = %e, "Personalization failed, using raw content");
                chunk.content.clone()
            }
        }
    }

    /// Re-deliver the current state without changing it.
    pub async fn redeliver(&self, session: &EducationalSession) -> Result<StructuredReply, LessonError> {
        if session.completed {
            let mut reply = self
                .completion_reply(session, session.report_id.clone())
                .await;
            reply.outcome = TurnOutcome::Replayed;
            return Ok(reply);
        }
        let chunks = self.db.get_chunks_for_lesson(&session.lesson_id).await?;
        let current = chunks
            .get(session.current_chunk_index as usize)
            .ok_or_else(|| LessonError::EmptyLesson(session.lesson_id.clone()))?;
        let content = self.deliverable_content(session, current).await;
        Ok(StructuredReply {
            text: format_chunk(current, &content),
            delivery: DeliveryKind::Chunk,
            outcome: TurnOutcome::Replayed,
        })
    }

    async fn completion_reply(
        &self,
        session: &EducationalSession,
        report_id: Option<String>,
    ) -> StructuredReply {
        let title = match self.db.get_lesson_title(&session.lesson_id).await {
            Ok(Some(title)) => title,
            _ => "this lesson".to_string(),
        };
        let report_line = if report_id.is_some() {
            "Your personalized report is ready."
        } else {
            REPORT_PENDING_MESSAGE
        };
        StructuredReply {
            text: format!(
                "{ACKNOWLEDGMENT} That completes {title}. Well done! {report_line} \
                 Feel free to ask me anything about what we covered."
            ),
            delivery: DeliveryKind::Qa,
            outcome: TurnOutcome::Completed { report_id },
        }
    }
}

/// Spoken form of a chunk: title, content, then its question.
fn format_chunk(chunk: &Chunk, content: &str) -> String {
    format!("{}\n\n{}\n\n{}", chunk.title, content.trim(), chunk.question)
}
