//! Per-request coordinator for webhook turns.
//!
//! `handle_turn` always returns a reply. Every failure below it degrades to
//! a softer behavior and is logged, never propagated.

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::conversation::generator::{CitedSource, GenerationContext, ResponseGenerator};
use crate::conversation::request::InboundTurn;
use crate::error::LlmError;
use crate::identity::{Identity, SessionIdentityResolver};
use crate::lesson::delivery::classify_delivery;
use crate::lesson::engine::{EducationalSessionEngine, StructuredReply};
use crate::lesson::model::{DeliveryKind, EducationalSession};
use crate::llm::provider::{ChatMessage, Role};
use crate::store::Database;
use crate::voice::session::{EDUCATIONAL_SESSION_KEY, Speaker, VoiceMessage, VoiceSession};

/// Spoken when open-ended generation fails or times out.
pub const APOLOGY: &str =
    "I'm sorry, I'm having trouble answering right now. Could you say that again?";

/// Which path produced a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMode {
    Structured,
    OpenEnded,
    /// Open-ended generation failed; the reply is [`APOLOGY`].
    Apology,
}

/// The orchestrator's answer to one webhook turn.
#[derive(Debug, Clone)]
pub struct BridgeReply {
    pub text: String,
    pub delivery: DeliveryKind,
    pub cited_sources: Vec<CitedSource>,
    pub mode: ReplyMode,
    pub session_id: Uuid,
    pub conversation_id: Option<String>,
}

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub generation_timeout: Duration,
    /// Personalization for lessons started without an explicit choice.
    pub personalize_by_default: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            generation_timeout: Duration::from_secs(20),
            personalize_by_default: false,
        }
    }
}

pub struct ConversationOrchestrator {
    db: Arc<dyn Database>,
    resolver: Arc<SessionIdentityResolver>,
    engine: Arc<EducationalSessionEngine>,
    generator: Arc<dyn ResponseGenerator>,
    config: OrchestratorConfig,
}

impl ConversationOrchestrator {
    pub fn new(
        db: Arc<dyn Database>,
        resolver: Arc<SessionIdentityResolver>,
        engine: Arc<EducationalSessionEngine>,
        generator: Arc<dyn ResponseGenerator>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            db,
            resolver,
            engine,
            generator,
            config,
        }
    }

    pub fn engine(&self) -> &Arc<EducationalSessionEngine> {
        &self.engine
    }

    /// Handle one inbound turn end to end.
    ///
    /// `body` is the raw payload the identity carriers read; `turn` is its
    /// parsed form.
    pub async fn handle_turn(
        &self,
        headers: &HeaderMap,
        body: &Value,
        turn: &InboundTurn,
    ) -> BridgeReply {
        let identity = self.resolver.resolve_identity(headers, body).await;
        let (voice, persisted) = self.voice_session(identity.as_ref()).await;

        self.resolver
            .record_latest(voice.id, voice.conversation_id.clone())
            .await;

        let conversation_key = identity
            .as_ref()
            .and_then(|i| i.conversation_id.clone())
            .unwrap_or_else(|| voice.conversation_key());

        debug!(
            session_id = %voice.id,
            conversation_id = %conversation_key,
            user_turns = turn.user_turns(),
            "Handling turn"
        );

        let educational = self.find_educational_session(&conversation_key, &voice).await;

        let (text, delivery, cited_sources, mode) =
            match self.try_structured(turn, &voice, &conversation_key, educational.as_ref()).await
            {
                Some(reply) => (reply.text, reply.delivery, Vec::new(), ReplyMode::Structured),
                None => self.open_ended(turn, &voice, educational.as_ref()).await,
            };

        if persisted {
            self.record_messages(&voice, turn.latest_user_text(), &text)
                .await;
        }

        info!(
            session_id = %voice.id,
            conversation_id = %conversation_key,
            mode = ?mode,
            delivery = ?delivery,
            "Turn handled"
        );

        BridgeReply {
            text,
            delivery,
            cited_sources,
            mode,
            session_id: voice.id,
            conversation_id: voice.conversation_id.clone(),
        }
    }

    // ── Sessions ────────────────────────────────────────────────────

    /// Find the voice session for an identity, or register a fresh one.
    ///
    /// Returns the session and whether it is stored. A storage failure still
    /// yields a usable in-memory session so the turn can be answered.
    async fn voice_session(&self, identity: Option<&Identity>) -> (VoiceSession, bool) {
        if let Some(identity) = identity {
            if let Some(found) = self.lookup_voice_session(identity).await {
                return (found, true);
            }
        }

        let session = VoiceSession::new(identity.and_then(|i| i.conversation_id.clone()));
        match self.db.create_voice_session(&session).await {
            Ok(()) => {
                info!(session_id = %session.id, "Registered new voice session");
                (session, true)
            }
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "Failed to register voice session");
                (session, false)
            }
        }
    }

    async fn lookup_voice_session(&self, identity: &Identity) -> Option<VoiceSession> {
        if let Some(id) = identity.session_id {
            match self.db.get_voice_session(id).await {
                Ok(Some(session)) => return Some(session),
                Ok(None) => debug!(session_id = %id, "Voice session id not found"),
                Err(e) => warn!(session_id = %id, error = %e, "Voice session lookup failed"),
            }
        }
        let conversation_id = identity.conversation_id.as_deref()?;
        match self.db.find_voice_session_by_conversation(conversation_id).await {
            Ok(found) => found,
            Err(e) => {
                warn!(conversation_id, error = %e, "Voice session lookup failed");
                None
            }
        }
    }

    /// Conversation key first, then the voice session's metadata reference.
    async fn find_educational_session(
        &self,
        conversation_key: &str,
        voice: &VoiceSession,
    ) -> Option<EducationalSession> {
        match self.engine.get_session(conversation_key).await {
            Ok(Some(session)) => return Some(session),
            Ok(None) => {}
            Err(e) => warn!(conversation_id = conversation_key, error = %e, "Educational session lookup failed"),
        }

        let referenced = voice.educational_session_id()?;
        match self.engine.get_session(referenced).await {
            Ok(found) => found,
            Err(e) => {
                warn!(educational_session_id = referenced, error = %e, "Educational session lookup failed");
                None
            }
        }
    }

    // ── Structured mode ─────────────────────────────────────────────

    /// `None` means "answer open-ended instead".
    async fn try_structured(
        &self,
        turn: &InboundTurn,
        voice: &VoiceSession,
        conversation_key: &str,
        educational: Option<&EducationalSession>,
    ) -> Option<StructuredReply> {
        let result = match educational {
            Some(session) if session.completed => return None,
            Some(session) => match turn.latest_user_text() {
                Some(text) => {
                    let key = turn.turn_key(text);
                    self.engine.process_turn(&session.id, text, &key).await
                }
                None => self.engine.redeliver(session).await,
            },
            None => {
                let lesson_id = turn.requested_lesson()?;
                let personalize = turn
                    .variables
                    .personalization
                    .unwrap_or(self.config.personalize_by_default);
                let started = self
                    .engine
                    .start_session(conversation_key, lesson_id, personalize)
                    .await;
                if started.is_ok() {
                    self.link_educational_session(voice, conversation_key).await;
                }
                started
            }
        };

        match result {
            Ok(reply) => Some(reply),
            Err(e) => {
                warn!(
                    conversation_id = conversation_key,
                    error = %e,
                    "Structured turn failed, answering open-ended"
                );
                None
            }
        }
    }

    async fn link_educational_session(&self, voice: &VoiceSession, educational_id: &str) {
        if let Err(e) = self
            .db
            .update_voice_session_metadata_field(
                voice.id,
                EDUCATIONAL_SESSION_KEY,
                &Value::String(educational_id.to_string()),
            )
            .await
        {
            warn!(session_id = %voice.id, error = %e, "Failed to link educational session");
        }
    }

    // ── Open-ended mode ─────────────────────────────────────────────

    async fn open_ended(
        &self,
        turn: &InboundTurn,
        voice: &VoiceSession,
        educational: Option<&EducationalSession>,
    ) -> (String, DeliveryKind, Vec<CitedSource>, ReplyMode) {
        let turns = if turn.messages.is_empty() {
            history_as_turns(voice)
        } else {
            turn.messages.clone()
        };

        let context = GenerationContext {
            lesson_title: self.lesson_title(educational).await,
            current_topic: turn.current_topic(),
        };

        let generated = tokio::time::timeout(
            self.config.generation_timeout,
            self.generator.generate(&turns, &context),
        )
        .await
        .unwrap_or_else(|_| {
            Err(LlmError::Timeout {
                provider: "generator".to_string(),
                timeout: self.config.generation_timeout,
            })
        });

        match generated {
            Ok(reply) => {
                let unanswered = self.chunk_unanswered(educational).await;
                let delivery = classify_delivery(&reply.text, unanswered);
                (reply.text, delivery, reply.cited_sources, ReplyMode::OpenEnded)
            }
            Err(e) => {
                warn!(session_id = %voice.id, error = %e, "Open-ended generation failed");
                (APOLOGY.to_string(), DeliveryKind::Qa, Vec::new(), ReplyMode::Apology)
            }
        }
    }

    async fn lesson_title(&self, educational: Option<&EducationalSession>) -> Option<String> {
        let session = educational?;
        match self.db.get_lesson_title(&session.lesson_id).await {
            Ok(title) => title,
            Err(e) => {
                debug!(lesson_id = %session.lesson_id, error = %e, "Lesson title lookup failed");
                None
            }
        }
    }

    async fn chunk_unanswered(&self, educational: Option<&EducationalSession>) -> bool {
        let Some(session) = educational.filter(|s| !s.completed) else {
            return false;
        };
        self.engine
            .current_chunk_unanswered(&session.id)
            .await
            .unwrap_or(false)
    }

    // ── History ─────────────────────────────────────────────────────

    async fn record_messages(&self, voice: &VoiceSession, user_text: Option<&str>, reply: &str) {
        if let Some(text) = user_text {
            if let Err(e) = self
                .db
                .append_voice_message(voice.id, &VoiceMessage::new(Speaker::User, text))
                .await
            {
                warn!(session_id = %voice.id, error = %e, "Failed to record user message");
            }
        }
        if let Err(e) = self
            .db
            .append_voice_message(voice.id, &VoiceMessage::new(Speaker::Agent, reply))
            .await
        {
            warn!(session_id = %voice.id, error = %e, "Failed to record agent message");
        }
    }
}

/// Rebuild chat turns from a voice session's recorded messages.
fn history_as_turns(voice: &VoiceSession) -> Vec<ChatMessage> {
    voice
        .messages
        .iter()
        .map(|m| ChatMessage {
            role: match m.speaker {
                Speaker::User => Role::User,
                Speaker::Agent => Role::Assistant,
            },
            content: m.message.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::conversation::generator::GeneratedReply;
    use crate::error::{DatabaseError, ReportError};
    use crate::identity::MemoryPointerStore;
    use crate::lesson::engine::{ACKNOWLEDGMENT, EngineConfig};
    use crate::lesson::model::{Chunk, ChunkResponse, Lesson};
    use crate::lesson::personalize::NoopPersonalizer;
    use crate::lesson::report::ReportGenerator;
    use crate::store::LibSqlBackend;

    struct StubGenerator {
        reply: Result<&'static str, ()>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl StubGenerator {
        fn answering(reply: &'static str) -> Self {
            Self {
                reply: Ok(reply),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ResponseGenerator for StubGenerator {
        async fn generate(
            &self,
            _turns: &[ChatMessage],
            _context: &GenerationContext,
        ) -> Result<GeneratedReply, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            match self.reply {
                Ok(text) => Ok(GeneratedReply {
                    text: text.to_string(),
                    cited_sources: vec![CitedSource {
                        title: "Guide".into(),
                        url: None,
                    }],
                }),
                Err(()) => Err(LlmError::RequestFailed {
                    provider: "stub".into(),
                    reason: "down".into(),
                }),
            }
        }
    }

    struct NoReports;

    #[async_trait]
    impl ReportGenerator for NoReports {
        async fn generate(&self, _session_id: &str) -> Result<String, ReportError> {
            Err(ReportError::NotConfigured)
        }
    }

    /// Delegates to libSQL but refuses to log chunk responses, so every
    /// structured turn fails after the session is found.
    struct NoResponseLog(Arc<LibSqlBackend>);

    #[async_trait]
    impl Database for NoResponseLog {
        async fn run_migrations(&self) -> Result<(), DatabaseError> {
            self.0.run_migrations().await
        }
        async fn create_voice_session(&self, session: &VoiceSession) -> Result<(), DatabaseError> {
            self.0.create_voice_session(session).await
        }
        async fn get_voice_session(&self, id: Uuid) -> Result<Option<VoiceSession>, DatabaseError> {
            self.0.get_voice_session(id).await
        }
        async fn find_voice_session_by_conversation(
            &self,
            conversation_id: &str,
        ) -> Result<Option<VoiceSession>, DatabaseError> {
            self.0.find_voice_session_by_conversation(conversation_id).await
        }
        async fn append_voice_message(
            &self,
            session_id: Uuid,
            message: &VoiceMessage,
        ) -> Result<(), DatabaseError> {
            self.0.append_voice_message(session_id, message).await
        }
        async fn update_voice_session_metadata_field(
            &self,
            session_id: Uuid,
            key: &str,
            value: &Value,
        ) -> Result<(), DatabaseError> {
            self.0
                .update_voice_session_metadata_field(session_id, key, value)
                .await
        }
        async fn upsert_lesson(&self, lesson: &Lesson) -> Result<(), DatabaseError> {
            self.0.upsert_lesson(lesson).await
        }
        async fn get_lesson_title(&self, lesson_id: &str) -> Result<Option<String>, DatabaseError> {
            self.0.get_lesson_title(lesson_id).await
        }
        async fn get_chunks_for_lesson(&self, lesson_id: &str) -> Result<Vec<Chunk>, DatabaseError> {
            self.0.get_chunks_for_lesson(lesson_id).await
        }
        async fn create_educational_session(
            &self,
            session: &EducationalSession,
        ) -> Result<(), DatabaseError> {
            self.0.create_educational_session(session).await
        }
        async fn get_educational_session(
            &self,
            id: &str,
        ) -> Result<Option<EducationalSession>, DatabaseError> {
            self.0.get_educational_session(id).await
        }
        async fn update_educational_progress(
            &self,
            id: &str,
            current_chunk_index: u32,
            completed: bool,
            last_turn_key: Option<&str>,
        ) -> Result<(), DatabaseError> {
            self.0
                .update_educational_progress(id, current_chunk_index, completed, last_turn_key)
                .await
        }
        async fn set_educational_report(
            &self,
            id: &str,
            report_id: &str,
        ) -> Result<(), DatabaseError> {
            self.0.set_educational_report(id, report_id).await
        }
        async fn insert_chunk_response(&self, _response: &ChunkResponse) -> Result<(), DatabaseError> {
            Err(DatabaseError::Query("insert_chunk_response: disk full".into()))
        }
        async fn list_chunk_responses(
            &self,
            session_id: &str,
        ) -> Result<Vec<ChunkResponse>, DatabaseError> {
            self.0.list_chunk_responses(session_id).await
        }
        async fn count_chunk_responses(
            &self,
            session_id: &str,
            chunk_id: &str,
        ) -> Result<usize, DatabaseError> {
            self.0.count_chunk_responses(session_id, chunk_id).await
        }
    }

    async fn seeded_db() -> Arc<LibSqlBackend> {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        db.upsert_lesson(&Lesson {
            id: "budget".into(),
            title: "Budgeting".into(),
            chunks: (0..2)
                .map(|i| Chunk {
                    id: format!("c{i}"),
                    lesson_id: "budget".into(),
                    order_index: i,
                    title: format!("Part {}", i + 1),
                    content: format!("Content {}", i + 1),
                    question: format!("Question {}?", i + 1),
                })
                .collect(),
        })
        .await
        .unwrap();
        db
    }

    fn build(db: Arc<dyn Database>, generator: StubGenerator) -> ConversationOrchestrator {
        let resolver = Arc::new(SessionIdentityResolver::new(
            Arc::new(MemoryPointerStore::new()),
            1,
            Duration::ZERO,
        ));
        let engine = Arc::new(EducationalSessionEngine::new(
            db.clone(),
            Arc::new(NoopPersonalizer),
            Arc::new(NoReports),
            EngineConfig::default(),
        ));
        ConversationOrchestrator::new(
            db,
            resolver,
            engine,
            Arc::new(generator),
            OrchestratorConfig {
                generation_timeout: Duration::from_secs(5),
                personalize_by_default: false,
            },
        )
    }

    async fn orchestrator(generator: StubGenerator) -> (ConversationOrchestrator, Arc<LibSqlBackend>) {
        let db = seeded_db().await;
        (build(db.clone(), generator), db)
    }

    async fn send(orch: &ConversationOrchestrator, body: &Value) -> BridgeReply {
        orch.handle_turn(&HeaderMap::new(), body, &InboundTurn::from_body(body))
            .await
    }

    fn body(conversation: &str, user: &str) -> Value {
        json!({
            "messages": [{"role": "user", "content": user}],
            "variables": {"conversation_id": conversation}
        })
    }

    #[tokio::test]
    async fn open_ended_without_lesson() {
        let (orch, db) = orchestrator(StubGenerator::answering("Sure, happy to help.")).await;
        let reply = send(&orch, &body("c1", "hello")).await;

        assert_eq!(reply.mode, ReplyMode::OpenEnded);
        assert_eq!(reply.text, "Sure, happy to help.");
        assert_eq!(reply.delivery, DeliveryKind::Qa);
        assert_eq!(reply.cited_sources.len(), 1);

        let voice = db.get_voice_session(reply.session_id).await.unwrap().unwrap();
        assert_eq!(voice.conversation_id.as_deref(), Some("c1"));
        assert_eq!(voice.messages.len(), 2);
        assert_eq!(voice.messages[1].message, "Sure, happy to help.");
    }

    #[tokio::test]
    async fn generator_failure_yields_apology() {
        let (orch, _db) = orchestrator(StubGenerator {
            reply: Err(()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
        .await;
        let reply = send(&orch, &body("c1", "hello")).await;
        assert_eq!(reply.mode, ReplyMode::Apology);
        assert_eq!(reply.text, APOLOGY);
        assert!(reply.delivery.is_interruptible());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_generator_times_out_to_apology() {
        let (orch, _db) = orchestrator(StubGenerator {
            reply: Ok("too late"),
            delay: Duration::from_secs(60),
            calls: AtomicUsize::new(0),
        })
        .await;
        let reply = send(&orch, &body("c1", "hello")).await;
        assert_eq!(reply.text, APOLOGY);
    }

    #[tokio::test]
    async fn lesson_start_links_voice_session() {
        let (orch, db) = orchestrator(StubGenerator::answering("unused")).await;
        let mut start = body("c2", "let's start");
        start["variables"]["lesson_id"] = json!("budget");

        let reply = send(&orch, &start).await;
        assert_eq!(reply.mode, ReplyMode::Structured);
        assert!(reply.delivery.is_chunk_delivery());
        assert!(reply.text.contains("Content 1"));

        let voice = db.get_voice_session(reply.session_id).await.unwrap().unwrap();
        assert_eq!(voice.educational_session_id(), Some("c2"));
    }

    #[tokio::test]
    async fn metadata_reference_finds_session_when_key_differs() {
        let (orch, db) = orchestrator(StubGenerator::answering("unused")).await;
        db.create_educational_session(&EducationalSession::new("edu-x", "budget"))
            .await
            .unwrap();

        let mut voice = VoiceSession::new(Some("c3".into()));
        voice.metadata = json!({ EDUCATIONAL_SESSION_KEY: "edu-x" });
        db.create_voice_session(&voice).await.unwrap();

        let reply = send(&orch, &body("c3", "my answer")).await;
        assert_eq!(reply.mode, ReplyMode::Structured);
        assert!(reply.text.contains("Content 2"));
        let edu = db.get_educational_session("edu-x").await.unwrap().unwrap();
        assert_eq!(edu.current_chunk_index, 1);
    }

    #[tokio::test]
    async fn completed_lesson_goes_open_ended() {
        let generator = StubGenerator::answering("Happy to recap.");
        let (orch, db) = orchestrator(generator).await;
        let mut session = EducationalSession::new("c4", "budget");
        session.completed = true;
        session.current_chunk_index = 2;
        db.create_educational_session(&session).await.unwrap();

        let reply = send(&orch, &body("c4", "recap?")).await;
        assert_eq!(reply.mode, ReplyMode::OpenEnded);
        assert_eq!(reply.text, "Happy to recap.");
    }

    #[tokio::test]
    async fn broken_lesson_falls_back_to_open_ended() {
        let (orch, db) = orchestrator(StubGenerator::answering("Let's chat instead.")).await;
        db.create_educational_session(&EducationalSession::new("c5", "deleted-lesson"))
            .await
            .unwrap();

        let reply = send(&orch, &body("c5", "answer")).await;
        assert_eq!(reply.mode, ReplyMode::OpenEnded);
        assert_eq!(reply.text, "Let's chat instead.");
    }

    #[tokio::test]
    async fn anonymous_caller_resumes_through_pointer() {
        let (orch, _db) = orchestrator(StubGenerator::answering("hi")).await;
        let anonymous = json!({"messages": [{"role": "user", "content": "hello"}]});

        let first = send(&orch, &anonymous).await;
        assert!(first.conversation_id.is_none());

        // The first turn wrote the pointer, so the second resolves to it.
        let second = send(&orch, &anonymous).await;
        assert_eq!(second.session_id, first.session_id);
    }

    #[tokio::test]
    async fn fallback_reply_in_lesson_follows_chunk_state() {
        let db = seeded_db().await;
        let orch = build(
            Arc::new(NoResponseLog(db.clone())),
            StubGenerator::answering("Got it."),
        );
        db.create_educational_session(&EducationalSession::new("c6", "budget"))
            .await
            .unwrap();

        // Current chunk still unanswered: the reply belongs to its delivery.
        let reply = send(&orch, &body("c6", "hmm")).await;
        assert_eq!(reply.mode, ReplyMode::OpenEnded);
        assert_eq!(reply.delivery, DeliveryKind::Chunk);
        assert!(!reply.delivery.is_interruptible());

        // Once answered, a short acknowledgment is Q&A and may be interrupted.
        db.insert_chunk_response(&ChunkResponse::new("c6", "c0", "I budget weekly", ACKNOWLEDGMENT))
            .await
            .unwrap();
        let reply = send(&orch, &body("c6", "ok")).await;
        assert_eq!(reply.mode, ReplyMode::OpenEnded);
        assert_eq!(reply.delivery, DeliveryKind::Qa);
        assert!(reply.delivery.is_interruptible());

        let edu = db.get_educational_session("c6").await.unwrap().unwrap();
        assert_eq!(edu.current_chunk_index, 0);
    }

    #[tokio::test]
    async fn same_lone_answer_from_platform_turn_ids_advances() {
        let (orch, db) = orchestrator(StubGenerator::answering("unused")).await;
        db.create_educational_session(&EducationalSession::new("c7", "budget"))
            .await
            .unwrap();

        for turn_id in ["t1", "t2"] {
            let mut yes = body("c7", "yes");
            yes["variables"]["turn_id"] = json!(turn_id);
            let reply = send(&orch, &yes).await;
            assert_eq!(reply.mode, ReplyMode::Structured);
        }

        let edu = db.get_educational_session("c7").await.unwrap().unwrap();
        assert!(edu.completed);
        assert_eq!(db.list_chunk_responses("c7").await.unwrap().len(), 2);
    }
}
