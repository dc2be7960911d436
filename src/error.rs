//! Error types for the voice bridge.
//!
//! None of these ever reach the voice platform: the webhook boundary turns
//! every variant into a spoken fallback. They exist so the layers below can
//! propagate with `?` and so the boundary can log what went wrong.

use std::time::Duration;

/// Top-level error type for the bridge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Lesson error: {0}")]
    Lesson(#[from] LessonError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse lesson file {path}: {reason}")]
    LessonFile { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Request has no user turn to answer")]
    EmptyConversation,
}

/// Session identity resolution errors.
///
/// The resolver itself never returns these to its caller; they are what a
/// single pointer-store read can fail with.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Session pointer read failed: {0}")]
    PointerRead(String),

    #[error("Session pointer write failed: {0}")]
    PointerWrite(String),

    #[error("Session pointer is corrupt: {0}")]
    PointerCorrupt(String),
}

/// Structured lesson engine errors.
#[derive(Debug, thiserror::Error)]
pub enum LessonError {
    #[error("Educational session {0} not found")]
    SessionNotFound(String),

    #[error("Lesson {0} has no chunks")]
    EmptyLesson(String),

    #[error("Personalization failed: {0}")]
    Personalization(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Report generation errors.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Report generation is not configured")]
    NotConfigured,

    #[error("Report request for session {session_id} failed: {reason}")]
    RequestFailed { session_id: String, reason: String },

    #[error("Report generation timed out after {0:?}")]
    Timeout(Duration),
}

/// Outbound stream errors.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Client closed the stream before frame {frame} was written")]
    ClientClosed { frame: usize },

    #[error("Failed to serialize frame: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for the bridge.
pub type Result<T> = std::result::Result<T, Error>;
