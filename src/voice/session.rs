//! Voice session model: the ephemeral identity record for one caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata key linking a voice session to its educational session.
pub const EDUCATIONAL_SESSION_KEY: &str = "educational_session_id";

/// Who spoke a recorded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Agent,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
        }
    }
}

impl std::str::FromStr for Speaker {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "agent" => Ok(Self::Agent),
            other => Err(format!("unknown speaker: {other}")),
        }
    }
}

/// A single recorded utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceMessage {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub speaker: Speaker,
}

impl VoiceMessage {
    pub fn new(speaker: Speaker, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            speaker,
        }
    }
}

/// A logical voice conversation.
///
/// Append-only: sessions are never deleted, a newer session for the same
/// caller simply supersedes the old one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceSession {
    pub id: Uuid,
    /// Platform-assigned conversation id, when the platform supplied one.
    pub conversation_id: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub messages: Vec<VoiceMessage>,
    pub metadata: serde_json::Value,
}

impl VoiceSession {
    /// Create a fresh session, optionally bound to a platform conversation id.
    pub fn new(conversation_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            registered_at: now,
            last_activity: now,
            messages: Vec::new(),
            metadata: serde_json::json!({}),
        }
    }

    /// The key used to correlate this session with an educational session:
    /// the platform conversation id, or the session's own id when absent.
    pub fn conversation_key(&self) -> String {
        self.conversation_id
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }

    /// The educational session referenced from metadata, if any.
    pub fn educational_session_id(&self) -> Option<&str> {
        self.metadata
            .get(EDUCATIONAL_SESSION_KEY)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_key_prefers_platform_id() {
        let session = VoiceSession::new(Some("conv-1".to_string()));
        assert_eq!(session.conversation_key(), "conv-1");

        let anonymous = VoiceSession::new(None);
        assert_eq!(anonymous.conversation_key(), anonymous.id.to_string());
    }

    #[test]
    fn educational_session_id_reads_metadata() {
        let mut session = VoiceSession::new(None);
        assert!(session.educational_session_id().is_none());

        session.metadata = serde_json::json!({ EDUCATIONAL_SESSION_KEY: "edu-42" });
        assert_eq!(session.educational_session_id(), Some("edu-42"));

        session.metadata = serde_json::json!({ EDUCATIONAL_SESSION_KEY: "" });
        assert!(session.educational_session_id().is_none());
    }

    #[test]
    fn speaker_parses_db_strings() {
        assert_eq!("user".parse::<Speaker>().unwrap(), Speaker::User);
        assert_eq!("agent".parse::<Speaker>().unwrap(), Speaker::Agent);
        assert!("robot".parse::<Speaker>().is_err());
        assert_eq!(Speaker::Agent.as_str(), "agent");
    }
}
