//! Lenient view of the inbound webhook body.
//!
//! The voice platform's payloads vary between agents and versions, so
//! nothing here is allowed to fail: missing or malformed fields are simply
//! absent.

use serde::Deserialize;
use serde_json::Value;

use crate::lesson::engine::TurnKey;
use crate::llm::provider::{ChatMessage, Role};

/// Known entries of the `variables` bag. Anything else is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Variables {
    pub conversation_id: Option<String>,
    pub session_id: Option<String>,
    pub current_topic: Option<String>,
    pub lesson_id: Option<String>,
    pub personalization: Option<bool>,
    /// Platform-assigned id of this turn, when the agent is set up to send one.
    pub turn_id: Option<String>,
}

/// One inbound webhook turn.
#[derive(Debug, Clone, Default)]
pub struct InboundTurn {
    pub messages: Vec<ChatMessage>,
    pub variables: Variables,
    /// Body-level `lesson_id`, checked after `variables.lesson_id`.
    pub lesson_id: Option<String>,
    /// `stream: false` asks for a single JSON completion instead of SSE.
    pub stream: bool,
}

impl InboundTurn {
    pub fn from_body(body: &Value) -> Self {
        let messages = body
            .get("messages")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(parse_message).collect())
            .unwrap_or_default();

        let variables = body
            .get("variables")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        Self {
            messages,
            variables,
            lesson_id: non_empty_str(body.get("lesson_id")),
            stream: body.get("stream").and_then(Value::as_bool).unwrap_or(true),
        }
    }

    /// The most recent user utterance, trimmed.
    pub fn latest_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.trim())
            .filter(|s| !s.is_empty())
    }

    /// Number of user turns in the conversation so far.
    pub fn user_turns(&self) -> usize {
        self.messages.iter().filter(|m| m.role == Role::User).count()
    }

    /// Lesson the caller asked to start, if any.
    pub fn requested_lesson(&self) -> Option<&str> {
        self.variables
            .lesson_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or(self.lesson_id.as_deref())
    }

    /// Idempotency key for the latest user turn.
    pub fn turn_key(&self, user_text: &str) -> TurnKey {
        match self
            .variables
            .turn_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
        {
            Some(id) => TurnKey::from_turn_id(id),
            None => TurnKey::from_history(self.user_turns(), user_text),
        }
    }

    pub fn current_topic(&self) -> Option<String> {
        self.variables
            .current_topic
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

fn parse_message(value: &Value) -> Option<ChatMessage> {
    let role = match value.get("role")?.as_str()? {
        "system" => Role::System,
        "user" => Role::User,
        "assistant" => Role::Assistant,
        _ => return None,
    };
    let content = value.get("content")?.as_str()?.to_string();
    Some(ChatMessage { role, content })
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_typical_body() {
        let body = json!({
            "messages": [
                {"role": "system", "content": "be nice"},
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"},
                {"role": "user", "content": "  teach me  "}
            ],
            "variables": {"conversation_id": "c1", "lesson_id": "budget", "extra": 1},
            "stream": false
        });
        let turn = InboundTurn::from_body(&body);
        assert_eq!(turn.messages.len(), 4);
        assert_eq!(turn.latest_user_text(), Some("teach me"));
        assert_eq!(turn.user_turns(), 2);
        assert_eq!(turn.requested_lesson(), Some("budget"));
        assert!(!turn.stream);
    }

    #[test]
    fn malformed_parts_are_dropped() {
        let body = json!({
            "messages": [
                {"role": "tool", "content": "x"},
                {"role": "user", "content": ["not", "text"]},
                {"role": "user"},
                "garbage"
            ],
            "variables": "not an object"
        });
        let turn = InboundTurn::from_body(&body);
        assert!(turn.messages.is_empty());
        assert!(turn.latest_user_text().is_none());
        assert!(turn.variables.conversation_id.is_none());
        assert!(turn.stream);
    }

    #[test]
    fn body_lesson_id_is_fallback() {
        let turn = InboundTurn::from_body(&json!({"lesson_id": "savings", "variables": {"lesson_id": " "}}));
        assert_eq!(turn.requested_lesson(), Some("savings"));
    }

    #[test]
    fn turn_id_takes_precedence_for_turn_key() {
        let with_id = InboundTurn::from_body(&json!({
            "messages": [{"role": "user", "content": "yes"}],
            "variables": {"turn_id": "t-42"}
        }));
        let key = with_id.turn_key("yes");
        assert_eq!(key.as_str(), "id:t-42");
        assert!(key.is_distinct());

        let lone = InboundTurn::from_body(&json!({
            "messages": [{"role": "user", "content": "yes"}]
        }));
        assert!(!lone.turn_key("yes").is_distinct());
    }

    #[test]
    fn non_object_body_is_empty_turn() {
        let turn = InboundTurn::from_body(&json!(null));
        assert!(turn.messages.is_empty());
        assert!(turn.requested_lesson().is_none());
    }
}
