//! Chat-completion wire frames.

use serde::Serialize;

use crate::conversation::generator::CitedSource;
use crate::stream::voice_settings::VoiceSettings;

pub const CHUNK_OBJECT: &str = "chat.completion.chunk";
pub const COMPLETION_OBJECT: &str = "chat.completion";
pub const FINISH_STOP: &str = "stop";
pub const ASSISTANT_ROLE: &str = "assistant";

/// Interruption and tone hints on content-bearing frames.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMetadata {
    pub interruptible: bool,
    pub is_chunk_delivery: bool,
    pub voice_settings: VoiceSettings,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cited_sources: Vec<CitedSource>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: Delta,
    pub finish_reason: Option<&'static str>,
}

/// One `chat.completion.chunk` frame.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<FrameMetadata>,
}

impl ChatCompletionChunk {
    pub fn is_stop(&self) -> bool {
        self.choices
            .iter()
            .any(|c| c.finish_reason == Some(FINISH_STOP))
    }
}

/// Builds the frames of one response with a shared id, timestamp, and model.
#[derive(Debug, Clone)]
pub struct FrameFactory {
    id: String,
    created: i64,
    model: String,
}

impl FrameFactory {
    pub fn new(id: impl Into<String>, created: i64, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created,
            model: model.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created(&self) -> i64 {
        self.created
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn frame(
        &self,
        delta: Delta,
        finish_reason: Option<&'static str>,
        metadata: Option<FrameMetadata>,
    ) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: CHUNK_OBJECT,
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            metadata,
        }
    }

    /// `delta.role = "assistant"` with empty content.
    pub fn role(&self) -> ChatCompletionChunk {
        self.frame(
            Delta {
                role: Some(ASSISTANT_ROLE),
                content: Some(String::new()),
            },
            None,
            None,
        )
    }

    pub fn content(&self, text: impl Into<String>, metadata: FrameMetadata) -> ChatCompletionChunk {
        self.frame(
            Delta {
                role: None,
                content: Some(text.into()),
            },
            None,
            Some(metadata),
        )
    }

    /// Empty delta with `finish_reason = "stop"`.
    pub fn stop(&self) -> ChatCompletionChunk {
        self.frame(Delta::default(), Some(FINISH_STOP), None)
    }
}

// ── Non-streaming ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct CompletionMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionChoice {
    pub index: u32,
    pub message: CompletionMessage,
    pub finish_reason: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Single-object `chat.completion` response.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
    pub usage: Usage,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> FrameMetadata {
        FrameMetadata {
            interruptible: false,
            is_chunk_delivery: true,
            voice_settings: VoiceSettings::BALANCED,
            cited_sources: Vec::new(),
        }
    }

    #[test]
    fn role_frame_shape() {
        let factory = FrameFactory::new("chatcmpl-1", 100, "voice-bridge");
        let json = serde_json::to_value(factory.role()).unwrap();
        assert_eq!(json["object"], "chat.completion.chunk");
        assert_eq!(json["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(json["choices"][0]["delta"]["content"], "");
        assert!(json["choices"][0]["finish_reason"].is_null());
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn content_frame_carries_camel_case_metadata() {
        let factory = FrameFactory::new("chatcmpl-1", 100, "voice-bridge");
        let json = serde_json::to_value(factory.content("hello", metadata())).unwrap();
        assert_eq!(json["choices"][0]["delta"]["content"], "hello");
        assert_eq!(json["metadata"]["isChunkDelivery"], true);
        assert_eq!(json["metadata"]["interruptible"], false);
        assert_eq!(json["metadata"]["voiceSettings"]["speed"], 1.0);
        assert!(json["metadata"].get("citedSources").is_none());
    }

    #[test]
    fn stop_frame_has_empty_delta() {
        let factory = FrameFactory::new("chatcmpl-1", 100, "m");
        let stop = factory.stop();
        assert!(stop.is_stop());
        let json = serde_json::to_value(stop).unwrap();
        assert_eq!(json["choices"][0]["finish_reason"], "stop");
        assert_eq!(json["choices"][0]["delta"], serde_json::json!({}));
    }
}
