//! Turns a [`BridgeReply`] into SSE frames or a single completion object.

use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use chrono::Utc;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};
use uuid::Uuid;

use crate::config::StreamMode;
use crate::conversation::orchestrator::BridgeReply;
use crate::error::StreamError;
use crate::llm::provider::ChatMessage;
use crate::stream::frames::{
    ASSISTANT_ROLE, COMPLETION_OBJECT, ChatCompletion, ChatCompletionChunk, CompletionChoice,
    CompletionMessage, FINISH_STOP, FrameFactory, FrameMetadata, Usage,
};
use crate::stream::voice_settings::select_voice_settings;

/// Literal end-of-stream marker.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Buffered frames between the producer task and the HTTP body.
const CHANNEL_CAPACITY: usize = 32;

pub struct ResponseStreamAdapter {
    model_label: String,
    mode: StreamMode,
}

impl ResponseStreamAdapter {
    pub fn new(model_label: impl Into<String>, mode: StreamMode) -> Self {
        Self {
            model_label: model_label.into(),
            mode,
        }
    }

    fn factory(&self) -> FrameFactory {
        FrameFactory::new(
            format!("chatcmpl-{}", Uuid::new_v4().simple()),
            Utc::now().timestamp(),
            self.model_label.clone(),
        )
    }

    /// Role frame, content frame(s), stop frame.
    pub fn frames(&self, reply: &BridgeReply) -> Vec<ChatCompletionChunk> {
        let factory = self.factory();
        let metadata = FrameMetadata {
            interruptible: reply.delivery.is_interruptible(),
            is_chunk_delivery: reply.delivery.is_chunk_delivery(),
            voice_settings: select_voice_settings(&reply.text),
            cited_sources: reply.cited_sources.clone(),
        };

        let mut frames = vec![factory.role()];
        match self.mode {
            StreamMode::Burst => frames.push(factory.content(reply.text.clone(), metadata)),
            StreamMode::Paced { .. } => {
                for piece in paced_pieces(&reply.text) {
                    frames.push(factory.content(piece, metadata.clone()));
                }
            }
        }
        frames.push(factory.stop());
        frames
    }

    /// Start a producer task writing SSE payloads into a channel.
    ///
    /// Yields each frame's JSON, then [`DONE_SENTINEL`]. If the receiver goes
    /// away the producer stops quietly.
    pub fn spawn_payloads(&self, reply: &BridgeReply) -> mpsc::Receiver<String> {
        let frames = self.frames(reply);
        let delay = match self.mode {
            StreamMode::Burst => None,
            StreamMode::Paced { delay } => Some(delay),
        };
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let last = frames.len().saturating_sub(1);
            for (index, frame) in frames.iter().enumerate() {
                let payload = match serde_json::to_string(frame) {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!(error = %StreamError::from(e), frame = index, "Dropping frame");
                        continue;
                    }
                };
                if tx.send(payload).await.is_err() {
                    debug!(error = %StreamError::ClientClosed { frame: index }, "Stream ended early");
                    return;
                }
                if let Some(delay) = delay {
                    if index > 0 && index < last {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
            if tx.send(DONE_SENTINEL.to_string()).await.is_err() {
                debug!(
                    error = %StreamError::ClientClosed { frame: frames.len() },
                    "Stream ended before sentinel"
                );
            }
        });

        rx
    }

    /// SSE response body for a reply.
    pub fn sse(
        &self,
        reply: &BridgeReply,
    ) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>> + Send + use<>> {
        let stream = ReceiverStream::new(self.spawn_payloads(reply))
            .map(|payload| Ok(Event::default().data(payload)));
        Sse::new(stream).keep_alive(KeepAlive::default())
    }

    /// Non-streaming fallback: one `chat.completion` object.
    pub fn completion(&self, reply: &BridgeReply, prompt: &[ChatMessage]) -> ChatCompletion {
        let factory = self.factory();
        let prompt_chars: usize = prompt.iter().map(|m| m.content.chars().count()).sum();
        let prompt_tokens = estimate_tokens(prompt_chars);
        let completion_tokens = estimate_tokens(reply.text.chars().count());

        ChatCompletion {
            id: factory.id().to_string(),
            object: COMPLETION_OBJECT,
            created: factory.created(),
            model: factory.model().to_string(),
            choices: vec![CompletionChoice {
                index: 0,
                message: CompletionMessage {
                    role: ASSISTANT_ROLE,
                    content: reply.text.clone(),
                },
                finish_reason: FINISH_STOP,
            }],
            usage: Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
        }
    }
}

/// Roughly four characters per token, rounded up.
fn estimate_tokens(chars: usize) -> u32 {
    chars.div_ceil(4) as u32
}

/// Split text into word-sized pieces that concatenate back to the original
/// words, each after the first carrying its leading space.
fn paced_pieces(text: &str) -> Vec<String> {
    let pieces: Vec<String> = text
        .split_whitespace()
        .enumerate()
        .map(|(i, word)| {
            if i == 0 {
                word.to_string()
            } else {
                format!(" {word}")
            }
        })
        .collect();
    if pieces.is_empty() {
        vec![String::new()]
    } else {
        pieces
    }
}
