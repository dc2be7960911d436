//! Open-ended reply generation.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider, Role};

/// A source the reply drew on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitedSource {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Generated reply text plus its citations.
#[derive(Debug, Clone, Default)]
pub struct GeneratedReply {
    pub text: String,
    pub cited_sources: Vec<CitedSource>,
}

/// Extra context for a generation call.
#[derive(Debug, Clone, Default)]
pub struct GenerationContext {
    /// Title of a lesson the caller has finished or is working through.
    pub lesson_title: Option<String>,
    /// `variables.current_topic` from the webhook.
    pub current_topic: Option<String>,
}

/// Answers free-form turns.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(
        &self,
        turns: &[ChatMessage],
        context: &GenerationContext,
    ) -> Result<GeneratedReply, LlmError>;
}

/// Configuration for LLM-backed generation.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            temperature: 0.5,
            max_tokens: 400,
        }
    }
}

/// Generates spoken answers with an LLM.
///
/// The model is asked for `{"reply": ..., "sources": [...]}`. Output that is
/// not that shape is spoken as-is with no citations.
pub struct LlmResponseGenerator {
    llm: Arc<dyn LlmProvider>,
    config: GeneratorConfig,
}

impl LlmResponseGenerator {
    pub fn new(llm: Arc<dyn LlmProvider>, config: GeneratorConfig) -> Self {
        Self { llm, config }
    }

    fn system_prompt(context: &GenerationContext) -> String {
        let mut prompt = String::from(
            "You are a friendly financial education guide speaking with someone on a \
             voice call. Answer in two to four short spoken sentences. No markdown, no \
             lists, no headings.\n\n\
             Respond with a JSON object:\n\
             - \"reply\": what you will say\n\
             - \"sources\": array of {\"title\", \"url\"} you relied on, or []\n\n\
             ONLY output the JSON object. No other text.",
        );
        if let Some(title) = &context.lesson_title {
            prompt.push_str(&format!("\n\nThe caller is studying the lesson \"{title}\"."));
        }
        if let Some(topic) = &context.current_topic {
            prompt.push_str(&format!("\nCurrent topic: {topic}."));
        }
        prompt
    }
}

#[async_trait]
impl ResponseGenerator for LlmResponseGenerator {
    async fn generate(
        &self,
        turns: &[ChatMessage],
        context: &GenerationContext,
    ) -> Result<GeneratedReply, LlmError> {
        let mut messages = vec![ChatMessage::system(Self::system_prompt(context))];
        messages.extend(turns.iter().filter(|m| m.role != Role::System).cloned());

        let request = CompletionRequest::new(messages)
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens);

        let response = self.llm.complete(request).await?;
        let reply = parse_reply(&response.content);

        if reply.text.trim().is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.llm.model_name().to_string(),
                reason: "empty reply".to_string(),
            });
        }

        debug!(
            model = self.llm.model_name(),
            sources = reply.cited_sources.len(),
            "Generated open-ended reply"
        );
        Ok(reply)
    }
}

#[derive(Debug, Deserialize)]
struct ReplyJson {
    reply: String,
    #[serde(default)]
    sources: Vec<CitedSource>,
}

/// Parse model output into a reply, tolerating markdown fences and prose.
fn parse_reply(raw: &str) -> GeneratedReply {
    let json_str = extract_json_object(raw);
    match serde_json::from_str::<ReplyJson>(json_str) {
        Ok(parsed) => GeneratedReply {
            text: parsed.reply.trim().to_string(),
            cited_sources: parsed.sources,
        },
        Err(e) => {
            warn!(error = %e, "Model reply was not JSON, speaking it verbatim");
            GeneratedReply {
                text: raw.trim().to_string(),
                cited_sources: Vec::new(),
            }
        }
    }
}

/// Extract a JSON object from LLM output that might contain markdown or extra text.
fn extract_json_object(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.starts_with('{') {
        return trimmed;
    }
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            return &trimmed[start..=end];
        }
    }
    trimmed
}
