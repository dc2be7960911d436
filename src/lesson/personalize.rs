//! Chunk content personalization.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::LessonError;
use crate::lesson::model::ChunkResponse;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};

/// Rewrites a chunk's content template for a specific caller.
#[async_trait]
pub trait ContentPersonalizer: Send + Sync {
    /// Personalize `content` using what the caller has said so far.
    async fn personalize(
        &self,
        content: &str,
        prior_responses: &[ChunkResponse],
    ) -> Result<String, LessonError>;
}

/// Returns content untouched.
pub struct NoopPersonalizer;

#[async_trait]
impl ContentPersonalizer for NoopPersonalizer {
    async fn personalize(
        &self,
        content: &str,
        _prior_responses: &[ChunkResponse],
    ) -> Result<String, LessonError> {
        Ok(content.to_string())
    }
}

/// Personalizes content with an LLM, grounded on the caller's earlier answers.
pub struct LlmPersonalizer {
    llm: Arc<dyn LlmProvider>,
    max_tokens: u32,
}

impl LlmPersonalizer {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            max_tokens: 600,
        }
    }
}

#[async_trait]
impl ContentPersonalizer for LlmPersonalizer {
    async fn personalize(
        &self,
        content: &str,
        prior_responses: &[ChunkResponse],
    ) -> Result<String, LessonError> {
        // Nothing to personalize against yet.
        if prior_responses.is_empty() {
            return Ok(content.to_string());
        }

        let answers = prior_responses
            .iter()
            .map(|r| format!("- {}", r.user_response))
            .collect::<Vec<_>>()
            .join("\n");

        let system_prompt = "You adapt spoken lesson content to a listener. Keep every fact \
             and the overall length. Where it helps, relate examples to what the listener \
             has told you. The text will be read aloud: no markdown, no lists, no headings. \
             Output only the adapted content.";

        let user_prompt = format!(
            "What the listener has said so far:\n{answers}\n\nLesson content:\n{content}"
        );

        let request = CompletionRequest::new(vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(user_prompt),
        ])
        .with_temperature(0.4)
        .with_max_tokens(self.max_tokens);

        let response = self
            .llm
            .complete(request)
            .await
            .map_err(|e| LessonError::Personalization(e.to_string()))?;

        let adapted = response.content.trim();
        if adapted.is_empty() {
            return Err(LessonError::Personalization(
                "model returned empty content".to_string(),
            ));
        }

        debug!(
            model = self.llm.model_name(),
            original_len = content.len(),
            adapted_len = adapted.len(),
            "Personalized chunk content"
        );
        Ok(adapted.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::provider::CompletionResponse;

    struct FixedLlm(&'static str);

    #[async_trait]
    impl LlmProvider for FixedLlm {
        fn model_name(&self) -> &str {
            "fixed"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            assert!(request.messages[1].content.contains("I rent"));
            Ok(CompletionResponse {
                content: self.0.to_string(),
                input_tokens: 0,
                output_tokens: 0,
            })
        }
    }

    fn answer(text: &str) -> ChunkResponse {
        ChunkResponse::new("s", "c", text, "ack")
    }

    #[tokio::test]
    async fn noop_returns_raw_content() {
        let out = NoopPersonalizer
            .personalize("raw", &[answer("anything")])
            .await
            .unwrap();
        assert_eq!(out, "raw");
    }

    #[tokio::test]
    async fn llm_personalizer_uses_model_output() {
        let p = LlmPersonalizer::new(Arc::new(FixedLlm("  adapted for a renter  ")));
        let out = p.personalize("raw", &[answer("I rent")]).await.unwrap();
        assert_eq!(out, "adapted for a renter");
    }

    #[tokio::test]
    async fn llm_personalizer_rejects_empty_output() {
        let p = LlmPersonalizer::new(Arc::new(FixedLlm("   ")));
        let result = p.personalize("raw", &[answer("I rent")]).await;
        assert!(matches!(result, Err(LessonError::Personalization(_))));
    }

    #[tokio::test]
    async fn llm_personalizer_skips_without_history() {
        let p = LlmPersonalizer::new(Arc::new(FixedLlm("unused")));
        assert_eq!(p.personalize("raw", &[]).await.unwrap(), "raw");
    }
}
