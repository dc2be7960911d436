//! Bridges rig-core completion models to our `LlmProvider` trait.

use async_trait::async_trait;
use rig::agent::AgentBuilder;
use rig::completion::{Chat, CompletionModel, Message};

use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, CompletionRequest, CompletionResponse, LlmProvider, Role};

/// Default output budget; Anthropic rejects requests without one.
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Wraps a rig `CompletionModel` behind `LlmProvider`.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
}

impl<M> RigAdapter<M>
where
    M: CompletionModel + Clone + Send + Sync + 'static,
{
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
        }
    }
}

/// Split our flat message list into (preamble, history, prompt) as rig expects.
///
/// System messages are concatenated into the preamble. The last user message
/// becomes the prompt; everything between is history.
fn split_messages(messages: &[ChatMessage]) -> Result<(String, Vec<Message>, String), LlmError> {
    let preamble = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let turns: Vec<&ChatMessage> = messages.iter().filter(|m| m.role != Role::System).collect();
    let last_user = turns
        .iter()
        .rposition(|m| m.role == Role::User)
        .ok_or(LlmError::EmptyConversation)?;

    let history = turns[..last_user]
        .iter()
        .map(|m| match m.role {
            Role::Assistant => Message::assistant(m.content.clone()),
            _ => Message::user(m.content.clone()),
        })
        .collect();

    Ok((preamble, history, turns[last_user].content.clone()))
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Clone + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let (preamble, history, prompt) = split_messages(&request.messages)?;

        let mut builder = AgentBuilder::new(self.model.clone())
            .preamble(&preamble)
            .max_tokens(request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS) as u64);
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(temperature as f64);
        }
        let agent = builder.build();

        let content = agent
            .chat(prompt, history)
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: self.model_name.clone(),
                reason: e.to_string(),
            })?;

        Ok(CompletionResponse {
            content,
            input_tokens: 0,
            output_tokens: 0,
        })
    }
}
