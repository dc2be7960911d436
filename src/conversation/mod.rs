//! Turn handling: request parsing, open-ended generation, orchestration.

pub mod generator;
pub mod orchestrator;
pub mod request;

pub use generator::{
    CitedSource, GeneratedReply, GenerationContext, GeneratorConfig, LlmResponseGenerator,
    ResponseGenerator,
};
pub use orchestrator::{
    APOLOGY, BridgeReply, ConversationOrchestrator, OrchestratorConfig, ReplyMode,
};
pub use request::InboundTurn;
