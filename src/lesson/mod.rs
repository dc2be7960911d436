//! Structured lessons: models, the chunk progression engine, and its collaborators.

pub mod delivery;
pub mod engine;
pub mod model;
pub mod personalize;
pub mod report;
pub mod seed;

pub use delivery::classify_delivery;
pub use engine::{EducationalSessionEngine, EngineConfig, StructuredReply, TurnKey, TurnOutcome};
pub use model::{Chunk, ChunkResponse, DeliveryKind, EducationalSession, Lesson};
pub use personalize::{ContentPersonalizer, LlmPersonalizer, NoopPersonalizer};
pub use report::{HttpReportGenerator, ReportGenerator};
