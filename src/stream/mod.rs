//! Outbound wire protocol: chat-completion chunk frames over SSE.

pub mod adapter;
pub mod frames;
pub mod voice_settings;

pub use adapter::{DONE_SENTINEL, ResponseStreamAdapter};
pub use voice_settings::{VoiceSettings, select_voice_settings};
