//! Voice session records.

pub mod session;

pub use session::{EDUCATIONAL_SESSION_KEY, Speaker, VoiceMessage, VoiceSession};
