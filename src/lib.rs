//! Voice Bridge: webhook conversation bridge for a real-time voice platform.

pub mod config;
pub mod conversation;
pub mod error;
pub mod identity;
pub mod lesson;
pub mod llm;
pub mod store;
pub mod stream;
pub mod voice;
pub mod webhook;
