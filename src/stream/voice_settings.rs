//! Voice tone presets chosen from reply text.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Synthesis parameters forwarded to the voice platform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    pub stability: f32,
    pub similarity: f32,
    pub style: f32,
    pub speed: f32,
}

impl VoiceSettings {
    /// Neutral delivery.
    pub const BALANCED: Self = Self {
        stability: 0.5,
        similarity: 0.75,
        style: 0.3,
        speed: 1.0,
    };

    /// Upbeat delivery for positive or exclamatory replies.
    pub const BRIGHT: Self = Self {
        stability: 0.35,
        similarity: 0.8,
        style: 0.6,
        speed: 1.1,
    };

    /// Steady, slower delivery for replies about difficulty or concern.
    pub const CALM: Self = Self {
        stability: 0.7,
        similarity: 0.8,
        style: 0.2,
        speed: 0.9,
    };
}

static CONCERN_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(difficult|challenging|hard|sorry|worr(y|ied|ies|ying)|concern(s|ed|ing)?|struggl(e|es|ed|ing))\b")
        .expect("concern pattern is valid")
});

static POSITIVE_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(great|excellent|wonderful|congratulations|amazing|fantastic|well done)\b")
        .expect("positive pattern is valid")
});

/// Pick a preset for `text`. Concern outranks positivity.
pub fn select_voice_settings(text: &str) -> VoiceSettings {
    if CONCERN_WORDS.is_match(text) {
        VoiceSettings::CALM
    } else if text.contains('!') || POSITIVE_WORDS.is_match(text) {
        VoiceSettings::BRIGHT
    } else {
        VoiceSettings::BALANCED
    }
}
