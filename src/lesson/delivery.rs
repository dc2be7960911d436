//! Text-shape classification of outgoing replies.
//!
//! Structured turns know their [`DeliveryKind`] from the transition they
//! took. Replies that did not come from a transition (open-ended answers)
//! are classified here instead.

use std::sync::LazyLock;

use regex::Regex;

use crate::lesson::model::DeliveryKind;

/// Replies longer than this read as new lesson content.
pub const CHUNK_LENGTH_THRESHOLD: usize = 300;

/// Markers that separate sections of lesson content.
const SECTION_SEPARATORS: &[&str] = &["---", "***", "###", "═"];

/// A blank line followed by a capitalised sentence: a new paragraph.
static NEW_PARAGRAPH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n\s*[A-Z]").expect("paragraph pattern is valid"));

/// Whether `text` looks like newly delivered educational content.
pub fn looks_like_new_content(text: &str) -> bool {
    SECTION_SEPARATORS.iter().any(|sep| text.contains(sep))
        || NEW_PARAGRAPH.is_match(text)
        || text.chars().count() > CHUNK_LENGTH_THRESHOLD
}

/// Classify a reply.
///
/// `current_chunk_unanswered` is true when a lesson is in progress and no
/// response has been logged for its current chunk yet.
pub fn classify_delivery(text: &str, current_chunk_unanswered: bool) -> DeliveryKind {
    if current_chunk_unanswered || looks_like_new_content(text) {
        DeliveryKind::Chunk
    } else {
        DeliveryKind::Qa
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_answer_is_qa() {
        assert_eq!(
            classify_delivery("Yes, that's right. Compound interest grows faster.", false),
            DeliveryKind::Qa
        );
    }

    #[test]
    fn unanswered_chunk_forces_chunk_delivery() {
        assert_eq!(classify_delivery("ok", true), DeliveryKind::Chunk);
    }

    #[test]
    fn separators_mark_new_content() {
        for text in ["Intro --- next", "### Budgets", "a *** b", "═══"] {
            assert_eq!(classify_delivery(text, false), DeliveryKind::Chunk, "{text}");
        }
    }

    #[test]
    fn paragraph_then_capital_marks_new_content() {
        assert!(looks_like_new_content("Good point.\n\nNow let's look at savings."));
        assert!(!looks_like_new_content("Good point.\n\nand more"));
        assert!(!looks_like_new_content("single line"));
    }

    #[test]
    fn length_threshold_is_exclusive() {
        let at = "a".repeat(CHUNK_LENGTH_THRESHOLD);
        let over = "a".repeat(CHUNK_LENGTH_THRESHOLD + 1);
        assert_eq!(classify_delivery(&at, false), DeliveryKind::Qa);
        assert_eq!(classify_delivery(&over, false), DeliveryKind::Chunk);
    }
}
