//! Lesson seed file loading.
//!
//! The file is a JSON array of lessons:
//!
//! ```json
//! [{"id": "budgeting-101", "title": "Budgeting basics",
//!   "chunks": [{"title": "...", "content": "...", "question": "..."}]}]
//! ```
//!
//! Chunk `id` and `order_index` are optional and default to
//! `<lesson>-<n>` and the position in the array.

use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::error::ConfigError;
use crate::lesson::model::{Chunk, Lesson};
use crate::store::Database;

#[derive(Debug, Deserialize)]
struct LessonSeed {
    id: String,
    title: String,
    chunks: Vec<ChunkSeed>,
}

#[derive(Debug, Deserialize)]
struct ChunkSeed {
    id: Option<String>,
    order_index: Option<u32>,
    title: String,
    content: String,
    question: String,
}

impl LessonSeed {
    fn into_lesson(self) -> Lesson {
        let chunks = self
            .chunks
            .into_iter()
            .enumerate()
            .map(|(i, c)| Chunk {
                id: c.id.unwrap_or_else(|| format!("{}-{}", self.id, i + 1)),
                lesson_id: self.id.clone(),
                order_index: c.order_index.unwrap_or(i as u32),
                title: c.title,
                content: c.content,
                question: c.question,
            })
            .collect();
        Lesson {
            id: self.id,
            title: self.title,
            chunks,
        }
    }
}

/// Parse lessons from seed JSON.
pub fn parse_lessons(json: &str, origin: &str) -> Result<Vec<Lesson>, ConfigError> {
    let seeds: Vec<LessonSeed> =
        serde_json::from_str(json).map_err(|e| ConfigError::LessonFile {
            path: origin.to_string(),
            reason: e.to_string(),
        })?;

    seeds
        .into_iter()
        .map(|seed| {
            if seed.chunks.is_empty() {
                return Err(ConfigError::LessonFile {
                    path: origin.to_string(),
                    reason: format!("lesson '{}' has no chunks", seed.id),
                });
            }
            Ok(seed.into_lesson())
        })
        .collect()
}

/// Load a seed file and upsert every lesson in it. Returns the lesson count.
pub async fn load_lessons_file(path: &Path, db: &dyn Database) -> crate::error::Result<usize> {
    let json = tokio::fs::read_to_string(path)
        .await
        .map_err(ConfigError::Io)?;
    let lessons = parse_lessons(&json, &path.display().to_string())?;

    for lesson in &lessons {
        db.upsert_lesson(lesson).await?;
    }

    info!(path = %path.display(), count = lessons.len(), "Lessons loaded");
    Ok(lessons.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;

    const SEED: &str = r#"[
        {"id": "budget", "title": "Budgeting", "chunks": [
            {"title": "Income", "content": "Know your income.", "question": "What do you earn?"},
            {"id": "custom", "title": "Costs", "content": "List costs.", "question": "Biggest cost?"}
        ]}
    ]"#;

    #[test]
    fn defaults_chunk_ids_and_order() {
        let lessons = parse_lessons(SEED, "inline").unwrap();
        let chunks = &lessons[0].chunks;
        assert_eq!(chunks[0].id, "budget-1");
        assert_eq!(chunks[0].order_index, 0);
        assert_eq!(chunks[1].id, "custom");
        assert_eq!(chunks[1].order_index, 1);
        assert_eq!(chunks[1].lesson_id, "budget");
    }

    #[test]
    fn rejects_empty_lessons_and_bad_json() {
        let empty = r#"[{"id": "x", "title": "X", "chunks": []}]"#;
        assert!(matches!(
            parse_lessons(empty, "inline"),
            Err(ConfigError::LessonFile { .. })
        ));
        assert!(parse_lessons("{", "inline").is_err());
    }

    #[tokio::test]
    async fn loads_file_into_database() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("lessons.json");
        std::fs::write(&path, SEED).unwrap();

        let db = LibSqlBackend::new_memory().await.unwrap();
        let count = load_lessons_file(&path, &db).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(db.get_chunks_for_lesson("budget").await.unwrap().len(), 2);
    }
}
