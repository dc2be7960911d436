//! The "latest active session" pointer.
//!
//! A single shared record, last writer wins. Two concurrent conversations
//! that both rely on it can read each other's session.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::IdentityError;

/// Contents of the pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestSession {
    pub session_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl LatestSession {
    pub fn new(session_id: Uuid, conversation_id: Option<String>) -> Self {
        Self {
            session_id,
            conversation_id,
            updated_at: Utc::now(),
        }
    }
}

/// Storage for the latest-session pointer.
#[async_trait]
pub trait SessionPointerStore: Send + Sync {
    /// Current pointer, or `None` if nothing has been written yet.
    async fn read_latest(&self) -> Result<Option<LatestSession>, IdentityError>;

    /// Overwrite the pointer.
    async fn write_latest(&self, latest: &LatestSession) -> Result<(), IdentityError>;
}

/// Pointer persisted as a small JSON file.
pub struct FilePointerStore {
    path: PathBuf,
}

impl FilePointerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the parent directory so the first write cannot fail on it.
    pub async fn ensure_dir(&self) -> Result<(), IdentityError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| IdentityError::PointerWrite(format!("{}: {e}", parent.display())))?;
        }
        Ok(())
    }
}

#[async_trait]
impl SessionPointerStore for FilePointerStore {
    async fn read_latest(&self) -> Result<Option<LatestSession>, IdentityError> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(IdentityError::PointerRead(format!(
                    "{}: {e}",
                    self.path.display()
                )));
            }
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| IdentityError::PointerCorrupt(e.to_string()))
    }

    async fn write_latest(&self, latest: &LatestSession) -> Result<(), IdentityError> {
        let json = serde_json::to_string(latest)
            .map_err(|e| IdentityError::PointerWrite(e.to_string()))?;

        // Each write gets its own temp file beside the target; the rename is
        // the only step concurrent writers share.
        let tmp = self
            .path
            .with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        fs::write(&tmp, json)
            .await
            .map_err(|e| IdentityError::PointerWrite(format!("{}: {e}", tmp.display())))?;
        if let Err(e) = fs::rename(&tmp, &self.path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(IdentityError::PointerWrite(format!(
                "{}: {e}",
                self.path.display()
            )));
        }
        Ok(())
    }
}

/// In-process pointer, for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryPointerStore {
    latest: RwLock<Option<LatestSession>>,
}

impl MemoryPointerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionPointerStore for MemoryPointerStore {
    async fn read_latest(&self) -> Result<Option<LatestSession>, IdentityError> {
        Ok(self.latest.read().await.clone())
    }

    async fn write_latest(&self, latest: &LatestSession) -> Result<(), IdentityError> {
        *self.latest.write().await = Some(latest.clone());
        Ok(())
    }
}
