//! Session identity resolution: carrier chain first, pointer fallback second.

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::identity::carriers::{IdentityCarrier, default_carriers, first_match};
use crate::identity::pointer::{LatestSession, SessionPointerStore};

/// Where a resolved identity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    /// A request carrier, named by its label.
    Carrier(&'static str),
    /// The persisted latest-session pointer.
    Pointer,
}

/// A resolved logical conversation identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub conversation_id: Option<String>,
    /// Known voice session id, when the source carries one.
    pub session_id: Option<Uuid>,
    pub source: IdentitySource,
}

/// Resolves which logical session an inbound webhook belongs to.
///
/// Resolution never mutates state. Callers register new sessions and
/// update the pointer themselves via [`SessionIdentityResolver::record_latest`].
pub struct SessionIdentityResolver {
    carriers: Vec<Box<dyn IdentityCarrier>>,
    pointer: Arc<dyn SessionPointerStore>,
    max_retries: u32,
    backoff_base: Duration,
}

impl SessionIdentityResolver {
    pub fn new(
        pointer: Arc<dyn SessionPointerStore>,
        max_retries: u32,
        backoff_base: Duration,
    ) -> Self {
        Self {
            carriers: default_carriers(),
            pointer,
            max_retries,
            backoff_base,
        }
    }

    /// Replace the carrier chain.
    pub fn with_carriers(mut self, carriers: Vec<Box<dyn IdentityCarrier>>) -> Self {
        self.carriers = carriers;
        self
    }

    /// Resolve from request carriers, falling back to the latest-session
    /// pointer with the configured retry budget.
    pub async fn resolve_identity(&self, headers: &HeaderMap, body: &Value) -> Option<Identity> {
        if let Some((conversation_id, source)) = first_match(&self.carriers, headers, body) {
            debug!(conversation_id = %conversation_id, source, "Identity from carrier");
            return Some(Identity {
                conversation_id: Some(conversation_id),
                session_id: body_session_id(body),
                source: IdentitySource::Carrier(source),
            });
        }

        self.resolve_latest_session(self.max_retries, self.backoff_base)
            .await
    }

    /// Read the latest-session pointer up to `max_retries` times.
    ///
    /// After a miss (empty pointer or read error) on attempt `n`, waits
    /// `backoff_base * 2^n` before the next attempt. There is no wait after
    /// the final attempt. Returns `None` when every attempt misses.
    pub async fn resolve_latest_session(
        &self,
        max_retries: u32,
        backoff_base: Duration,
    ) -> Option<Identity> {
        for attempt in 0..max_retries {
            match self.pointer.read_latest().await {
                Ok(Some(latest)) => {
                    debug!(session_id = %latest.session_id, attempt, "Identity from pointer");
                    return Some(Identity {
                        conversation_id: latest.conversation_id,
                        session_id: Some(latest.session_id),
                        source: IdentitySource::Pointer,
                    });
                }
                Ok(None) => debug!(attempt, "Session pointer empty"),
                Err(e) => warn!(attempt, error = %e, "Session pointer read failed"),
            }

            if attempt + 1 < max_retries {
                tokio::time::sleep(backoff_delay(backoff_base, attempt)).await;
            }
        }

        debug!(max_retries, "No identity resolved");
        None
    }

    /// Point "latest session" at this session. Failures are logged only.
    pub async fn record_latest(&self, session_id: Uuid, conversation_id: Option<String>) {
        let latest = LatestSession::new(session_id, conversation_id);
        if let Err(e) = self.pointer.write_latest(&latest).await {
            warn!(session_id = %session_id, error = %e, "Failed to update session pointer");
        }
    }
}

/// `base * 2^attempt`, saturating.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

/// `variables.session_id`, when it is a voice session UUID.
fn body_session_id(body: &Value) -> Option<Uuid> {
    body.get("variables")
        .and_then(|v| v.get("session_id"))
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
}
