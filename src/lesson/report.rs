//! Lesson completion reports.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::error::ReportError;

/// Produces a report for a completed educational session.
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    /// Generate a report and return its id.
    async fn generate(&self, session_id: &str) -> Result<String, ReportError>;
}

/// Report generator backed by an HTTP report service.
///
/// POSTs `{"session_id": ...}` and expects `{"report_id": ...}` (or `{"id": ...}`)
/// back. Without a URL every call fails with [`ReportError::NotConfigured`].
pub struct HttpReportGenerator {
    client: reqwest::Client,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReportReply {
    #[serde(alias = "id")]
    report_id: String,
}

impl HttpReportGenerator {
    pub fn new(url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }
}

#[async_trait]
impl ReportGenerator for HttpReportGenerator {
    async fn generate(&self, session_id: &str) -> Result<String, ReportError> {
        let url = self.url.as_deref().ok_or(ReportError::NotConfigured)?;
        let failed = |reason: String| ReportError::RequestFailed {
            session_id: session_id.to_string(),
            reason,
        };

        let resp = self
            .client
            .post(url)
            .json(&serde_json::json!({ "session_id": session_id }))
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(failed(format!("HTTP {status}: {body}")));
        }

        let reply: ReportReply = resp
            .json()
            .await
            .map_err(|e| failed(format!("invalid reply: {e}")))?;

        info!(session_id, report_id = %reply.report_id, "Report generated");
        Ok(reply.report_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_generator_fails_fast() {
        let generator = HttpReportGenerator::new(None);
        assert!(!generator.is_configured());
        assert!(matches!(
            generator.generate("conv-1").await,
            Err(ReportError::NotConfigured)
        ));
    }

    #[test]
    fn reply_accepts_id_alias() {
        let reply: ReportReply = serde_json::from_str(r#"{"id": "r-1"}"#).unwrap();
        assert_eq!(reply.report_id, "r-1");
        let reply: ReportReply = serde_json::from_str(r#"{"report_id": "r-2"}"#).unwrap();
        assert_eq!(reply.report_id, "r-2");
    }
}
