//! Client for the memo-generation collaborator.
//!
//! Assembles the award memo payload (project snapshot, leveling snapshots,
//! evaluation and compliance summaries) and returns the generated memo text.
//! The text is stored opaque; nothing downstream parses it.

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, instrument};

use crate::error::ApiError;

#[derive(Clone)]
pub struct MemoClient {
    client: Client,
    base_url: String,
    token: String,
}

/// Error response from the memo service.
#[derive(Debug, Deserialize)]
struct MemoErrorResponse {
    message: String,
}

/// Everything the memo service needs to draft an award recommendation memo.
/// Snapshots are passed as opaque JSON; the collaborator owns the prose.
#[derive(Debug, Serialize)]
pub struct AwardMemoPayload {
    pub project: serde_json::Value,
    pub leveling_snapshots: Vec<serde_json::Value>,
    pub evaluation_summary: serde_json::Value,
    pub compliance_summary: serde_json::Value,
}

impl MemoClient {
    pub fn new(base_url: &str, token: &str, timeout_seconds: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        tracing::info!(base_url = base_url, "Memo client initialized");

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Generate the award memo text for a recommendation.
    #[instrument(skip(self, payload))]
    pub async fn generate_award_memo(
        &self,
        payload: &AwardMemoPayload,
        request_id: Option<&str>,
    ) -> Result<String, ApiError> {
        let url = format!("{}/v1/memos/award", self.base_url);

        let mut req = self
            .client
            .post(&url)
            .header("X-Internal-Token", &self.token)
            .header("Content-Type", "application/json");

        if let Some(rid) = request_id {
            req = req.header("x-request-id", rid);
        }

        debug!(url = %url, "Memo service request");

        let response = req.json(payload).send().await.map_err(|e| {
            error!(error = %e, "Memo service request failed");
            ApiError::Internal(anyhow::anyhow!("Memo service unavailable: {}", e))
        })?;

        let status = response.status();

        if status.is_success() {
            #[derive(Deserialize)]
            struct Response {
                memo: String,
            }

            let body: Response = response.json().await.map_err(|e| {
                error!(error = %e, "Failed to parse memo service response");
                ApiError::Internal(anyhow::anyhow!("Invalid memo service response: {}", e))
            })?;
            Ok(body.memo)
        } else {
            let message = response
                .json::<MemoErrorResponse>()
                .await
                .ok()
                .map(|e| e.message)
                .unwrap_or_else(|| format!("Memo service error: {status}"));

            match status {
                StatusCode::BAD_REQUEST => Err(ApiError::BadRequest(message)),
                StatusCode::UNAUTHORIZED => {
                    error!("Memo service authentication failed");
                    Err(ApiError::Internal(anyhow::anyhow!("Memo service auth error")))
                }
                _ => {
                    error!(status = %status, message = %message, "Memo service error");
                    Err(ApiError::Internal(anyhow::anyhow!(message)))
                }
            }
        }
    }

    /// Check memo service health.
    pub async fn health_check(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);

        self.client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .context("Memo service health check failed")?
            .error_for_status()
            .context("Memo service unhealthy")?;

        Ok(())
    }
}
