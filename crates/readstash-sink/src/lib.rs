//! Sink adapter: best-effort, one-at-a-time submission to the save API.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use readstash_core::{CandidateItem, SubmitOutcome, SubmitStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "readstash-sink";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("http status {0}")]
    HttpStatus(u16),
    #[error("save api error codes: {}", .0.join(", "))]
    ErrorCodes(Vec<String>),
}

/// Submission seam. One attempt per item; an error is final for this run and
/// the item stays in the diff set for the next trigger.
#[async_trait]
pub trait SaveSink: Send + Sync {
    async fn save(&self, item: &CandidateItem, client_request_id: Uuid) -> Result<(), SinkError>;
}

/// Per-item outcomes for one source, in submission order.
#[derive(Debug, Clone, Default)]
pub struct SubmitReport {
    pub outcomes: Vec<SubmitOutcome>,
}

impl SubmitReport {
    /// Accepted URLs as an ordered subsequence of what was submitted.
    pub fn accepted(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.is_accepted())
            .map(|outcome| outcome.url.clone())
            .collect()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.accepted().len()
    }
}

/// Submits each item sequentially with a fresh idempotency token. Failures
/// are recorded, never propagated; the caller decides ledger updates from
/// the outcomes.
pub async fn submit_all(
    sink: &dyn SaveSink,
    items: &[String],
    labels: &[String],
) -> SubmitReport {
    let mut report = SubmitReport::default();

    for url in items {
        let item = CandidateItem {
            url: url.clone(),
            labels: labels.to_vec(),
        };
        let client_request_id = Uuid::new_v4();

        let status = match sink.save(&item, client_request_id).await {
            Ok(()) => {
                info!(%url, %client_request_id, "saved item");
                SubmitStatus::Accepted
            }
            Err(err) => {
                warn!(%url, %client_request_id, %err, "save failed, item stays in diff set");
                SubmitStatus::Failed {
                    reason: err.to_string(),
                }
            }
        };
        report.outcomes.push(SubmitOutcome {
            url: url.clone(),
            status,
        });
    }

    report
}

#[derive(Debug, Clone)]
pub struct SaveApiConfig {
    pub endpoint: String,
    pub token: String,
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SaveRequest<'a> {
    url: &'a str,
    labels: &'a [String],
    client_request_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveResponse {
    #[serde(default)]
    error_codes: Vec<String>,
}

/// HTTP client for the external save API.
#[derive(Debug)]
pub struct SaveApiClient {
    config: SaveApiConfig,
    client: reqwest::Client,
}

impl SaveApiClient {
    pub fn new(config: SaveApiConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("building save api client")?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl SaveSink for SaveApiClient {
    async fn save(&self, item: &CandidateItem, client_request_id: Uuid) -> Result<(), SinkError> {
        let request = SaveRequest {
            url: &item.url,
            labels: &item.labels,
            client_request_id: client_request_id.to_string(),
        };

        let resp = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.token)
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SinkError::HttpStatus(status.as_u16()));
        }

        let body: SaveResponse = resp.json().await?;
        if !body.error_codes.is_empty() {
            return Err(SinkError::ErrorCodes(body.error_codes));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tokio::sync::Mutex;

    /// Rejects configured URLs, records every idempotency token it sees.
    struct ScriptedSink {
        reject: HashSet<String>,
        seen_tokens: Mutex<Vec<Uuid>>,
    }

    impl ScriptedSink {
        fn rejecting(urls: &[&str]) -> Self {
            Self {
                reject: urls.iter().map(|u| u.to_string()).collect(),
                seen_tokens: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SaveSink for ScriptedSink {
        async fn save(
            &self,
            item: &CandidateItem,
            client_request_id: Uuid,
        ) -> Result<(), SinkError> {
            self.seen_tokens.lock().await.push(client_request_id);
            if self.reject.contains(&item.url) {
                Err(SinkError::ErrorCodes(vec!["UNAVAILABLE".to_string()]))
            } else {
                Ok(())
            }
        }
    }

    fn urls(items: &[&str]) -> Vec<String> {
        items.iter().map(|u| u.to_string()).collect()
    }

    #[tokio::test]
    async fn accepted_is_ordered_subsequence_of_submitted() {
        let sink = ScriptedSink::rejecting(&["https://ex.com/d"]);
        let items = urls(&["https://ex.com/c", "https://ex.com/d", "https://ex.com/e"]);

        let report = submit_all(&sink, &items, &["tech".to_string()]).await;

        assert_eq!(report.accepted(), urls(&["https://ex.com/c", "https://ex.com/e"]));
        assert_eq!(report.failed_count(), 1);
    }

    #[tokio::test]
    async fn failure_reason_is_carried_as_data() {
        let sink = ScriptedSink::rejecting(&["https://ex.com/d"]);
        let report = submit_all(&sink, &urls(&["https://ex.com/d"]), &[]).await;

        match &report.outcomes[0].status {
            SubmitStatus::Failed { reason } => assert!(reason.contains("UNAVAILABLE")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn each_item_gets_a_fresh_idempotency_token() {
        let sink = ScriptedSink::rejecting(&[]);
        let items = urls(&["https://ex.com/a", "https://ex.com/b", "https://ex.com/c"]);
        submit_all(&sink, &items, &[]).await;

        let tokens = sink.seen_tokens.lock().await;
        let distinct: HashSet<_> = tokens.iter().collect();
        assert_eq!(distinct.len(), items.len());
    }

    #[tokio::test]
    async fn empty_submission_reports_nothing() {
        let sink = ScriptedSink::rejecting(&[]);
        let report = submit_all(&sink, &[], &[]).await;
        assert!(report.outcomes.is_empty());
        assert!(report.accepted().is_empty());
    }

    #[test]
    fn save_response_error_codes_deserialize() {
        let body: SaveResponse =
            serde_json::from_str(r#"{"errorCodes": ["UNAUTHORIZED"]}"#).expect("parse");
        assert_eq!(body.error_codes, vec!["UNAUTHORIZED"]);

        let ok: SaveResponse = serde_json::from_str(r#"{}"#).expect("parse");
        assert!(ok.error_codes.is_empty());
    }
}
