//! HTTP client for the orchestrator's internal task endpoints.
//!
//! Four calls: start, complete, review, fail. `complete` is the single
//! commit point of a task, so it alone carries a retry budget; everything
//! else either surfaces the error or is best-effort.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{info, warn};

/// Retries after the initial `complete` attempt, with 1s/2s/4s backoff.
const COMPLETE_RETRIES: u32 = 3;

/// Outcome of the ownership handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// 200 -- the worker now owns the task.
    Owned,
    /// 409 -- the task is already RUNNING. Treated as ownership acquired so
    /// a redelivered message resumes idempotently.
    AlreadyRunning,
    /// Any other status -- drop the message without doing work.
    Refused(u16),
}

impl StartOutcome {
    /// Did the handshake grant the right to execute?
    pub fn owned(self) -> bool {
        matches!(self, Self::Owned | Self::AlreadyRunning)
    }
}

/// Reviewer verdict sent to the review endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Approve,
    Reject,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approve => f.write_str("APPROVE"),
            Self::Reject => f.write_str("REJECT"),
        }
    }
}

/// Review body for `POST /internal/tasks/{id}/review`.
#[derive(Debug, Clone, Serialize)]
pub struct Review {
    pub score: i64,
    pub decision: Decision,
    pub feedback: serde_json::Value,
}

/// Artifact descriptor attached to `complete` / `fail` bodies. The
/// orchestrator turns this into an artifact row.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactReport {
    #[serde(rename = "type")]
    pub kind: String,
    pub filename: String,
    pub storage_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct CompleteBody<'a> {
    result: &'a serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    artifact: Option<&'a ArtifactReport>,
}

#[derive(Serialize)]
struct FailBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    artifact: Option<&'a ArtifactReport>,
}

/// Client for the orchestrator's internal API.
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    base_url: String,
    http: reqwest::Client,
}

impl OrchestratorClient {
    /// Create a client for the given base URL. Requests carry a short
    /// timeout so a wedged orchestrator cannot stall the consume loop.
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn task_url(&self, task_id: &str, action: &str) -> String {
        format!("{}/internal/tasks/{}/{}", self.base_url, task_id, action)
    }

    /// Ownership handshake. A network error is returned as `Err` so the
    /// caller can nack-with-requeue rather than drop the message.
    pub async fn start(&self, task_id: &str) -> Result<StartOutcome> {
        let response = self
            .http
            .post(self.task_url(task_id, "start"))
            .send()
            .await
            .with_context(|| format!("start request failed for task {task_id}"))?;

        Ok(match response.status() {
            StatusCode::OK => StartOutcome::Owned,
            StatusCode::CONFLICT => StartOutcome::AlreadyRunning,
            other => StartOutcome::Refused(other.as_u16()),
        })
    }

    /// Record a task's result (and optionally its artifact).
    ///
    /// 200 and 409 (already completed) both count as success. Any other
    /// status or a network error is retried with 1s/2s/4s backoff before
    /// surfacing.
    pub async fn complete(
        &self,
        task_id: &str,
        result: &serde_json::Value,
        artifact: Option<&ArtifactReport>,
    ) -> Result<()> {
        let body = CompleteBody { result, artifact };
        let url = self.task_url(task_id, "complete");

        let mut attempt: u32 = 0;
        loop {
            let outcome = self.http.post(&url).json(&body).send().await;
            match outcome {
                Ok(response) if response.status() == StatusCode::OK => return Ok(()),
                Ok(response) if response.status() == StatusCode::CONFLICT => {
                    info!(task_id, "complete returned 409, task already completed");
                    return Ok(());
                }
                Ok(response) if attempt < COMPLETE_RETRIES => {
                    warn!(
                        task_id,
                        status = response.status().as_u16(),
                        attempt,
                        "complete rejected, retrying"
                    );
                }
                Ok(response) => {
                    bail!(
                        "complete failed for task {task_id} after {attempt} retries: HTTP {}",
                        response.status()
                    );
                }
                Err(e) if attempt < COMPLETE_RETRIES => {
                    warn!(task_id, error = %e, attempt, "complete request failed, retrying");
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("complete request failed for task {task_id} after {attempt} retries")
                    });
                }
            }

            tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
            attempt += 1;
        }
    }

    /// Submit a review verdict. Any non-200 raises so the dispatcher's
    /// retry path takes over.
    pub async fn review(&self, task_id: &str, review: &Review) -> Result<()> {
        let response = self
            .http
            .post(self.task_url(task_id, "review"))
            .json(review)
            .send()
            .await
            .with_context(|| format!("review request failed for task {task_id}"))?;

        if response.status() != StatusCode::OK {
            bail!(
                "review rejected for task {task_id}: HTTP {} {}",
                response.status(),
                response.text().await.unwrap_or_default()
            );
        }
        Ok(())
    }

    /// Report a permanent failure. Best-effort: callers log the error but
    /// the ack decision does not change on delivery failure.
    pub async fn fail(
        &self,
        task_id: &str,
        error: &str,
        artifact: Option<&ArtifactReport>,
    ) -> Result<()> {
        let body = FailBody { error, artifact };
        self.http
            .post(self.task_url(task_id, "fail"))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("fail request failed for task {task_id}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn start_maps_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/internal/tasks/owned/start"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/internal/tasks/running/start"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/internal/tasks/gone/start"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = OrchestratorClient::new(server.uri());
        assert_eq!(client.start("owned").await.unwrap(), StartOutcome::Owned);
        assert_eq!(
            client.start("running").await.unwrap(),
            StartOutcome::AlreadyRunning
        );
        assert_eq!(
            client.start("gone").await.unwrap(),
            StartOutcome::Refused(404)
        );
        assert!(StartOutcome::AlreadyRunning.owned());
        assert!(!StartOutcome::Refused(404).owned());
    }

    #[tokio::test]
    async fn start_network_error_is_err() {
        // Nothing listens on this port.
        let client = OrchestratorClient::new("http://127.0.0.1:9");
        assert!(client.start("T1").await.is_err());
    }

    #[tokio::test]
    async fn complete_retries_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/internal/tasks/T1/complete"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/internal/tasks/T1/complete"))
            .and(body_partial_json(serde_json::json!({"result": {"ok": true}})))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = OrchestratorClient::new(server.uri());
        client
            .complete("T1", &serde_json::json!({"ok": true}), None)
            .await
            .expect("second attempt should succeed");
    }

    #[tokio::test]
    async fn complete_conflict_is_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/internal/tasks/T1/complete"))
            .respond_with(ResponseTemplate::new(409))
            .expect(1)
            .mount(&server)
            .await;

        let client = OrchestratorClient::new(server.uri());
        client
            .complete("T1", &serde_json::json!({"ok": true}), None)
            .await
            .expect("409 accepted as success");
    }

    #[tokio::test]
    async fn complete_serializes_artifact() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/internal/tasks/T1/complete"))
            .and(body_partial_json(serde_json::json!({
                "artifact": {
                    "type": "chart",
                    "filename": "latency_p95.png",
                    "storage_key": "jobs/J1/T1.png",
                    "role": "latency_p95"
                }
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = OrchestratorClient::new(server.uri());
        let artifact = ArtifactReport {
            kind: "chart".to_string(),
            filename: "latency_p95.png".to_string(),
            storage_key: "jobs/J1/T1.png".to_string(),
            role: Some("latency_p95".to_string()),
            metadata: None,
        };
        client
            .complete("T1", &serde_json::json!({"ok": true}), Some(&artifact))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn review_posts_uppercase_decision() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/internal/tasks/T1/review"))
            .and(body_partial_json(serde_json::json!({
                "score": 88,
                "decision": "APPROVE"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = OrchestratorClient::new(server.uri());
        client
            .review(
                "T1",
                &Review {
                    score: 88,
                    decision: Decision::Approve,
                    feedback: serde_json::json!({"summary": "fine"}),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn review_non_200_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/internal/tasks/T1/review"))
            .respond_with(ResponseTemplate::new(422))
            .mount(&server)
            .await;

        let client = OrchestratorClient::new(server.uri());
        let result = client
            .review(
                "T1",
                &Review {
                    score: 10,
                    decision: Decision::Reject,
                    feedback: serde_json::json!({}),
                },
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn fail_posts_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/internal/tasks/T1/fail"))
            .and(body_partial_json(serde_json::json!({"error": "boom"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = OrchestratorClient::new(server.uri());
        client.fail("T1", "boom", None).await.unwrap();
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = OrchestratorClient::new("http://orch:4000/");
        assert_eq!(client.base_url(), "http://orch:4000");
        assert_eq!(
            client.task_url("T1", "start"),
            "http://orch:4000/internal/tasks/T1/start"
        );
    }
}
