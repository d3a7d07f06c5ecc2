//! Agent executors.
//!
//! Every agent shares one thin frame: read the payload, produce an
//! [`AgentOutcome`], and let the dispatcher upload the artifact and call the
//! matching orchestrator RPC. Agents never talk to the queue and never
//! decide retries; a returned `Fail` is a permanent, structured failure,
//! while an `Err` is an execution error the dispatcher may retry.

pub mod analyzer;
pub mod chart;
pub mod designer;
pub mod generic;
pub mod notifier;
pub mod reviewer;
pub mod scraper;
pub mod summarizer;
pub mod transformer;
pub mod validator;

use anyhow::Result;
use serde_json::Value;
use sqlx::PgPool;
use tracing::warn;

use relay_db::models::{AgentKind, LogLevel};
use relay_db::queries::task_logs;

use crate::ai::AiClient;
use crate::mail::EmailConfig;
use crate::orchestrator::{ArtifactReport, OrchestratorClient, Review};
use crate::storage::ObjectStore;

/// Everything an agent needs to run, injected at startup.
#[derive(Clone)]
pub struct AgentContext {
    pub pool: PgPool,
    pub storage: ObjectStore,
    pub orchestrator: OrchestratorClient,
    pub ai: std::sync::Arc<AiClient>,
    pub email: EmailConfig,
    /// Shared client for scraping and HTTP email.
    pub http: reqwest::Client,
    /// `NODE_ENV == production`. Outside production the reviewer
    /// auto-approves and the notifier downgrades failures to `skipped`.
    pub production: bool,
}

impl AgentContext {
    /// Append a task log entry. Best-effort: a store hiccup here must not
    /// turn a successful agent run into a failure.
    pub async fn log(&self, task_id: &str, level: LogLevel, message: &str) {
        if let Err(e) = task_logs::insert_log(&self.pool, task_id, level, message).await {
            warn!(task_id, error = %e, "failed to write task log");
        }
    }
}

/// Identity of the task being executed.
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub id: String,
    pub job_id: Option<String>,
    pub name: String,
}

impl TaskInfo {
    /// Object key under the job prefix: `jobs/{job}/{task}{suffix}.{ext}`.
    pub fn object_key(&self, suffix: &str, ext: &str) -> String {
        format!(
            "jobs/{}/{}{}.{}",
            self.job_id.as_deref().unwrap_or("unknown"),
            self.id,
            suffix,
            ext
        )
    }
}

/// An artifact produced by an agent: the bytes to upload plus the
/// descriptor the orchestrator records.
#[derive(Debug, Clone)]
pub struct ArtifactOutput {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub report: ArtifactReport,
}

impl ArtifactOutput {
    /// A JSON artifact under the task's object key.
    pub fn json(task: &TaskInfo, suffix: &str, filename: &str, value: &Value) -> Self {
        let key = task.object_key(suffix, "json");
        Self {
            bytes: serde_json::to_vec_pretty(value).unwrap_or_default(),
            content_type: "application/json".to_string(),
            report: ArtifactReport {
                kind: "json".to_string(),
                filename: filename.to_string(),
                storage_key: key.clone(),
                role: None,
                metadata: None,
            },
            key,
        }
    }
}

/// What an agent produced.
#[derive(Debug)]
pub enum AgentOutcome {
    /// Upload the artifact (if any) and report the result via `complete`.
    Complete {
        result: Value,
        artifact: Option<ArtifactOutput>,
    },
    /// Report a verdict via `review` instead of `complete`.
    Review(Review),
    /// Permanent failure: report via `fail` and do not retry.
    Fail {
        error: String,
        artifact: Option<ArtifactOutput>,
    },
}

/// Dispatch a task to its agent.
pub async fn run_agent(
    ctx: &AgentContext,
    kind: &AgentKind,
    task: &TaskInfo,
    payload: &Value,
) -> Result<AgentOutcome> {
    match kind {
        AgentKind::Scraper => scraper::run(ctx, task, payload).await,
        AgentKind::Summarizer => summarizer::run(ctx, task, payload).await,
        AgentKind::Analyzer => analyzer::run(ctx, task, payload).await,
        AgentKind::Validator => validator::run(ctx, task, payload).await,
        AgentKind::Transformer => transformer::run(ctx, task, payload).await,
        AgentKind::Chart => chart::run(ctx, task, payload).await,
        AgentKind::Designer => designer::run(ctx, task, payload).await,
        AgentKind::Notifier => notifier::run(ctx, task, payload).await,
        AgentKind::Reviewer => reviewer::run(ctx, task, payload).await,
        AgentKind::Custom(_) => generic::run(ctx, task, payload).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_key_includes_job_and_suffix() {
        let task = TaskInfo {
            id: "T1".to_string(),
            job_id: Some("J1".to_string()),
            name: "scrape".to_string(),
        };
        assert_eq!(task.object_key("_scrape", "json"), "jobs/J1/T1_scrape.json");
        assert_eq!(task.object_key("", "png"), "jobs/J1/T1.png");
    }

    #[test]
    fn object_key_without_job_uses_placeholder() {
        let task = TaskInfo {
            id: "T2".to_string(),
            job_id: None,
            name: "x".to_string(),
        };
        assert_eq!(task.object_key("", "txt"), "jobs/unknown/T2.txt");
    }
}
