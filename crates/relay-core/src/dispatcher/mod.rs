//! Dispatch and lifecycle core: one delivery in, exactly one disposition out.
//!
//! For every queue delivery the dispatcher parses the message, suppresses
//! duplicates through the per-process in-progress set, loads the task
//! context, acquires ownership from the orchestrator, runs the agent, and
//! maps the outcome onto the ack/nack and retry policy. Agents never see
//! the queue; the dispatcher never interprets payloads.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, warn};

use relay_db::models::LogLevel;
use relay_db::queries::tasks;

use crate::agents::{AgentContext, AgentOutcome, TaskInfo, run_agent};
use crate::metrics::Metrics;
use crate::orchestrator::{Decision, StartOutcome};

/// Durable work queue the worker consumes.
pub const TASK_QUEUE: &str = "executor.tasks";
/// Durable dead-letter queue, declared for parity. Terminal failures are
/// reported via the `fail` RPC; the worker does not publish here.
pub const DLQ_QUEUE: &str = "executor.tasks.dlq";

/// Attempts before a task is marked permanently failed.
pub const MAX_RETRIES: u32 = 3;
/// Delay before a nack-with-requeue on an execution failure.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(2);
/// Settle delay between ownership acquisition and agent dispatch.
const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// A task message as delivered on the queue.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskMessage {
    pub task_id: String,
    #[serde(default)]
    pub job_id: Option<String>,
    /// Template-resolved payload. Preferred over the store's copy, which
    /// may still contain `{{...}}` references.
    #[serde(default)]
    pub payload: Option<Value>,
}

/// What the consume loop should do with the delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    NackRequeue,
}

// ---------------------------------------------------------------------------
// In-progress set
// ---------------------------------------------------------------------------

/// Per-process set of task ids currently executing, used to drop duplicate
/// deliveries of the same message.
#[derive(Debug, Default)]
pub struct InProgressSet {
    tasks: Mutex<HashSet<String>>,
}

impl InProgressSet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim a task id. Returns `None` when the task is already running in
    /// this process; the returned guard releases the claim on drop, on
    /// every exit path.
    pub fn begin(set: &Arc<Self>, task_id: &str) -> Option<InProgressGuard> {
        let mut tasks = set
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !tasks.insert(task_id.to_string()) {
            return None;
        }
        Some(InProgressGuard {
            set: Arc::clone(set),
            task_id: task_id.to_string(),
        })
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases the in-progress claim when dropped.
pub struct InProgressGuard {
    set: Arc<InProgressSet>,
    task_id: String,
}

impl Drop for InProgressGuard {
    fn drop(&mut self) {
        self.set
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.task_id);
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// How an executed task ended, before ack bookkeeping.
enum Executed {
    Completed,
    Reviewed(Decision),
    FailedPermanent(String),
}

pub struct Dispatcher {
    ctx: AgentContext,
    metrics: Metrics,
    in_progress: Arc<InProgressSet>,
    settle_delay: Duration,
}

impl Dispatcher {
    pub fn new(ctx: AgentContext, metrics: Metrics) -> Self {
        Self {
            ctx,
            metrics,
            in_progress: InProgressSet::new(),
            settle_delay: SETTLE_DELAY,
        }
    }

    pub fn in_progress(&self) -> &Arc<InProgressSet> {
        &self.in_progress
    }

    /// Process one delivery. Infallible by construction: every path maps to
    /// exactly one [`Disposition`].
    pub async fn handle_message(&self, body: &[u8]) -> Disposition {
        let message: TaskMessage = match serde_json::from_slice(body) {
            Ok(message) => message,
            Err(e) => {
                error!(error = %e, "dropping malformed task message");
                return Disposition::Ack;
            }
        };
        let task_id = message.task_id.clone();

        // Duplicate suppression. The guard releases on every exit path.
        let Some(_guard) = InProgressSet::begin(&self.in_progress, &task_id) else {
            info!(task_id, "task already in progress, dropping duplicate delivery");
            return Disposition::Ack;
        };

        info!(task_id, "received task");

        // Context load. A store outage is transient and must not consume a
        // retry; an absent task is dropped for good.
        let context = match tasks::load_context(&self.ctx.pool, &task_id).await {
            Ok(Some(context)) => context,
            Ok(None) => {
                error!(task_id, "task not found in store, dropping");
                self.ctx
                    .log(&task_id, LogLevel::Error, "Task not found in DB")
                    .await;
                return Disposition::Ack;
            }
            Err(e) => {
                warn!(task_id, error = %e, "context load failed, requeueing");
                return Disposition::NackRequeue;
            }
        };

        let job_id = message.job_id.or(context.job_id);
        let payload = merge_payload(message.payload, context.payload);

        // Ownership handshake.
        let start = match self.ctx.orchestrator.start(&task_id).await {
            Ok(start) => start,
            Err(e) => {
                self.ctx
                    .log(&task_id, LogLevel::Error, &format!("Start failed: {e:#}"))
                    .await;
                return Disposition::NackRequeue;
            }
        };
        match start {
            StartOutcome::Owned => {}
            StartOutcome::AlreadyRunning => {
                info!(task_id, "task already RUNNING, resuming idempotently");
            }
            StartOutcome::Refused(status) => {
                info!(task_id, status, "ownership refused, dropping without work");
                return Disposition::Ack;
            }
        }

        self.ctx.log(&task_id, LogLevel::Info, "Execution started").await;
        tokio::time::sleep(self.settle_delay).await;

        let task = TaskInfo {
            id: task_id.clone(),
            job_id,
            name: context.name.unwrap_or_default(),
        };

        match self.execute(&context.agent_type, &task, &payload).await {
            Ok(Executed::Completed) => {
                self.ctx
                    .log(&task_id, LogLevel::Info, "Execution succeeded")
                    .await;
                self.metrics.record_success();
                Disposition::Ack
            }
            Ok(Executed::Reviewed(decision)) => {
                self.ctx
                    .log(
                        &task_id,
                        LogLevel::Info,
                        &format!("Review completed: {decision}"),
                    )
                    .await;
                self.metrics.record_reviewed();
                Disposition::Ack
            }
            Ok(Executed::FailedPermanent(error)) => {
                error!(task_id, error, "task failed permanently");
                self.metrics.record_failed();
                Disposition::Ack
            }
            Err(e) => self.retry_or_fail(&task_id, &e).await,
        }
    }

    /// Run the agent and perform its side effects: artifact upload and the
    /// matching orchestrator RPC.
    async fn execute(
        &self,
        kind: &relay_db::models::AgentKind,
        task: &TaskInfo,
        payload: &Value,
    ) -> Result<Executed> {
        match run_agent(&self.ctx, kind, task, payload).await? {
            AgentOutcome::Complete { result, artifact } => {
                if let Some(artifact) = &artifact {
                    self.ctx
                        .storage
                        .put(&artifact.key, artifact.bytes.clone(), &artifact.content_type)
                        .await?;
                    self.ctx
                        .log(
                            &task.id,
                            LogLevel::Info,
                            &format!("Artifact uploaded to {}", artifact.key),
                        )
                        .await;
                }
                self.ctx
                    .orchestrator
                    .complete(&task.id, &result, artifact.as_ref().map(|a| &a.report))
                    .await?;
                Ok(Executed::Completed)
            }
            AgentOutcome::Review(review) => {
                let decision = review.decision;
                self.ctx.orchestrator.review(&task.id, &review).await?;
                Ok(Executed::Reviewed(decision))
            }
            AgentOutcome::Fail { error, artifact } => {
                // Permanent failure: the artifact and the fail RPC are both
                // best-effort, the ack decision is already made.
                let report = match &artifact {
                    Some(artifact) => {
                        match self
                            .ctx
                            .storage
                            .put(&artifact.key, artifact.bytes.clone(), &artifact.content_type)
                            .await
                        {
                            Ok(()) => Some(&artifact.report),
                            Err(e) => {
                                warn!(task_id = %task.id, error = %e, "failure artifact upload failed");
                                None
                            }
                        }
                    }
                    None => None,
                };
                if let Err(e) = self.ctx.orchestrator.fail(&task.id, &error, report).await {
                    error!(task_id = %task.id, error = %e, "failed to report task failure");
                }
                Ok(Executed::FailedPermanent(error))
            }
        }
    }

    /// Execution-error policy: bump the retry counter, then requeue or give
    /// up depending on the budget.
    async fn retry_or_fail(&self, task_id: &str, error: &anyhow::Error) -> Disposition {
        let retries = match tasks::get_retry_count(&self.ctx.pool, task_id).await {
            Ok(retries) => retries,
            Err(e) => {
                // Store outage while bookkeeping: requeue without consuming
                // a retry.
                warn!(task_id, error = %e, "retry count unavailable, requeueing");
                return Disposition::NackRequeue;
            }
        };
        if let Err(e) = tasks::increment_retry(&self.ctx.pool, task_id).await {
            warn!(task_id, error = %e, "failed to increment retry count");
        }

        self.ctx
            .log(task_id, LogLevel::Error, &format!("Execution failed: {error:#}"))
            .await;

        if retries + 1 >= MAX_RETRIES {
            if let Err(e) = self
                .ctx
                .orchestrator
                .fail(task_id, &format!("{error:#}"), None)
                .await
            {
                error!(task_id, error = %e, "failed to report permanent failure");
            }
            self.metrics.record_failed();
            self.ctx
                .log(
                    task_id,
                    LogLevel::Error,
                    "Retry budget exhausted, reported permanent failure",
                )
                .await;
            Disposition::Ack
        } else {
            self.ctx
                .log(
                    task_id,
                    LogLevel::Warn,
                    &format!("Retrying ({}/{})", retries + 1, MAX_RETRIES),
                )
                .await;
            tokio::time::sleep(RETRY_BACKOFF).await;
            Disposition::NackRequeue
        }
    }
}

/// Prefer the message's template-resolved payload; fall back to the store's
/// original payload; never hand agents a non-object null.
fn merge_payload(from_message: Option<Value>, from_store: Option<Value>) -> Value {
    let usable = |value: &Value| match value {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        _ => true,
    };

    if let Some(payload) = from_message {
        if usable(&payload) {
            return payload;
        }
    }
    if let Some(payload) = from_store {
        if usable(&payload) {
            return payload;
        }
    }
    Value::Object(serde_json::Map::new())
}
