//! Query functions for the `tasks` table.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::{AgentKind, TargetTask, TaskContext};
use crate::retry::with_reconnect;

/// Load the execution context for a task.
///
/// Returns `None` when the task does not exist, or exists without an agent
/// type (a half-created row the worker cannot act on).
pub async fn load_context(pool: &PgPool, task_id: &str) -> Result<Option<TaskContext>> {
    let row: Option<(Option<String>, Option<serde_json::Value>, Option<String>, Option<String>)> =
        with_reconnect("load_context", || async {
            sqlx::query_as(
                "SELECT agent_type, payload, job_id, name FROM tasks WHERE id = $1",
            )
            .bind(task_id)
            .fetch_optional(pool)
            .await
        })
        .await
        .context("failed to load task context")?;

    let Some((agent_type, payload, job_id, name)) = row else {
        return Ok(None);
    };
    let Some(agent_type) = agent_type else {
        return Ok(None);
    };

    Ok(Some(TaskContext {
        agent_type: agent_type.parse::<AgentKind>().expect("infallible"),
        payload,
        job_id,
        name,
    }))
}

/// Current retry count for a task. Missing rows count as zero.
pub async fn get_retry_count(pool: &PgPool, task_id: &str) -> Result<u32> {
    let row: Option<(i32,)> = with_reconnect("get_retry_count", || async {
        sqlx::query_as("SELECT retry_count FROM tasks WHERE id = $1")
            .bind(task_id)
            .fetch_optional(pool)
            .await
    })
    .await
    .context("failed to read retry count")?;

    Ok(row.map(|(n,)| n.max(0) as u32).unwrap_or(0))
}

/// Increment the retry counter. The counter is monotonically non-decreasing;
/// there is no path that resets it.
pub async fn increment_retry(pool: &PgPool, task_id: &str) -> Result<()> {
    with_reconnect("increment_retry", || async {
        sqlx::query("UPDATE tasks SET retry_count = retry_count + 1 WHERE id = $1")
            .bind(task_id)
            .execute(pool)
            .await
    })
    .await
    .context("failed to increment retry count")?;
    Ok(())
}

/// Load the status and result of a review target task.
pub async fn get_target_task(pool: &PgPool, task_id: &str) -> Result<Option<TargetTask>> {
    let row = with_reconnect("get_target_task", || async {
        sqlx::query_as::<_, TargetTask>("SELECT status, result FROM tasks WHERE id = $1")
            .bind(task_id)
            .fetch_optional(pool)
            .await
    })
    .await
    .context("failed to load target task")?;
    Ok(row)
}
