//! Query functions for the `task_logs` table.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::LogLevel;
use crate::retry::with_reconnect;

/// Append a log entry for a task. Writes are auto-committed.
pub async fn insert_log(
    pool: &PgPool,
    task_id: &str,
    level: LogLevel,
    message: &str,
) -> Result<()> {
    with_reconnect("insert_log", || async {
        sqlx::query("INSERT INTO task_logs (task_id, level, message) VALUES ($1, $2, $3)")
            .bind(task_id)
            .bind(level.to_string())
            .bind(message)
            .execute(pool)
            .await
    })
    .await
    .context("failed to insert task log")?;
    Ok(())
}
