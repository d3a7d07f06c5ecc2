//! Query functions for the `artifacts` table.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::{ArtifactRow, PdfArtifact};
use crate::retry::with_reconnect;

/// All artifacts produced so far for a job, oldest first.
///
/// Joined through `tasks` because `job_id` lives on the task row; the
/// ordering makes designer embedding deterministic.
pub async fn list_job_artifacts(pool: &PgPool, job_id: &str) -> Result<Vec<ArtifactRow>> {
    let rows = with_reconnect("list_job_artifacts", || async {
        sqlx::query_as::<_, ArtifactRow>(
            "SELECT a.id, a.task_id, a.type, a.filename, a.storage_key, \
                    a.mime_type, a.role, t.agent_type \
             FROM artifacts a \
             JOIN tasks t ON a.task_id = t.id \
             WHERE t.job_id = $1 \
             ORDER BY a.created_at ASC",
        )
        .bind(job_id)
        .fetch_all(pool)
        .await
    })
    .await
    .context("failed to list job artifacts")?;
    Ok(rows)
}

/// The most recent current PDF artifact for a job, if any.
pub async fn latest_current_pdf(pool: &PgPool, job_id: &str) -> Result<Option<PdfArtifact>> {
    let row = with_reconnect("latest_current_pdf", || async {
        sqlx::query_as::<_, PdfArtifact>(
            "SELECT storage_key, filename, role, created_at \
             FROM artifacts \
             WHERE job_id = $1 AND type = 'pdf' AND is_current = TRUE \
             ORDER BY created_at DESC \
             LIMIT 1",
        )
        .bind(job_id)
        .fetch_optional(pool)
        .await
    })
    .await
    .context("failed to load latest pdf artifact")?;
    Ok(row)
}
