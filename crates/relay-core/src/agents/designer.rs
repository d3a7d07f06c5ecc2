//! Designer agent: build a PDF report, embedding job artifacts resolved
//! per section.

use anyhow::Result;
use serde_json::{Value, json};

use relay_db::models::{ArtifactRow, LogLevel};
use relay_db::queries::artifacts;

use super::{AgentContext, AgentOutcome, ArtifactOutput, TaskInfo};
use crate::orchestrator::ArtifactReport;
use crate::report::catalog::Section;
use crate::report::latex::{DocumentStyle, RenderedSection};
use crate::report::{
    ArtifactCatalog, backfill_sections_from_urls, build_document, compile_pdf,
    resolve_artifact_for_section,
};
use crate::template;

/// The designer's artifact role is fixed.
const DESIGNER_ROLE: &str = "report";

pub async fn run(ctx: &AgentContext, task: &TaskInfo, payload: &Value) -> Result<AgentOutcome> {
    // Unresolved templates abort before any rendering happens.
    let unresolved = template::find_unresolved(payload);
    if !unresolved.is_empty() {
        let error = format!(
            "Designer payload contains unresolved templates: {unresolved:?}. \
             Ensure dependencies are completed before designer task."
        );
        ctx.log(&task.id, LogLevel::Error, &error).await;
        return Ok(AgentOutcome::Fail {
            error,
            artifact: None,
        });
    }

    let title = payload
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or("Generated Report");

    let mut sections: Vec<Section> = payload
        .get("sections")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default();
    if sections.is_empty() {
        let error = "Designer payload must contain at least one section".to_string();
        ctx.log(&task.id, LogLevel::Error, &error).await;
        return Ok(AgentOutcome::Fail {
            error,
            artifact: None,
        });
    }

    // Catalog: the job's stored artifacts first, payload artifacts second.
    let store_rows = match &task.job_id {
        Some(job_id) => artifacts::list_job_artifacts(&ctx.pool, job_id).await?,
        None => Vec::new(),
    };
    let payload_rows: Vec<ArtifactRow> = payload
        .get("artifacts")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default();
    let catalog = ArtifactCatalog::new(store_rows, payload_rows);
    ctx.log(
        &task.id,
        LogLevel::Info,
        &format!("Artifact catalog built with {} artifacts", catalog.len()),
    )
    .await;

    backfill_sections_from_urls(&mut sections, &catalog);

    // Resolve and download per section. A failed fetch downgrades the
    // section to text; it never aborts the report.
    let mut rendered = Vec::with_capacity(sections.len());
    let mut assets: Vec<(String, Vec<u8>)> = Vec::new();
    let mut embedded_artifacts = 0usize;

    for (index, section) in sections.iter().enumerate() {
        let heading = section.heading_or(index);
        let content = section.content.as_deref().unwrap_or("");

        let Some(artifact) = resolve_artifact_for_section(section, &catalog) else {
            rendered.push(RenderedSection::text(&heading, content));
            continue;
        };
        let Some(storage_key) = artifact.storage_key.as_deref().filter(|k| !k.is_empty())
        else {
            rendered.push(RenderedSection::text(&heading, content));
            continue;
        };

        match ctx.storage.get(storage_key).await {
            Ok(bytes) => {
                let ext = artifact
                    .filename
                    .as_deref()
                    .and_then(|name| name.rsplit_once('.').map(|(_, ext)| ext.to_lowercase()))
                    .unwrap_or_else(|| "png".to_string());
                let asset_name = format!("artifact_{index}.{ext}");
                assets.push((asset_name.clone(), bytes));
                rendered.push(RenderedSection::image(
                    &heading,
                    format!("assets/{asset_name}"),
                    section.caption.as_deref(),
                ));
                embedded_artifacts += 1;
            }
            Err(e) => {
                ctx.log(
                    &task.id,
                    LogLevel::Warn,
                    &format!("Failed to load artifact {storage_key}: {e:#}"),
                )
                .await;
                rendered.push(RenderedSection::text(&heading, content));
            }
        }
    }

    let style = DocumentStyle::from_payload(payload);
    let tex = build_document(title, &style, &rendered)?;
    let pdf = compile_pdf(&tex, &assets).await?;
    ctx.log(
        &task.id,
        LogLevel::Info,
        &format!("Designer generated PDF via LaTeX ({} bytes)", pdf.len()),
    )
    .await;

    let storage_key = task.object_key("", "pdf");
    let job_id = task.job_id.as_deref().unwrap_or("unknown");
    let pdf_url = format!("/api/jobs/{job_id}/artifacts?type=pdf&role=report&download=1");

    let artifact = ArtifactOutput {
        key: storage_key.clone(),
        bytes: pdf,
        content_type: "application/pdf".to_string(),
        report: ArtifactReport {
            kind: "pdf".to_string(),
            filename: "report.pdf".to_string(),
            storage_key: storage_key.clone(),
            role: Some(DESIGNER_ROLE.to_string()),
            metadata: Some(json!({
                "embedded_artifacts": embedded_artifacts,
                "section_count": rendered.len(),
                "role": DESIGNER_ROLE,
                "deterministic_ordering": true,
                "font": style.font,
                "page_border": style.page_border,
            })),
        },
    };

    let result = json!({
        "ok": true,
        "job_id": task.job_id,
        "executor": "designer",
        "pdf_url": pdf_url,
        "storage_key": storage_key,
    });

    ctx.log(
        &task.id,
        LogLevel::Info,
        &format!(
            "Designer execution succeeded, role='{DESIGNER_ROLE}', sections={}",
            rendered.len()
        ),
    )
    .await;

    Ok(AgentOutcome::Complete {
        result,
        artifact: Some(artifact),
    })
}
