//! Chart agent: resolve a chart spec from the payload, render a PNG,
//! and report it with a semantic role.

use anyhow::Result;
use serde_json::{Value, json};

use relay_db::models::LogLevel;

use super::{AgentContext, AgentOutcome, ArtifactOutput, TaskInfo};
use crate::ai::{GenerateOptions, extract_json};
use crate::chart::spec::{
    RawChart, synthesize_histogram, synthesize_pie, synthesize_series,
};
use crate::chart::{chart_role, render_png};
use crate::orchestrator::ArtifactReport;
use crate::template;

pub async fn run(ctx: &AgentContext, task: &TaskInfo, payload: &Value) -> Result<AgentOutcome> {
    // Unresolved templates mean a dependency has not completed. Permanent.
    let unresolved = template::find_unresolved(payload);
    if !unresolved.is_empty() {
        let error = format!(
            "Chart payload contains unresolved templates: {unresolved:?}. \
             Ensure dependencies are completed before chart task."
        );
        ctx.log(&task.id, LogLevel::Error, &error).await;
        return Ok(AgentOutcome::Fail {
            error,
            artifact: None,
        });
    }

    let mut raw = RawChart::from_payload(payload);

    // Inference: decode `data`, then a free-text field, as JSON or CSV.
    if !raw.is_sufficient() {
        if let Some(data) = payload.get("data") {
            let x_field = payload.get("x_field").and_then(Value::as_str);
            if let Some(inferred) = RawChart::infer_from_value(data, x_field) {
                raw.merge(inferred);
            }
        }
    }
    let free_text = ["text", "goal", "prompt"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_str))
        .unwrap_or("");
    if !raw.has_data() && !free_text.trim().is_empty() {
        if let Some(inferred) = RawChart::infer_from_text(free_text) {
            raw.merge(inferred);
        }
    }

    // Synthesis is opt-in: without the flag, missing data fails validation.
    let allow_synthetic = payload
        .get("allow_synthetic")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !raw.has_data() && allow_synthetic {
        if !free_text.trim().is_empty() {
            if let Some(extracted) = extract_spec_with_ai(ctx, task, free_text).await {
                raw.merge(extracted);
            }
        }
        if !raw.has_data() {
            let topic = raw
                .title
                .clone()
                .or_else(|| Some(free_text.to_string()).filter(|t| !t.trim().is_empty()))
                .unwrap_or_else(|| "Trend".to_string());
            let synthesized = match raw.chart_type.as_deref() {
                Some("pie") => synthesize_pie(&topic),
                Some("histogram") => synthesize_histogram(&topic),
                _ => synthesize_series(&topic),
            };
            raw.merge(synthesized);
        }
    }

    let synthetic_role = raw.role.clone();
    let spec = match raw.validate() {
        Ok(spec) => spec,
        Err(error) => {
            ctx.log(&task.id, LogLevel::Error, &error).await;
            return Ok(AgentOutcome::Fail {
                error,
                artifact: None,
            });
        }
    };

    // Role: explicit payload role wins inside chart_role; an inferred or
    // synthesized role only fills the gap when the payload had none.
    let role = if payload.get("role").and_then(Value::as_str).is_some() {
        chart_role(payload)
    } else {
        synthetic_role.unwrap_or_else(|| chart_role(payload))
    };

    let png = render_png(&spec)?;
    let description = spec.describe();
    let data_points = spec.data_points();
    let chart_type = spec.chart_type.to_string();
    let storage_key = task.object_key("", "png");

    ctx.log(
        &task.id,
        LogLevel::Info,
        &format!(
            "Chart generated: {chart_type} with {data_points} data points, role='{role}'"
        ),
    )
    .await;

    let artifact = ArtifactOutput {
        key: storage_key.clone(),
        bytes: png,
        content_type: "image/png".to_string(),
        report: ArtifactReport {
            kind: "chart".to_string(),
            filename: format!("{role}.png"),
            storage_key: storage_key.clone(),
            role: Some(role.clone()),
            metadata: Some(json!({
                "chart_type": chart_type,
                "data_points": data_points,
                "role": role,
                "description": description,
            })),
        },
    };

    let result = json!({
        "ok": true,
        "job_id": task.job_id,
        "executor": "chart",
        "image_url": format!("/api/artifacts/{}/download", task.id),
        "storage_key": storage_key,
        "role": role,
        "chart_type": chart_type,
        "data_points": data_points,
        "description": description,
    });

    Ok(AgentOutcome::Complete {
        result,
        artifact: Some(artifact),
    })
}

/// Ask the AI to extract a chart spec from free text (synthetic mode only).
async fn extract_spec_with_ai(
    ctx: &AgentContext,
    task: &TaskInfo,
    text: &str,
) -> Option<RawChart> {
    let prompt = format!(
        "You are a data visualization assistant.\n\n\
         Given the user's text, produce a JSON object describing a single chart to generate.\n\n\
         Rules:\n\
         - Output MUST be strict JSON (no markdown).\n\
         - Choose a chartType from: line, bar, scatter, area, pie, histogram.\n\
         - Provide a short title.\n\
         - Provide xLabel and yLabel when relevant.\n\
         - Provide role: a short snake_case string.\n\n\
         Data rules:\n\
         - If the text contains explicit numeric pairs/series, extract them into x and y arrays.\n\
         - If the text does NOT contain explicit usable numeric data, create a small plausible \
         synthetic dataset (5-12 points) consistent with the topic.\n\
         - For pie, provide labels and values arrays.\n\
         - For histogram, provide values array.\n\n\
         User text:\n{text}"
    );

    let response = match ctx
        .ai
        .generate(
            &prompt,
            &GenerateOptions::for_task("chart")
                .temperature(0.2)
                .max_tokens(600),
        )
        .await
    {
        Ok(response) => response,
        Err(e) => {
            ctx.log(
                &task.id,
                LogLevel::Warn,
                &format!("Chart spec extraction failed: {e}"),
            )
            .await;
            return None;
        }
    };

    let parsed = extract_json(&response)?;
    // The extraction schema uses camelCase keys; remap into payload shape.
    let remapped = json!({
        "title": parsed.get("title"),
        "type": parsed.get("chartType"),
        "x": parsed.get("x"),
        "y": parsed.get("y"),
        "labels": parsed.get("labels"),
        "values": parsed.get("values"),
        "x_label": parsed.get("xLabel"),
        "y_label": parsed.get("yLabel"),
        "role": parsed.get("role"),
        "bins": parsed.get("bins"),
    });
    Some(RawChart::from_payload(&remapped))
}
