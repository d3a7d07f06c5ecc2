//! Generic AI executor: the fallback for agent kinds with no dedicated
//! implementation.

use anyhow::Result;
use serde_json::{Value, json};

use relay_db::models::LogLevel;

use super::{AgentContext, AgentOutcome, ArtifactOutput, TaskInfo};
use crate::ai::{GenerateOptions, extract_json};
use crate::orchestrator::ArtifactReport;

/// Context payload beyond this many chars is dropped from the prompt.
const MAX_CONTEXT_CHARS: usize = 3_000;

pub async fn run(ctx: &AgentContext, task: &TaskInfo, payload: &Value) -> Result<AgentOutcome> {
    let name = task.name.trim();
    let prompt = ["prompt", "instruction"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_str))
        .unwrap_or("");

    let content = if !prompt.is_empty() {
        let context_block = payload
            .get("context")
            .map(|context| {
                let serialized = match context {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let capped: String = serialized.chars().take(MAX_CONTEXT_CHARS).collect();
                format!("\nContext: {capped}\n")
            })
            .unwrap_or_default();

        let ai_prompt = format!(
            "Execute this task:\n\n\
             Task Name: {name}\n\
             Instructions: {prompt}\n{context_block}\n\
             Provide a detailed response completing this task. Be thorough and specific."
        );

        match ctx
            .ai
            .generate(
                &ai_prompt,
                &GenerateOptions::for_task("executor").max_tokens(1000),
            )
            .await
        {
            Ok(response) => {
                ctx.log(&task.id, LogLevel::Info, "AI execution completed").await;
                response
            }
            Err(e) => {
                ctx.log(
                    &task.id,
                    LogLevel::Warn,
                    &format!("AI execution failed: {e}, using fallback"),
                )
                .await;
                format!("Task '{name}' executed (AI unavailable).\nPrompt: {prompt}\n")
            }
        }
    } else {
        canned_output(name)
    };

    // Content type follows the payload's first byte.
    let is_json = matches!(content.trim_start().as_bytes().first(), Some(b'{') | Some(b'['));
    let content_type = if is_json { "application/json" } else { "text/plain" };

    let storage_key = task.object_key("", "txt");
    let artifact = ArtifactOutput {
        key: storage_key.clone(),
        bytes: content.clone().into_bytes(),
        content_type: content_type.to_string(),
        report: ArtifactReport {
            kind: if is_json { "json" } else { "text" }.to_string(),
            filename: "output.txt".to_string(),
            storage_key,
            role: None,
            metadata: Some(json!({"bytes": content.len()})),
        },
    };

    let result_value = extract_json(&content).unwrap_or(Value::String(content.clone()));
    let result = json!({
        "ok": true,
        "job_id": task.job_id,
        "executor": "executor",
        "text": content,
        "result": result_value,
    });

    Ok(AgentOutcome::Complete {
        result,
        artifact: Some(artifact),
    })
}

/// Canned outputs for the handful of demo task names, used when the payload
/// carries no prompt.
fn canned_output(name: &str) -> String {
    match name.to_lowercase().as_str() {
        "fetch_data" => json!({"source": "demo", "rows": [1, 2, 3]}).to_string(),
        "process_data" => json!({"processed": true, "summary": "ok"}).to_string(),
        "generate_report" => "Report generated successfully.\n".to_string(),
        _ => format!("Executed {name} successfully.\n"),
    }
}
