//! Transformer agent: built-in list/string transforms plus an `ai:` escape
//! hatch that passes through untouched on any AI or parse failure.

use anyhow::Result;
use serde_json::{Value, json};

use relay_db::models::LogLevel;

use super::{AgentContext, AgentOutcome, ArtifactOutput, TaskInfo};
use crate::ai::{GenerateOptions, extract_json};

/// Items included in the AI prompt.
const MAX_PROMPT_ITEMS: usize = 50;

pub async fn run(ctx: &AgentContext, task: &TaskInfo, payload: &Value) -> Result<AgentOutcome> {
    let data = payload.get("data").cloned().unwrap_or(Value::Array(Vec::new()));
    let transform = payload
        .get("transform")
        .and_then(Value::as_str)
        .unwrap_or("uppercase");

    let transformed = if let Some(instruction) = transform.strip_prefix("ai:") {
        ai_transform(ctx, task, &data, instruction).await
    } else {
        builtin_transform(&data, transform)
    };

    let original_count = match &data {
        Value::Array(items) => items.len(),
        _ => 0,
    };

    let body = json!({"transformed": transformed, "original_count": original_count});
    let artifact = ArtifactOutput::json(task, "_transform", "transform.json", &body);
    let result = json!({
        "ok": true,
        "job_id": task.job_id,
        "executor": "transformer",
        "transformed": transformed,
        "result": transformed,
        "original_count": original_count,
    });

    ctx.log(
        &task.id,
        LogLevel::Info,
        &format!("Transform completed: {transform}"),
    )
    .await;

    Ok(AgentOutcome::Complete {
        result,
        artifact: Some(artifact),
    })
}

/// Apply a built-in transform. Unknown names and unsupported shapes pass
/// through unchanged.
pub fn builtin_transform(data: &Value, transform: &str) -> Value {
    match data {
        Value::Array(items) => match transform {
            "uppercase" => Value::Array(items.iter().map(|i| recase(i, true)).collect()),
            "lowercase" => Value::Array(items.iter().map(|i| recase(i, false)).collect()),
            "reverse" => Value::Array(items.iter().rev().cloned().collect()),
            "unique" => Value::Array(dedup_stable(items)),
            _ => data.clone(),
        },
        Value::String(text) => match transform {
            "uppercase" => Value::String(text.to_uppercase()),
            "lowercase" => Value::String(text.to_lowercase()),
            "reverse" => Value::String(text.chars().rev().collect()),
            _ => data.clone(),
        },
        _ => data.clone(),
    }
}

/// Uppercase/lowercase one item, stringifying non-strings the way the
/// other transforms treat them.
fn recase(item: &Value, upper: bool) -> Value {
    let text = match item {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Value::String(if upper {
        text.to_uppercase()
    } else {
        text.to_lowercase()
    })
}

/// Stable de-duplication: first occurrence wins, order preserved.
fn dedup_stable(items: &[Value]) -> Vec<Value> {
    let mut seen = std::collections::HashSet::new();
    items
        .iter()
        .filter(|item| seen.insert(item.to_string()))
        .cloned()
        .collect()
}

async fn ai_transform(
    ctx: &AgentContext,
    task: &TaskInfo,
    data: &Value,
    instruction: &str,
) -> Value {
    let sample = match data {
        Value::Array(items) => {
            Value::Array(items.iter().take(MAX_PROMPT_ITEMS).cloned().collect())
        }
        other => other.clone(),
    };
    let prompt = format!(
        "Transform the following data according to this instruction: {instruction}\n\n\
         Data: {sample}\n\n\
         Provide the transformed data as JSON only, with no surrounding prose."
    );

    match ctx
        .ai
        .generate(
            &prompt,
            &GenerateOptions::for_task("transformer")
                .temperature(0.5)
                .max_tokens(500),
        )
        .await
    {
        Ok(response) => match extract_json(&response) {
            Some(value) => {
                ctx.log(&task.id, LogLevel::Info, "AI transformation completed")
                    .await;
                value
            }
            None => {
                ctx.log(
                    &task.id,
                    LogLevel::Warn,
                    "Could not parse AI transformation result",
                )
                .await;
                data.clone()
            }
        },
        Err(e) => {
            ctx.log(
                &task.id,
                LogLevel::Warn,
                &format!("AI transformation failed: {e}"),
            )
            .await;
            data.clone()
        }
    }
}
