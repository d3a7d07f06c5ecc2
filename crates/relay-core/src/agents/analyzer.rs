//! Analyzer agent: descriptive statistics, trend detection, and AI insights.

use anyhow::Result;
use serde_json::{Value, json};

use relay_db::models::LogLevel;

use super::{AgentContext, AgentOutcome, ArtifactOutput, TaskInfo};
use crate::ai::GenerateOptions;

/// Field names probed, in order, when the data is a list of objects.
const NUMERIC_FIELDS: [&str; 4] = ["score", "value", "amount", "sales"];

/// Text-analysis input cap.
const MAX_TEXT_CHARS: usize = 4_000;

pub async fn run(ctx: &AgentContext, task: &TaskInfo, payload: &Value) -> Result<AgentOutcome> {
    let text = payload.get("text").and_then(Value::as_str).unwrap_or("");
    let analysis_type = payload
        .get("analysis_type")
        .and_then(Value::as_str)
        .unwrap_or("summary");

    let data = payload.get("data").and_then(extract_series);

    let (stats, insights) = match data {
        None if !text.trim().is_empty() => analyze_text(ctx, task, text).await,
        None => {
            // No numeric data anywhere. A payload that carried non-empty
            // data we could not read is a contract violation, not an empty
            // request.
            let has_data_field = payload.get("data").is_some_and(|d| match d {
                Value::Null => false,
                Value::Array(items) => !items.is_empty(),
                Value::String(s) => !s.trim().is_empty(),
                Value::Object(fields) => !fields.is_empty(),
                _ => true,
            });
            if has_data_field {
                let error =
                    "Analyzer payload has a data field with no extractable numeric series"
                        .to_string();
                ctx.log(&task.id, LogLevel::Error, &error).await;
                return Ok(AgentOutcome::Fail {
                    error,
                    artifact: None,
                });
            }
            (
                json!({"error": "No data provided for analysis"}),
                "No data provided for analysis.".to_string(),
            )
        }
        Some(series) => match analysis_type {
            "summary" => summarize(ctx, task, &series).await,
            "trend" => trend(&series),
            other => (
                json!({"analysis_type": other, "data_points": series.len()}),
                format!("Analysis completed for type '{other}'."),
            ),
        },
    };

    let body = json!({"stats": stats, "insights": insights});
    let artifact = ArtifactOutput::json(task, "_analysis", "analysis.json", &body);
    let result = json!({
        "ok": true,
        "job_id": task.job_id,
        "executor": "analyzer",
        "stats": stats,
        "insights": insights,
    });

    ctx.log(
        &task.id,
        LogLevel::Info,
        &format!("Analysis completed: {analysis_type}"),
    )
    .await;

    Ok(AgentOutcome::Complete {
        result,
        artifact: Some(artifact),
    })
}

/// Extract a numeric series from the accepted `data` shapes: a numeric
/// sequence, a JSON string encoding one, or a list of objects with one of
/// the preferred numeric fields.
fn extract_series(data: &Value) -> Option<Vec<f64>> {
    match data {
        Value::String(s) => {
            let parsed: Value = serde_json::from_str(s.trim()).ok()?;
            extract_series(&parsed)
        }
        Value::Array(items) if !items.is_empty() => {
            let numbers: Vec<f64> = items
                .iter()
                .filter_map(|item| match item {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                })
                .collect();
            if numbers.len() == items.len() {
                return Some(numbers);
            }

            if items.iter().all(Value::is_object) {
                let field = NUMERIC_FIELDS.iter().find(|field| {
                    items
                        .iter()
                        .any(|item| item.get(**field).and_then(Value::as_f64).is_some())
                })?;
                let column: Vec<f64> = items
                    .iter()
                    .filter_map(|item| item.get(*field).and_then(Value::as_f64))
                    .collect();
                return (!column.is_empty()).then_some(column);
            }
            None
        }
        _ => None,
    }
}

async fn summarize(
    ctx: &AgentContext,
    task: &TaskInfo,
    series: &[f64],
) -> (Value, String) {
    let count = series.len();
    let mean = series.iter().sum::<f64>() / count as f64;
    let median = median_of(series);
    let min = series.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = series.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    let stats = json!({
        "count": count,
        "mean": mean,
        "median": median,
        "min": min,
        "max": max,
    });

    let sample: Vec<f64> = series.iter().take(30).cloned().collect();
    let prompt = format!(
        "Analyze this statistical data and provide concise insights:\n\n\
         Data: {sample:?}\n\
         Statistics: count={count}, mean={mean:.2}, median={median:.2}, range={min:.1}-{max:.1}\n\n\
         Provide 2-3 short, actionable insights (1 sentence each). \
         Be specific and quantitative where possible."
    );

    let insights = match ctx
        .ai
        .generate(
            &prompt,
            &GenerateOptions::for_task("analyzer")
                .temperature(0.4)
                .max_tokens(150),
        )
        .await
    {
        Ok(insights) => {
            ctx.log(&task.id, LogLevel::Info, "AI insights generated").await;
            insights
        }
        Err(e) => {
            ctx.log(&task.id, LogLevel::Warn, &format!("AI insights failed: {e}"))
                .await;
            "AI analysis unavailable".to_string()
        }
    };

    (stats, insights)
}

/// Deterministic trend label over the series.
fn trend(series: &[f64]) -> (Value, String) {
    let increasing = series.windows(2).all(|pair| pair[0] <= pair[1]);
    let decreasing = series.windows(2).all(|pair| pair[0] >= pair[1]);
    let label = if increasing {
        "increasing"
    } else if decreasing {
        "decreasing"
    } else {
        "mixed"
    };

    let stats = json!({
        "trend": label,
        "data_points": series.len(),
        "first": series.first(),
        "last": series.last(),
    });
    let insights = format!(
        "Detected a {label} trend across {} data points.",
        series.len()
    );
    (stats, insights)
}

async fn analyze_text(ctx: &AgentContext, task: &TaskInfo, text: &str) -> (Value, String) {
    let capped: String = text.chars().take(MAX_TEXT_CHARS).collect();
    let prompt = format!(
        "Analyze the following text and provide a concise analytical interpretation.\n\n\
         Requirements:\n\
         - Identify key themes and entities.\n\
         - Provide 2-4 actionable insights.\n\
         - If the text implies comparisons, categories, or rankings, call them out.\n\n\
         Text:\n{capped}"
    );

    let stats = json!({
        "analysis_mode": "text",
        "text_length": text.chars().count(),
    });

    let insights = match ctx
        .ai
        .generate(
            &prompt,
            &GenerateOptions::for_task("analyzer")
                .temperature(0.4)
                .max_tokens(350),
        )
        .await
    {
        Ok(insights) => insights,
        Err(e) => {
            ctx.log(&task.id, LogLevel::Warn, &format!("Text analysis failed: {e}"))
                .await;
            "AI analysis unavailable".to_string()
        }
    };

    (stats, insights)
}

fn median_of(series: &[f64]) -> f64 {
    let mut sorted = series.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn extracts_plain_numeric_sequence() {
        assert_eq!(
            extract_series(&json!([1, 2, "3"])),
            Some(vec![1.0, 2.0, 3.0])
        );
    }

    #[test]
    fn extracts_from_json_string() {
        assert_eq!(
            extract_series(&json!("[4, 5, 6]")),
            Some(vec![4.0, 5.0, 6.0])
        );
    }

    #[test]
    fn extracts_preferred_column_from_objects() {
        let data = json!([
            {"name": "a", "sales": 10},
            {"name": "b", "sales": 20}
        ]);
        assert_eq!(extract_series(&data), Some(vec![10.0, 20.0]));

        // `score` is preferred over `sales` when both exist.
        let data = json!([{"score": 1, "sales": 9}, {"score": 2, "sales": 8}]);
        assert_eq!(extract_series(&data), Some(vec![1.0, 2.0]));
    }

    #[test]
    fn rejects_unusable_shapes() {
        assert_eq!(extract_series(&json!([])), None);
        assert_eq!(extract_series(&json!("not json")), None);
        assert_eq!(extract_series(&json!([{"name": "a"}])), None);
        assert_eq!(extract_series(&json!(42)), None);
    }

    #[test]
    fn median_handles_even_and_odd_lengths() {
        assert_eq!(median_of(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median_of(&[4.0, 1.0, 2.0, 3.0]), 2.5);
    }

    #[test]
    fn trend_labels() {
        assert_eq!(trend(&[1.0, 2.0, 2.0, 3.0]).0["trend"], json!("increasing"));
        assert_eq!(trend(&[3.0, 2.0, 1.0]).0["trend"], json!("decreasing"));
        assert_eq!(trend(&[1.0, 3.0, 2.0]).0["trend"], json!("mixed"));
    }
}
