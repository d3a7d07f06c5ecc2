//! Validator agent: rule-based checks with an AI critique on top.

use anyhow::Result;
use serde_json::{Map, Value, json};

use relay_db::models::LogLevel;

use super::{AgentContext, AgentOutcome, ArtifactOutput, TaskInfo};
use crate::ai::GenerateOptions;

pub async fn run(ctx: &AgentContext, task: &TaskInfo, payload: &Value) -> Result<AgentOutcome> {
    let data = payload.get("data").cloned().unwrap_or(Value::Object(Map::new()));
    let rules_raw = payload.get("rules").cloned().unwrap_or(Value::Object(Map::new()));
    let rules = normalize_rules(&rules_raw);

    let (errors, warnings) = validate(&data, &rules);

    let has_data = match &data {
        Value::Null => false,
        Value::Object(fields) => !fields.is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    };
    let ai_validation = if has_data && !rules.is_empty() {
        let prompt = format!(
            "Perform semantic validation on this data against the rules:\n\n\
             Data: {}\n\
             Rules: {}\n\n\
             Provide:\n\
             1. Any additional validation concerns (semantic issues, data quality, etc.)\n\
             2. Suggestions for improvement\n\
             Keep it brief (2-3 sentences).",
            serde_json::to_string_pretty(&data).unwrap_or_default(),
            serde_json::to_string_pretty(&rules_raw).unwrap_or_default(),
        );
        match ctx
            .ai
            .generate(
                &prompt,
                &GenerateOptions::for_task("validator")
                    .temperature(0.3)
                    .max_tokens(200),
            )
            .await
        {
            Ok(critique) => {
                ctx.log(&task.id, LogLevel::Info, "AI validation completed").await;
                critique
            }
            Err(e) => {
                ctx.log(&task.id, LogLevel::Warn, &format!("AI validation failed: {e}"))
                    .await;
                "AI validation unavailable".to_string()
            }
        }
    } else {
        "No data or rules provided".to_string()
    };

    let valid = errors.is_empty();
    let body = json!({
        "valid": valid,
        "errors": errors,
        "warnings": warnings,
        "ai_validation": ai_validation,
    });
    let artifact = ArtifactOutput::json(task, "_validation", "validation.json", &body);
    let result = json!({
        "ok": true,
        "job_id": task.job_id,
        "executor": "validator",
        "valid": valid,
        "errors": errors,
        "warnings": warnings,
        "ai_validation": ai_validation,
    });

    ctx.log(
        &task.id,
        LogLevel::Info,
        &format!(
            "Validation completed: {}",
            if valid { "passed" } else { "failed" }
        ),
    )
    .await;

    Ok(AgentOutcome::Complete {
        result,
        artifact: Some(artifact),
    })
}

/// One field rule in the internal form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldRule {
    pub required: bool,
    /// `number` or `string`; anything else is ignored.
    pub kind: Option<String>,
    pub min: Option<f64>,
}

/// Normalize rules into the internal `{field: {required?, type?, min?}}`
/// form. Accepts the internal form itself (idempotent) and a
/// JSON-Schema-ish form with `properties` / `required` / `items.properties`.
pub fn normalize_rules(rules: &Value) -> Vec<(String, FieldRule)> {
    let Some(object) = rules.as_object() else {
        return Vec::new();
    };

    // Schema-ish: properties at the top level or under items.
    let schema_properties = object
        .get("properties")
        .and_then(Value::as_object)
        .or_else(|| {
            object
                .get("items")
                .and_then(|items| items.get("properties"))
                .and_then(Value::as_object)
        });

    if let Some(properties) = schema_properties {
        let required: Vec<&str> = object
            .get("required")
            .or_else(|| object.get("items").and_then(|items| items.get("required")))
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        return properties
            .iter()
            .map(|(field, schema)| {
                let kind = schema
                    .get("type")
                    .and_then(Value::as_str)
                    .and_then(|t| match t {
                        "number" | "integer" => Some("number".to_string()),
                        "string" => Some("string".to_string()),
                        _ => None,
                    });
                let min = schema
                    .get("min")
                    .or_else(|| schema.get("minimum"))
                    .and_then(Value::as_f64);
                (
                    field.clone(),
                    FieldRule {
                        required: required.contains(&field.as_str()),
                        kind,
                        min,
                    },
                )
            })
            .collect();
    }

    // Internal form.
    object
        .iter()
        .filter_map(|(field, rule)| {
            let rule = rule.as_object()?;
            Some((
                field.clone(),
                FieldRule {
                    required: rule.get("required").and_then(Value::as_bool).unwrap_or(false),
                    kind: rule
                        .get("type")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    min: rule.get("min").and_then(Value::as_f64),
                },
            ))
        })
        .collect()
}

/// Validate an object or a list of objects against the rules, indexing row
/// numbers in messages for lists.
pub fn validate(data: &Value, rules: &[(String, FieldRule)]) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    match data {
        Value::Array(items) => {
            for (row, item) in items.iter().enumerate() {
                validate_item(item, rules, Some(row), &mut errors, &mut warnings);
            }
        }
        item => validate_item(item, rules, None, &mut errors, &mut warnings),
    }

    (errors, warnings)
}

fn validate_item(
    item: &Value,
    rules: &[(String, FieldRule)],
    row: Option<usize>,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    let at_row = |message: String| match row {
        Some(index) => format!("{message} (row {index})"),
        None => message,
    };

    let Some(object) = item.as_object() else {
        errors.push(at_row("Item is not an object".to_string()));
        return;
    };

    for (field, rule) in rules {
        let value = object.get(field);

        // Required means the key is present -- a value of 0 or "" passes.
        if rule.required && value.is_none() {
            errors.push(at_row(format!("Missing required field: {field}")));
        }

        let Some(value) = value else { continue };
        if value.is_null() {
            continue;
        }

        match rule.kind.as_deref() {
            Some("number") if !value.is_number() => {
                errors.push(at_row(format!("Field {field} should be a number")));
            }
            Some("string") if !value.is_string() => {
                errors.push(at_row(format!("Field {field} should be a string")));
            }
            _ => {}
        }

        if let (Some(min), Some(number)) = (rule.min, value.as_f64()) {
            if number < min {
                warnings.push(at_row(format!(
                    "Field {field} below minimum: {number} < {min}"
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn internal_rules_pass_through() {
        let rules = normalize_rules(&json!({
            "age": {"required": true, "type": "number", "min": 18},
            "name": {"type": "string"}
        }));
        let age = rules.iter().find(|(f, _)| f == "age").unwrap();
        assert!(age.1.required);
        assert_eq!(age.1.kind.as_deref(), Some("number"));
        assert_eq!(age.1.min, Some(18.0));
    }

    #[test]
    fn normalization_is_idempotent_over_internal_form() {
        let internal = json!({
            "age": {"required": true, "type": "number", "min": 18}
        });
        let once = normalize_rules(&internal);

        // Re-encode the normalized form as internal-rule JSON and normalize
        // again: same outcome.
        let reencoded = json!({
            "age": {"required": true, "type": "number", "min": 18.0}
        });
        let twice = normalize_rules(&reencoded);
        assert_eq!(once, twice);
    }

    #[test]
    fn schema_form_is_normalized() {
        let rules = normalize_rules(&json!({
            "properties": {
                "age": {"type": "integer", "minimum": 21},
                "name": {"type": "string"}
            },
            "required": ["age"]
        }));
        let age = rules.iter().find(|(f, _)| f == "age").unwrap();
        assert!(age.1.required);
        assert_eq!(age.1.kind.as_deref(), Some("number"));
        assert_eq!(age.1.min, Some(21.0));
        let name = rules.iter().find(|(f, _)| f == "name").unwrap();
        assert!(!name.1.required);
    }

    #[test]
    fn items_properties_form_is_normalized() {
        let rules = normalize_rules(&json!({
            "items": {
                "properties": {"score": {"type": "number"}},
                "required": ["score"]
            }
        }));
        let score = rules.iter().find(|(f, _)| f == "score").unwrap();
        assert!(score.1.required);
    }

    #[test]
    fn required_is_presence_not_truthiness() {
        let rules = normalize_rules(&json!({"count": {"required": true, "type": "number"}}));
        let (errors, _) = validate(&json!({"count": 0}), &rules);
        assert!(errors.is_empty(), "zero must satisfy required: {errors:?}");

        let (errors, _) = validate(&json!({}), &rules);
        assert_eq!(errors, vec!["Missing required field: count"]);
    }

    #[test]
    fn type_mismatches_are_errors() {
        let rules = normalize_rules(&json!({
            "age": {"type": "number"},
            "name": {"type": "string"}
        }));
        let (errors, _) = validate(&json!({"age": "old", "name": 7}), &rules);
        assert!(errors.contains(&"Field age should be a number".to_string()));
        assert!(errors.contains(&"Field name should be a string".to_string()));
    }

    #[test]
    fn min_violations_are_warnings_not_errors() {
        let rules = normalize_rules(&json!({"age": {"type": "number", "min": 18}}));
        let (errors, warnings) = validate(&json!({"age": 11}), &rules);
        assert!(errors.is_empty());
        assert_eq!(warnings, vec!["Field age below minimum: 11 < 18"]);
    }

    #[test]
    fn list_items_are_indexed_in_messages() {
        let rules = normalize_rules(&json!({"score": {"required": true}}));
        let data = json!([{"score": 5}, {}, {"score": 1}]);
        let (errors, _) = validate(&data, &rules);
        assert_eq!(errors, vec!["Missing required field: score (row 1)"]);
    }
}
