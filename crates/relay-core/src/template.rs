//! Unresolved-template detection.
//!
//! The orchestrator substitutes `{{tasks.X.outputs.Y}}` references before a
//! task is enqueued. Any `{{...}}` still present in a payload therefore means
//! a dependency has not completed, and agents that render artifacts must
//! refuse to run rather than bake the placeholder into a chart or report.

use std::sync::LazyLock;

use regex::Regex;

static TEMPLATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{[^}]+\}\}").expect("template regex is valid"));

/// Return every unresolved `{{...}}` placeholder in the serialized payload.
pub fn find_unresolved(payload: &serde_json::Value) -> Vec<String> {
    let serialized = payload.to_string();
    TEMPLATE_RE
        .find_iter(&serialized)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Is this single string an unresolved template reference?
pub fn is_unresolved(value: &str) -> bool {
    value.starts_with("{{")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn clean_payload_has_no_placeholders() {
        let payload = json!({"title": "Latency", "y": [1, 2, 3]});
        assert!(find_unresolved(&payload).is_empty());
    }

    #[test]
    fn nested_placeholder_is_found() {
        let payload = json!({
            "title": "Latency",
            "y": ["{{tasks.a.outputs.y}}"],
            "style": {"font": "{{tasks.b.outputs.font}}"}
        });
        let found = find_unresolved(&payload);
        assert_eq!(
            found,
            vec!["{{tasks.a.outputs.y}}", "{{tasks.b.outputs.font}}"]
        );
    }

    #[test]
    fn single_braces_are_not_placeholders() {
        let payload = json!({"content": "set {x} to {y}"});
        assert!(find_unresolved(&payload).is_empty());
    }

    #[test]
    fn is_unresolved_only_matches_leading_braces() {
        assert!(is_unresolved("{{tasks.a.outputs.b}}"));
        assert!(!is_unresolved("http://x/{{later}}"));
        assert!(!is_unresolved("plain"));
    }
}
