//! Best-effort JSON extraction from model responses.

use std::sync::LazyLock;

use regex::Regex;

static FENCED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fenced-json regex is valid")
});

static BRACES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[^{}]*\}").expect("braces regex is valid"));

/// Pull a JSON value out of a model response.
///
/// Tries, in order: a fenced ```json``` block, the whole string, and the
/// first `{...}` substring. Returns the first successful parse.
pub fn extract_json(response: &str) -> Option<serde_json::Value> {
    if let Some(captures) = FENCED_RE.captures(response) {
        if let Ok(value) = serde_json::from_str(&captures[1]) {
            return Some(value);
        }
    }

    if let Ok(value) = serde_json::from_str(response.trim()) {
        return Some(value);
    }

    if let Some(found) = BRACES_RE.find(response) {
        if let Ok(value) = serde_json::from_str(found.as_str()) {
            return Some(value);
        }
    }

    None
}
