//! Recipient list normalization.
//!
//! Payloads arrive with recipients as a JSON list, a JSON-encoded string, a
//! bracketed string, a separator-delimited string, or a single address.
//! Everything funnels into one deduplicated list of trimmed addresses.

use serde_json::Value;

/// Normalize any accepted recipients shape into a deduplicated list of
/// non-empty trimmed strings, preserving first-occurrence order.
pub fn normalize_recipients(value: &Value) -> Vec<String> {
    let mut collected = Vec::new();
    collect(value, &mut collected);
    dedup_stable(collected)
}

/// Pull recipients out of a notifier payload: `recipients`, then the legacy
/// `sent_to`, then a single `recipient`.
pub fn recipients_from_payload(payload: &Value) -> Vec<String> {
    for key in ["recipients", "sent_to", "recipient"] {
        if let Some(value) = payload.get(key) {
            let recipients = normalize_recipients(value);
            if !recipients.is_empty() {
                return recipients;
            }
        }
    }
    Vec::new()
}

fn collect(value: &Value, into: &mut Vec<String>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect(item, into);
            }
        }
        Value::String(text) => collect_string(text, into),
        _ => {}
    }
}

fn collect_string(text: &str, into: &mut Vec<String>) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return;
    }

    // A JSON-encoded list round-trips through the array path.
    if trimmed.starts_with('[') {
        if let Ok(parsed) = serde_json::from_str::<Value>(trimmed) {
            if parsed.is_array() {
                collect(&parsed, into);
                return;
            }
        }
    }

    // Strip bracket/quote noise, then split on the accepted separators.
    // Addresses never contain these characters, so the strip is safe.
    let cleaned: String = trimmed
        .chars()
        .filter(|c| !matches!(c, '[' | ']' | '"' | '\''))
        .collect();
    for part in cleaned.split([',', ';', '\n']) {
        let part = part.trim();
        if !part.is_empty() {
            into.push(part.to_string());
        }
    }
}

fn dedup_stable(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}
