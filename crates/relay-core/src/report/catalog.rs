//! Artifact catalog and per-section reference resolution.
//!
//! The catalog is materialized once per designer invocation: the job's
//! artifact rows from the store, then any artifacts embedded in the payload,
//! indexed by `(type, role)` with a list kept in order for fallback scans.
//! Resolution is deliberately forgiving -- a reference that cannot be
//! resolved downgrades its section to text, it never fails the report.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use relay_db::models::ArtifactRow;

use crate::template;

/// Artifact types that read as an image when resolving a string reference.
const IMAGE_LIKE_TYPES: [&str; 4] = ["chart", "image", "png", "visualization"];

static DOWNLOAD_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/api/artifacts/([A-Za-z0-9-]+)/download").expect("download-url regex is valid")
});

/// One section of a designer payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Section {
    #[serde(default)]
    pub heading: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    /// `null`, a structured `{type, role}` object, or a string reference.
    #[serde(default)]
    pub artifact: Option<Value>,
    #[serde(default)]
    pub caption: Option<String>,
}

impl Section {
    pub fn heading_or(&self, index: usize) -> String {
        self.heading
            .clone()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| format!("Section {}", index + 1))
    }
}

/// The job's artifacts, merged and indexed for resolution.
#[derive(Debug, Default)]
pub struct ArtifactCatalog {
    artifacts: Vec<ArtifactRow>,
    /// Keyed by `(type, role)`; later entries (payload artifacts) win.
    index: HashMap<(String, String), usize>,
}

impl ArtifactCatalog {
    /// Build the catalog: store rows first, payload artifacts second.
    pub fn new(store_rows: Vec<ArtifactRow>, payload_rows: Vec<ArtifactRow>) -> Self {
        let mut artifacts = store_rows;
        artifacts.extend(payload_rows);

        let mut index = HashMap::new();
        for (position, artifact) in artifacts.iter().enumerate() {
            if let (Some(kind), Some(role)) = (&artifact.kind, &artifact.role) {
                index.insert((kind.clone(), role.clone()), position);
            }
        }

        Self { artifacts, index }
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn all(&self) -> &[ArtifactRow] {
        &self.artifacts
    }

    fn by_type_role(&self, kind: &str, role: &str) -> Option<&ArtifactRow> {
        self.index
            .get(&(kind.to_string(), role.to_string()))
            .map(|position| &self.artifacts[*position])
    }

    /// Find an artifact whose id appears as a substring of `text`.
    pub fn by_id_substring(&self, text: &str) -> Option<&ArtifactRow> {
        self.artifacts.iter().find(|artifact| {
            artifact
                .id
                .as_deref()
                .is_some_and(|id| !id.is_empty() && text.contains(id))
        })
    }
}

/// Resolve a section's artifact reference against the catalog.
///
/// Returns `None` whenever the section should render as plain text: no
/// reference, a null-ish or unresolved reference, or nothing matching.
pub fn resolve_artifact_for_section<'a>(
    section: &Section,
    catalog: &'a ArtifactCatalog,
) -> Option<&'a ArtifactRow> {
    let reference = section.artifact.as_ref()?;

    match reference {
        Value::Null => None,
        Value::String(text) => resolve_string_reference(section, text, catalog),
        Value::Object(fields) => resolve_structured_reference(section, fields, catalog),
        other => {
            warn!(
                heading = %section.heading_or(0),
                reference = %other,
                "artifact reference has unexpected shape, rendering as text"
            );
            None
        }
    }
}

fn resolve_structured_reference<'a>(
    section: &Section,
    fields: &serde_json::Map<String, Value>,
    catalog: &'a ArtifactCatalog,
) -> Option<&'a ArtifactRow> {
    let kind = fields.get("type").and_then(Value::as_str).unwrap_or("");
    let role = fields.get("role").and_then(Value::as_str).unwrap_or("");
    if kind.is_empty() || role.is_empty() {
        warn!(
            heading = %section.heading_or(0),
            "artifact reference missing type or role, rendering as text"
        );
        return None;
    }

    // a. Exact (type, role).
    if let Some(artifact) = catalog.by_type_role(kind, role) {
        return Some(artifact);
    }

    // b. By role alone.
    if let Some(artifact) = catalog
        .all()
        .iter()
        .find(|artifact| artifact.role.as_deref() == Some(role))
    {
        return Some(artifact);
    }

    // c. By type, with the requested role contained in the artifact's role.
    if let Some(artifact) = catalog.all().iter().find(|artifact| {
        artifact.kind.as_deref() == Some(kind)
            && artifact.role.as_deref().is_some_and(|r| r.contains(role))
    }) {
        return Some(artifact);
    }

    // d. Any chart when a chart was asked for.
    if kind == "chart" {
        if let Some(artifact) = catalog
            .all()
            .iter()
            .find(|artifact| artifact.kind.as_deref() == Some("chart"))
        {
            return Some(artifact);
        }
    }

    // e. Any artifact whose role contains the requested role.
    if let Some(artifact) = catalog
        .all()
        .iter()
        .find(|artifact| artifact.role.as_deref().is_some_and(|r| r.contains(role)))
    {
        return Some(artifact);
    }

    warn!(
        heading = %section.heading_or(0),
        kind, role, "no artifact matched, rendering as text"
    );
    None
}

fn resolve_string_reference<'a>(
    section: &Section,
    text: &str,
    catalog: &'a ArtifactCatalog,
) -> Option<&'a ArtifactRow> {
    let trimmed = text.trim();
    if trimmed.is_empty()
        || trimmed == "null"
        || trimmed == "undefined"
        || template::is_unresolved(trimmed)
    {
        return None;
    }
    if catalog.is_empty() {
        warn!(
            heading = %section.heading_or(0),
            "string artifact reference but catalog is empty"
        );
        return None;
    }

    // 1. An artifact id embedded in the string (typically a download URL).
    if let Some(artifact) = catalog.by_id_substring(trimmed) {
        return Some(artifact);
    }

    // 2. First image-like artifact.
    if let Some(artifact) = catalog.all().iter().find(|artifact| {
        artifact
            .kind
            .as_deref()
            .is_some_and(|kind| IMAGE_LIKE_TYPES.contains(&kind.to_lowercase().as_str()))
    }) {
        return Some(artifact);
    }

    // 3. First available artifact.
    catalog.all().first()
}

/// Rewrite sections that embed an artifact download URL in their content.
///
/// A section with no `artifact` whose content matches the download-URL
/// pattern, where the id exists in the catalog, gets a structured reference
/// to that artifact and blank content.
pub fn backfill_sections_from_urls(sections: &mut [Section], catalog: &ArtifactCatalog) {
    for section in sections.iter_mut() {
        if section.artifact.is_some() {
            continue;
        }
        let Some(content) = section.content.as_deref() else {
            continue;
        };
        let Some(captures) = DOWNLOAD_URL_RE.captures(content) else {
            continue;
        };
        let id = &captures[1];

        let Some(artifact) = catalog
            .all()
            .iter()
            .find(|artifact| artifact.id.as_deref() == Some(id))
        else {
            continue;
        };

        section.artifact = Some(serde_json::json!({
            "type": artifact.kind,
            "role": artifact.role,
        }));
        section.content = Some(String::new());
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn artifact(id: &str, kind: &str, role: &str) -> ArtifactRow {
        ArtifactRow {
            id: Some(id.to_string()),
            kind: Some(kind.to_string()),
            role: Some(role.to_string()),
            storage_key: Some(format!("jobs/J/{id}.png")),
            ..ArtifactRow::default()
        }
    }

    fn section_with_artifact(reference: Value) -> Section {
        Section {
            heading: Some("Latency".to_string()),
            artifact: Some(reference),
            ..Section::default()
        }
    }

    #[test]
    fn no_reference_renders_as_text() {
        let catalog = ArtifactCatalog::new(vec![artifact("a1", "chart", "latency_p95")], vec![]);
        let section = Section::default();
        assert!(resolve_artifact_for_section(&section, &catalog).is_none());
    }

    #[test]
    fn nullish_references_render_as_text() {
        let catalog = ArtifactCatalog::new(vec![artifact("a1", "chart", "latency_p95")], vec![]);
        for reference in [
            Value::Null,
            json!("null"),
            json!("undefined"),
            json!(""),
            json!("{{tasks.chart.outputs.image_url}}"),
        ] {
            let section = section_with_artifact(reference.clone());
            assert!(
                resolve_artifact_for_section(&section, &catalog).is_none(),
                "reference {reference} should resolve to none"
            );
        }
    }

    #[test]
    fn exact_type_role_match_wins() {
        let catalog = ArtifactCatalog::new(
            vec![
                artifact("a1", "chart", "throughput"),
                artifact("a2", "chart", "latency_p95"),
            ],
            vec![],
        );
        let section = section_with_artifact(json!({"type": "chart", "role": "latency_p95"}));
        let resolved = resolve_artifact_for_section(&section, &catalog).unwrap();
        assert_eq!(resolved.id.as_deref(), Some("a2"));
    }

    #[test]
    fn falls_back_to_role_alone() {
        let catalog = ArtifactCatalog::new(vec![artifact("a1", "image", "latency_p95")], vec![]);
        let section = section_with_artifact(json!({"type": "chart", "role": "latency_p95"}));
        let resolved = resolve_artifact_for_section(&section, &catalog).unwrap();
        assert_eq!(resolved.id.as_deref(), Some("a1"));
    }

    #[test]
    fn falls_back_to_type_with_role_substring() {
        let catalog =
            ArtifactCatalog::new(vec![artifact("a1", "chart", "latency_p95_weekly")], vec![]);
        let section = section_with_artifact(json!({"type": "chart", "role": "latency_p95"}));
        let resolved = resolve_artifact_for_section(&section, &catalog).unwrap();
        assert_eq!(resolved.id.as_deref(), Some("a1"));
    }

    #[test]
    fn falls_back_to_any_chart_for_chart_requests() {
        let catalog = ArtifactCatalog::new(vec![artifact("a1", "chart", "conversion")], vec![]);
        let section = section_with_artifact(json!({"type": "chart", "role": "latency_p95"}));
        let resolved = resolve_artifact_for_section(&section, &catalog).unwrap();
        assert_eq!(resolved.id.as_deref(), Some("a1"));
    }

    #[test]
    fn falls_back_to_role_substring_across_types() {
        let catalog =
            ArtifactCatalog::new(vec![artifact("a1", "pdf", "latency_p95_report")], vec![]);
        let section = section_with_artifact(json!({"type": "image", "role": "latency_p95"}));
        let resolved = resolve_artifact_for_section(&section, &catalog).unwrap();
        assert_eq!(resolved.id.as_deref(), Some("a1"));
    }

    #[test]
    fn nothing_matching_renders_as_text() {
        let catalog = ArtifactCatalog::new(vec![artifact("a1", "pdf", "report")], vec![]);
        let section = section_with_artifact(json!({"type": "image", "role": "latency_p95"}));
        assert!(resolve_artifact_for_section(&section, &catalog).is_none());
    }

    #[test]
    fn missing_type_or_role_renders_as_text() {
        let catalog = ArtifactCatalog::new(vec![artifact("a1", "chart", "latency_p95")], vec![]);
        let section = section_with_artifact(json!({"type": "chart"}));
        assert!(resolve_artifact_for_section(&section, &catalog).is_none());
    }

    #[test]
    fn string_reference_matches_artifact_id_in_url() {
        let catalog = ArtifactCatalog::new(
            vec![
                artifact("aaaa-bbbb", "chart", "latency_p95"),
                artifact("cccc-dddd", "chart", "throughput"),
            ],
            vec![],
        );
        let section = section_with_artifact(json!(
            "http://orch:4000/api/artifacts/cccc-dddd/download"
        ));
        let resolved = resolve_artifact_for_section(&section, &catalog).unwrap();
        assert_eq!(resolved.id.as_deref(), Some("cccc-dddd"));
    }

    #[test]
    fn string_reference_falls_back_to_image_like_then_first() {
        let catalog = ArtifactCatalog::new(
            vec![
                artifact("p1", "pdf", "report"),
                artifact("i1", "image", "diagram"),
            ],
            vec![],
        );
        let section = section_with_artifact(json!("https://elsewhere.test/whatever"));
        let resolved = resolve_artifact_for_section(&section, &catalog).unwrap();
        assert_eq!(resolved.id.as_deref(), Some("i1"));

        let pdf_only = ArtifactCatalog::new(vec![artifact("p1", "pdf", "report")], vec![]);
        let resolved = resolve_artifact_for_section(&section, &pdf_only).unwrap();
        assert_eq!(resolved.id.as_deref(), Some("p1"));
    }

    #[test]
    fn payload_artifacts_override_store_rows_in_index() {
        let store = vec![artifact("db1", "chart", "latency_p95")];
        let payload = vec![artifact("pl1", "chart", "latency_p95")];
        let catalog = ArtifactCatalog::new(store, payload);
        let section = section_with_artifact(json!({"type": "chart", "role": "latency_p95"}));
        let resolved = resolve_artifact_for_section(&section, &catalog).unwrap();
        assert_eq!(resolved.id.as_deref(), Some("pl1"));
    }

    #[test]
    fn backfill_rewrites_matching_sections() {
        let catalog = ArtifactCatalog::new(vec![artifact("abc-123", "chart", "latency_p95")], vec![]);
        let mut sections = vec![
            Section {
                heading: Some("Latency".to_string()),
                content: Some(
                    "See http://orch:4000/api/artifacts/abc-123/download for details".to_string(),
                ),
                ..Section::default()
            },
            Section {
                heading: Some("Notes".to_string()),
                content: Some("No links here.".to_string()),
                ..Section::default()
            },
        ];

        backfill_sections_from_urls(&mut sections, &catalog);

        assert_eq!(
            sections[0].artifact,
            Some(json!({"type": "chart", "role": "latency_p95"}))
        );
        assert_eq!(sections[0].content.as_deref(), Some(""));
        assert!(sections[1].artifact.is_none());
        assert_eq!(sections[1].content.as_deref(), Some("No links here."));
    }

    #[test]
    fn backfill_ignores_unknown_ids_and_existing_references() {
        let catalog = ArtifactCatalog::new(vec![artifact("abc-123", "chart", "latency_p95")], vec![]);
        let mut sections = vec![
            Section {
                content: Some("http://orch:4000/api/artifacts/zzz-999/download".to_string()),
                ..Section::default()
            },
            Section {
                content: Some("http://orch:4000/api/artifacts/abc-123/download".to_string()),
                artifact: Some(json!({"type": "pdf", "role": "report"})),
                ..Section::default()
            },
        ];

        backfill_sections_from_urls(&mut sections, &catalog);

        assert!(sections[0].artifact.is_none());
        assert_eq!(
            sections[1].artifact,
            Some(json!({"type": "pdf", "role": "report"}))
        );
    }
}
