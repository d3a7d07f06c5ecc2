use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// The agent responsible for executing a task.
///
/// The set of built-in agents is closed; anything else is carried verbatim
/// as [`AgentKind::Custom`] and routed to the generic AI executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Reviewer,
    Designer,
    Chart,
    Analyzer,
    Summarizer,
    Validator,
    Transformer,
    Notifier,
    Scraper,
    #[serde(untagged)]
    Custom(String),
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Reviewer => "reviewer",
            Self::Designer => "designer",
            Self::Chart => "chart",
            Self::Analyzer => "analyzer",
            Self::Summarizer => "summarizer",
            Self::Validator => "validator",
            Self::Transformer => "transformer",
            Self::Notifier => "notifier",
            Self::Scraper => "scraper",
            Self::Custom(other) => other,
        };
        f.write_str(s)
    }
}

impl FromStr for AgentKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "reviewer" => Self::Reviewer,
            "designer" => Self::Designer,
            "chart" => Self::Chart,
            "analyzer" => Self::Analyzer,
            "summarizer" => Self::Summarizer,
            "validator" => Self::Validator,
            "transformer" => Self::Transformer,
            "notifier" => Self::Notifier,
            "scraper" => Self::Scraper,
            other => Self::Custom(other.to_owned()),
        })
    }
}

// ---------------------------------------------------------------------------

/// Severity of a task log entry, stored uppercase in `task_logs.level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = LogLevelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INFO" => Ok(Self::Info),
            "WARN" => Ok(Self::Warn),
            "ERROR" => Ok(Self::Error),
            other => Err(LogLevelParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`LogLevel`] string.
#[derive(Debug, Clone)]
pub struct LogLevelParseError(pub String);

impl fmt::Display for LogLevelParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid log level: {:?}", self.0)
    }
}

impl std::error::Error for LogLevelParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// The slice of a task row the worker needs to execute it.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub agent_type: AgentKind,
    /// Original payload as stored by the orchestrator. May still contain
    /// unresolved `{{...}}` templates; the message payload takes precedence.
    pub payload: Option<serde_json::Value>,
    pub job_id: Option<String>,
    pub name: Option<String>,
}

/// Status and result of a task another task wants to review.
#[derive(Debug, Clone, FromRow)]
pub struct TargetTask {
    /// Raw status string -- the full status set is owned by the orchestrator,
    /// the worker only ever compares against `SUCCESS`.
    pub status: String,
    pub result: Option<serde_json::Value>,
}

/// An artifact row as seen by the designer/notifier agents.
///
/// Also deserializes from payload-embedded artifact objects, which may omit
/// any of these fields -- hence everything is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ArtifactRow {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(rename = "type", default)]
    #[sqlx(rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub storage_key: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub agent_type: Option<String>,
}

/// The most recent current PDF artifact for a job.
#[derive(Debug, Clone, FromRow)]
pub struct PdfArtifact {
    pub storage_key: Option<String>,
    pub filename: Option<String>,
    pub role: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_kind_display_roundtrip() {
        let variants = [
            AgentKind::Reviewer,
            AgentKind::Designer,
            AgentKind::Chart,
            AgentKind::Analyzer,
            AgentKind::Summarizer,
            AgentKind::Validator,
            AgentKind::Transformer,
            AgentKind::Notifier,
            AgentKind::Scraper,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: AgentKind = s.parse().expect("infallible");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn agent_kind_unknown_becomes_custom() {
        let parsed: AgentKind = "data_wrangler".parse().expect("infallible");
        assert_eq!(parsed, AgentKind::Custom("data_wrangler".to_string()));
        assert_eq!(parsed.to_string(), "data_wrangler");
    }

    #[test]
    fn log_level_display_roundtrip() {
        for v in [LogLevel::Info, LogLevel::Warn, LogLevel::Error] {
            let s = v.to_string();
            let parsed: LogLevel = s.parse().expect("should parse");
            assert_eq!(v, parsed);
        }
    }

    #[test]
    fn log_level_invalid() {
        assert!("DEBUG".parse::<LogLevel>().is_err());
    }

    #[test]
    fn artifact_row_deserializes_from_sparse_payload_object() {
        let row: ArtifactRow =
            serde_json::from_value(serde_json::json!({"type": "chart", "role": "latency_p95"}))
                .unwrap();
        assert_eq!(row.kind.as_deref(), Some("chart"));
        assert_eq!(row.role.as_deref(), Some("latency_p95"));
        assert!(row.id.is_none());
        assert!(row.storage_key.is_none());
    }
}
