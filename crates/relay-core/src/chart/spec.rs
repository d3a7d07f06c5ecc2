//! Chart specification: payload resolution, type auto-selection, strict
//! validation, and role mapping.
//!
//! The pipeline is ordered: explicit structured fields win, then data
//! inferred from `data` or a free-text field (JSON or CSV), then -- only when
//! the payload opts in with `allow_synthetic` -- a seeded synthetic series.
//! Validation is strict per chart type; anything that does not line up is a
//! permanent task failure, not a retry.

use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;

/// Closed keyword map from title/type fragments to semantic artifact roles.
/// Order matters: the first matching keyword wins.
const CHART_ROLE_MAP: [(&str, &str); 6] = [
    ("latency", "latency_p95"),
    ("throughput", "throughput"),
    ("errors", "error_rate"),
    ("response_time", "latency_p95"),
    ("requests_per_sec", "throughput"),
    ("error_percentage", "error_rate"),
];

/// Default role when nothing maps.
pub const DEFAULT_CHART_ROLE: &str = "chart";

/// Determine the artifact role for a chart payload.
///
/// Explicit `role` wins, then the first keyword found in the title, then an
/// exact chart-type key, then the generic default. Never empty.
pub fn chart_role(payload: &Value) -> String {
    if let Some(explicit) = payload.get("role").and_then(Value::as_str) {
        if !explicit.is_empty() {
            return explicit.to_string();
        }
    }

    let title = payload
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_lowercase();
    for (keyword, role) in CHART_ROLE_MAP {
        if title.contains(keyword) {
            return role.to_string();
        }
    }

    let chart_type = payload
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_lowercase();
    for (keyword, role) in CHART_ROLE_MAP {
        if chart_type == keyword {
            return role.to_string();
        }
    }

    DEFAULT_CHART_ROLE.to_string()
}

// ---------------------------------------------------------------------------
// Chart types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartType {
    Bar,
    Line,
    Scatter,
    Area,
    Pie,
    Histogram,
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bar => "bar",
            Self::Line => "line",
            Self::Scatter => "scatter",
            Self::Area => "area",
            Self::Pie => "pie",
            Self::Histogram => "histogram",
        };
        f.write_str(s)
    }
}

impl FromStr for ChartType {
    type Err = ChartTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bar" => Ok(Self::Bar),
            "line" => Ok(Self::Line),
            "scatter" => Ok(Self::Scatter),
            "area" => Ok(Self::Area),
            "pie" => Ok(Self::Pie),
            "histogram" => Ok(Self::Histogram),
            other => Err(ChartTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an unsupported chart type string.
#[derive(Debug, Clone)]
pub struct ChartTypeParseError(pub String);

impl fmt::Display for ChartTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unsupported chart type: {}", self.0)
    }
}

impl std::error::Error for ChartTypeParseError {}

// ---------------------------------------------------------------------------
// Coercion helpers
// ---------------------------------------------------------------------------

/// Coerce an array value to floats: numbers pass through, numeric strings
/// parse, everything else is skipped.
pub fn coerce_numbers(value: Option<&Value>) -> Vec<f64> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::Number(n) => n.as_f64(),
            Value::String(s) if !s.trim().is_empty() => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .collect()
}

/// Coerce an array value to display labels.
pub fn coerce_labels(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .map(|item| match item {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect()
}

/// Parse a scalar as f64 (number or numeric string).
fn scalar_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Raw chart fields and inference
// ---------------------------------------------------------------------------

/// Chart fields as collected from a payload before validation.
#[derive(Debug, Clone, Default)]
pub struct RawChart {
    pub title: Option<String>,
    pub chart_type: Option<String>,
    pub x: Vec<f64>,
    /// The x array rendered as strings, for categorical bar axes.
    pub x_categories: Vec<String>,
    pub y: Vec<f64>,
    pub labels: Vec<String>,
    pub values: Vec<f64>,
    pub x_label: String,
    pub y_label: String,
    pub role: Option<String>,
    pub bins: Option<usize>,
}

impl RawChart {
    /// Collect the explicit structured fields.
    pub fn from_payload(payload: &Value) -> Self {
        Self {
            title: payload
                .get("title")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            chart_type: payload
                .get("type")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            x: coerce_numbers(payload.get("x")),
            x_categories: coerce_labels(payload.get("x")),
            y: coerce_numbers(payload.get("y")),
            labels: coerce_labels(payload.get("labels")),
            values: coerce_numbers(payload.get("values")),
            x_label: payload
                .get("x_label")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            y_label: payload
                .get("y_label")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            role: payload
                .get("role")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            bins: payload
                .get("bins")
                .and_then(scalar_number)
                .map(|b| b.max(1.0) as usize),
        }
    }

    /// Does this carry any plottable data at all?
    pub fn has_data(&self) -> bool {
        !self.x.is_empty()
            || !self.x_categories.is_empty()
            || !self.y.is_empty()
            || !self.labels.is_empty()
            || !self.values.is_empty()
    }

    /// Is the payload complete enough to skip inference?
    pub fn is_sufficient(&self) -> bool {
        self.title.is_some() && self.chart_type.is_some() && self.has_data()
    }

    /// Fill any missing field from an inferred source. Explicit fields win.
    pub fn merge(&mut self, inferred: RawChart) {
        if self.title.is_none() {
            self.title = inferred.title;
        }
        if self.chart_type.is_none() {
            self.chart_type = inferred.chart_type;
        }
        if self.x.is_empty() && self.x_categories.is_empty() {
            self.x = inferred.x;
            self.x_categories = inferred.x_categories;
        }
        if self.y.is_empty() {
            self.y = inferred.y;
        }
        if self.labels.is_empty() {
            self.labels = inferred.labels;
        }
        if self.values.is_empty() {
            self.values = inferred.values;
        }
        if self.x_label.is_empty() {
            self.x_label = inferred.x_label;
        }
        if self.y_label.is_empty() {
            self.y_label = inferred.y_label;
        }
        if self.role.is_none() {
            self.role = inferred.role;
        }
        if self.bins.is_none() {
            self.bins = inferred.bins;
        }
    }

    /// Infer chart data from a decoded `data` value.
    ///
    /// Arrays of numbers become `values`; arrays of objects contribute an
    /// x column (from `x_field` when given) and the first numerically
    /// parseable column as y; objects and strings are decoded recursively.
    pub fn infer_from_value(value: &Value, x_field: Option<&str>) -> Option<RawChart> {
        match value {
            Value::String(s) => Self::infer_from_text(s),
            Value::Object(_) => {
                let raw = Self::from_payload(value);
                raw.has_data().then_some(raw)
            }
            Value::Array(items) if !items.is_empty() => {
                // Plain numeric sequence.
                let numbers: Vec<f64> = items.iter().filter_map(scalar_number).collect();
                if numbers.len() == items.len() {
                    return Some(RawChart {
                        values: numbers,
                        ..RawChart::default()
                    });
                }

                // List of objects: pick columns.
                if items.iter().all(Value::is_object) {
                    return Self::infer_from_objects(items, x_field);
                }
                None
            }
            _ => None,
        }
    }

    fn infer_from_objects(items: &[Value], x_field: Option<&str>) -> Option<RawChart> {
        // Find the y column: the first key (scanning the first row) whose
        // value parses as a number and is not the x column.
        let first = items.first()?.as_object()?;
        let y_key = first
            .iter()
            .find(|(key, value)| {
                Some(key.as_str()) != x_field && scalar_number(value).is_some()
            })
            .map(|(key, _)| key.clone())?;

        let mut x_categories = Vec::new();
        let mut y = Vec::new();
        for item in items {
            let Some(object) = item.as_object() else {
                continue;
            };
            let Some(value) = object.get(&y_key).and_then(scalar_number) else {
                continue;
            };
            if let Some(field) = x_field {
                let Some(label) = object.get(field) else {
                    continue;
                };
                x_categories.push(match label {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                });
            }
            y.push(value);
        }

        if y.is_empty() {
            return None;
        }
        Some(RawChart {
            x_categories,
            y,
            ..RawChart::default()
        })
    }

    /// Decode free text as JSON first, then as `label,value` CSV rows.
    pub fn infer_from_text(text: &str) -> Option<RawChart> {
        if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
            if let Some(raw) = Self::infer_from_value(&value, None) {
                return Some(raw);
            }
        }

        let mut labels = Vec::new();
        let mut values = Vec::new();
        for line in text.lines() {
            let cells: Vec<&str> = line.split(',').map(str::trim).collect();
            if cells.len() < 2 {
                continue;
            }
            let Some(last) = cells.last() else { continue };
            let Ok(value) = last.parse::<f64>() else {
                continue; // header or prose row
            };
            labels.push(cells[0].to_string());
            values.push(value);
        }
        if values.is_empty() {
            return None;
        }
        Some(RawChart {
            labels,
            values,
            ..RawChart::default()
        })
    }

    /// Pick a chart type when none was given.
    pub fn auto_type(&self) -> ChartType {
        if !self.labels.is_empty() && self.labels.len() == self.values.len() {
            ChartType::Bar
        } else if !self.values.is_empty() && self.x.is_empty() && self.y.is_empty() {
            ChartType::Histogram
        } else if !self.x.is_empty() && self.x.len() == self.y.len() {
            ChartType::Line
        } else {
            ChartType::Bar
        }
    }

    /// Validate into a renderable [`ChartSpec`], enforcing the per-type data
    /// rules. Errors are descriptive and permanent.
    pub fn validate(mut self) -> Result<ChartSpec, String> {
        let chart_type = match &self.chart_type {
            Some(s) => s
                .parse::<ChartType>()
                .map_err(|e| e.to_string())?,
            None => self.auto_type(),
        };

        // A bar auto-selected from labels+values plots the labels on x.
        if chart_type == ChartType::Bar
            && self.y.is_empty()
            && !self.values.is_empty()
            && self.labels.len() == self.values.len()
        {
            self.x_categories = std::mem::take(&mut self.labels);
            self.x = Vec::new();
            self.y = std::mem::take(&mut self.values);
        }

        match chart_type {
            ChartType::Pie => {
                if self.labels.is_empty()
                    || self.values.is_empty()
                    || self.labels.len() != self.values.len()
                {
                    return Err(format!(
                        "pie chart requires equal-length labels and values (got {} labels, {} values)",
                        self.labels.len(),
                        self.values.len()
                    ));
                }
            }
            ChartType::Histogram => {
                if self.values.is_empty() {
                    return Err("histogram requires a non-empty numeric values array".to_string());
                }
            }
            ChartType::Bar => {
                if self.y.is_empty() {
                    return Err("bar chart requires a non-empty numeric y array".to_string());
                }
                if !self.x.is_empty() && self.x.len() == self.y.len() {
                    // Numeric x plots as stringified categories.
                    self.x_categories = self.x.iter().map(|v| format_number(*v)).collect();
                } else if self.x_categories.len() != self.y.len() {
                    return Err(format!(
                        "bar chart x/y length mismatch ({} labels vs {} values)",
                        self.x_categories.len(),
                        self.y.len()
                    ));
                }
            }
            ChartType::Line | ChartType::Scatter | ChartType::Area => {
                if self.x.is_empty() || self.x.len() != self.y.len() {
                    return Err(format!(
                        "{chart_type} chart requires equal-length numeric x and y arrays (got {} x, {} y)",
                        self.x.len(),
                        self.y.len()
                    ));
                }
            }
        }

        Ok(ChartSpec {
            title: self.title.unwrap_or_else(|| "Chart".to_string()),
            chart_type,
            x: self.x,
            x_categories: self.x_categories,
            y: self.y,
            labels: self.labels,
            values: self.values,
            x_label: self.x_label,
            y_label: self.y_label,
            bins: self.bins.unwrap_or(10),
        })
    }
}

/// Render a float the way an axis label should read: integers lose the
/// trailing `.0`.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

// ---------------------------------------------------------------------------
// Validated spec
// ---------------------------------------------------------------------------

/// A chart that passed validation and can be rendered.
#[derive(Debug, Clone)]
pub struct ChartSpec {
    pub title: String,
    pub chart_type: ChartType,
    pub x: Vec<f64>,
    pub x_categories: Vec<String>,
    pub y: Vec<f64>,
    pub labels: Vec<String>,
    pub values: Vec<f64>,
    pub x_label: String,
    pub y_label: String,
    pub bins: usize,
}

impl ChartSpec {
    /// Number of plotted data points, by type.
    pub fn data_points(&self) -> usize {
        match self.chart_type {
            ChartType::Pie | ChartType::Histogram => self.values.len(),
            ChartType::Bar => self.y.len(),
            ChartType::Line | ChartType::Scatter | ChartType::Area => self.x.len(),
        }
    }

    /// Deterministic one-line description of the chart.
    pub fn describe(&self) -> String {
        let kind = self.chart_type.to_string();
        let mut capitalized = kind.clone();
        if let Some(first) = capitalized.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        format!(
            "{} chart showing {} ({} data points).",
            capitalized,
            self.title.to_lowercase(),
            self.data_points()
        )
    }
}

// ---------------------------------------------------------------------------
// Synthetic data (opt-in via allow_synthetic)
// ---------------------------------------------------------------------------

/// Seed derived from a topic string so synthetic output is stable per topic.
fn topic_seed(topic: &str) -> u64 {
    topic.chars().map(|c| c as u64).sum::<u64>() % 10_000
}

/// Synthesize a plausible (x, y) trend series for a topic.
pub fn synthesize_series(topic: &str) -> RawChart {
    let mut rng = StdRng::seed_from_u64(topic_seed(topic));
    let n: usize = rng.random_range(6..=10);
    let slope: f64 = rng.random_range(0.5..3.0);
    let noise: f64 = rng.random_range(0.3..1.2);
    let y0: f64 = rng.random_range(5.0..20.0);

    let x: Vec<f64> = (1..=n).map(|i| i as f64).collect();
    let y: Vec<f64> = (0..n)
        .map(|i| (y0 + slope * i as f64 + rng.random_range(-noise..noise)).max(0.0))
        .collect();

    let title = if topic.trim().is_empty() {
        "Synthetic Trend".to_string()
    } else {
        topic.trim().chars().take(80).collect()
    };

    RawChart {
        title: Some(title),
        x,
        y,
        x_label: "Period".to_string(),
        y_label: "Index".to_string(),
        role: Some("auto_chart".to_string()),
        ..RawChart::default()
    }
}

/// Synthesize pie slices for a topic (percentages summing to ~100).
pub fn synthesize_pie(topic: &str) -> RawChart {
    const CATEGORY_SETS: [[&str; 5]; 5] = [
        ["Category A", "Category B", "Category C", "Category D", "Category E"],
        ["Segment 1", "Segment 2", "Segment 3", "Segment 4", "Segment 5"],
        ["Group A", "Group B", "Group C", "Group D", "Other"],
        ["High", "Medium-High", "Medium", "Medium-Low", "Low"],
        ["Type I", "Type II", "Type III", "Type IV", "Type V"],
    ];

    let mut rng = StdRng::seed_from_u64(topic_seed(topic));
    let labels = CATEGORY_SETS[rng.random_range(0..CATEGORY_SETS.len())];
    let raw: Vec<f64> = labels.iter().map(|_| rng.random_range(15.0..45.0)).collect();
    let total: f64 = raw.iter().sum();
    let values: Vec<f64> = raw
        .iter()
        .map(|v| (v / total * 1000.0).round() / 10.0)
        .collect();

    RawChart {
        labels: labels.iter().map(|s| s.to_string()).collect(),
        values,
        ..RawChart::default()
    }
}

/// Synthesize a roughly normal sample for a histogram.
pub fn synthesize_histogram(topic: &str) -> RawChart {
    let mut rng = StdRng::seed_from_u64(topic_seed(topic));
    let mu: f64 = rng.random_range(30.0..70.0);
    let sigma: f64 = rng.random_range(5.0..15.0);
    // Sum of three uniforms approximates a normal closely enough for a
    // placeholder distribution.
    let values: Vec<f64> = (0..120)
        .map(|_| {
            let u: f64 = (0..3).map(|_| rng.random_range(-1.0..1.0)).sum::<f64>() / 3.0;
            (mu + u * sigma * 1.7).max(0.0)
        })
        .collect();

    RawChart {
        values,
        x_label: "Value".to_string(),
        y_label: "Frequency".to_string(),
        ..RawChart::default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
