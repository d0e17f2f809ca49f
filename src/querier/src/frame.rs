//! Tabular output model.
//!
//! Every backend result is turned into [`Frame`]s: named, column-oriented
//! tables whose fields share one length. The value field of a time series
//! carries the series labels and the display name computed from the
//! query's legend format.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

pub const TIME_FIELD_NAME: &str = "Time";
pub const VALUE_FIELD_NAME: &str = "Value";
/// Name of the single frame the exemplar reducer emits.
pub const EXEMPLAR_FRAME_NAME: &str = "exemplar";

/// Legend value asking the caller to pick a display name itself.
pub const LEGEND_FORMAT_AUTO: &str = "__auto";
const METRIC_NAME_LABEL: &str = "__name__";

static LEGEND_FORMAT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*(.+?)\s*\}\}").expect("legend format regex is valid"));

pub type Labels = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "values", rename_all = "snake_case")]
pub enum FieldValues {
    Time(Vec<DateTime<Utc>>),
    Float(Vec<f64>),
    Int(Vec<i64>),
    String(Vec<String>),
}

impl FieldValues {
    pub fn len(&self) -> usize {
        match self {
            FieldValues::Time(values) => values.len(),
            FieldValues::Float(values) => values.len(),
            FieldValues::Int(values) => values.len(),
            FieldValues::String(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConfig {
    /// Step of the query that produced the field
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name_from_ds: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub name: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: Labels,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<FieldConfig>,
    #[serde(flatten)]
    pub values: FieldValues,
}

impl Field {
    pub fn new(name: impl Into<String>, values: FieldValues) -> Self {
        Self {
            name: name.into(),
            labels: Labels::new(),
            config: None,
            values,
        }
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_config(mut self, config: FieldConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn time_at(&self, idx: usize) -> Option<DateTime<Utc>> {
        match &self.values {
            FieldValues::Time(values) => values.get(idx).copied(),
            _ => None,
        }
    }

    pub fn float_at(&self, idx: usize) -> Option<f64> {
        match &self.values {
            FieldValues::Float(values) => values.get(idx).copied(),
            _ => None,
        }
    }

    pub fn string_at(&self, idx: usize) -> Option<&str> {
        match &self.values {
            FieldValues::String(values) => values.get(idx).map(String::as_str),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameKind {
    TimeSeriesMulti,
    NumericMulti,
    HeatmapCells,
    Exemplar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub severity: Severity,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMeta {
    pub kind: FrameKind,
    /// `"Expr: <expr>\nStep: <step>"`
    pub executed_query_string: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notices: Vec<Notice>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    pub name: String,
    pub ref_id: String,
    pub fields: Vec<Field>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<FrameMeta>,
}

impl Frame {
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            ref_id: String::new(),
            fields,
            meta: None,
        }
    }

    pub fn with_meta(mut self, meta: FrameMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn rows(&self) -> usize {
        self.fields.first().map_or(0, Field::len)
    }

    pub fn kind(&self) -> Option<FrameKind> {
        self.meta.as_ref().map(|meta| meta.kind)
    }

    pub fn is_exemplar(&self) -> bool {
        self.kind() == Some(FrameKind::Exemplar)
    }

    /// Step recorded on the first field, if any.
    pub fn interval_ms(&self) -> Option<f64> {
        self.fields
            .first()
            .and_then(|field| field.config.as_ref())
            .and_then(|config| config.interval_ms)
    }
}

/// Display name for a series with `labels`.
///
/// `None` means the caller should choose one.
pub fn display_name(legend_format: &str, labels: &Labels, expr: &str) -> Option<String> {
    let legend = if legend_format == LEGEND_FORMAT_AUTO {
        if labels.is_empty() {
            metric_name_from_labels(labels)
        } else {
            String::new()
        }
    } else if legend_format.is_empty() {
        metric_name_from_labels(labels)
    } else {
        LEGEND_FORMAT_RE
            .replace_all(legend_format, |caps: &regex::Captures<'_>| {
                labels.get(&caps[1]).cloned().unwrap_or_default()
            })
            .into_owned()
    };

    match legend.as_str() {
        "" => None,
        "{}" => Some(expr.to_string()),
        _ => Some(legend),
    }
}

/// `name{a="1", b="2"}`, or `{}` for a series without labels.
pub fn metric_name_from_labels(labels: &Labels) -> String {
    let metric_name = labels.get(METRIC_NAME_LABEL);
    let pairs: Vec<String> = labels
        .iter()
        .filter(|(name, _)| name.as_str() != METRIC_NAME_LABEL)
        .map(|(name, value)| format!("{name}={value:?}"))
        .collect();

    match (metric_name, pairs.is_empty()) {
        (Some(name), true) => name.clone(),
        (name, _) => format!(
            "{}{{{}}}",
            name.map(String::as_str).unwrap_or_default(),
            pairs.join(", ")
        ),
    }
}
