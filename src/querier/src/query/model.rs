//! Incoming query request model.
//!
//! Requests arrive as camelCase JSON, one batch at a time:
//!
//! ```json
//! {
//!   "headers": { "FromAlert": "false" },
//!   "queries": [
//!     {
//!       "refId": "A",
//!       "expr": "rate(http_requests_total[$__rate_interval])",
//!       "interval": "$__rate_interval",
//!       "timeRange": { "from": "2024-01-01T00:00:00Z", "to": "2024-01-01T01:00:00Z" }
//!     }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::interval::TimeRange;
use crate::query::promql::ScopeFilter;

/// Header set by alert evaluation; exemplar queries are skipped when `"true"`.
pub const FROM_ALERT_HEADER: &str = "FromAlert";

/// Requested result format.
///
/// Unknown values fall back to time series rather than failing the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryFormat {
    #[default]
    TimeSeries,
    Table,
    Heatmap,
}

impl<'de> Deserialize<'de> for QueryFormat {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = serde_json::Value::deserialize(deserializer)?;
        let format = match raw {
            serde_json::Value::String(text) => match text.as_str() {
                "table" => QueryFormat::Table,
                "heatmap" => QueryFormat::Heatmap,
                _ => QueryFormat::TimeSeries,
            },
            serde_json::Value::Number(number) => match number.as_i64() {
                Some(2) => QueryFormat::Table,
                Some(3) => QueryFormat::Heatmap,
                _ => QueryFormat::TimeSeries,
            },
            _ => QueryFormat::TimeSeries,
        };
        Ok(format)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub filters: Vec<ScopeFilter>,
}

/// One panel or alert query as sent by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    #[serde(default)]
    pub ref_id: String,
    #[serde(default)]
    pub expr: String,
    /// Minimum step: empty, a duration, or a macro such as `$__rate_interval`
    #[serde(default)]
    pub interval: String,
    #[serde(default)]
    pub interval_ms: i64,
    #[serde(default)]
    pub interval_factor: i64,
    #[serde(default)]
    pub legend_format: String,
    #[serde(default)]
    pub range: bool,
    #[serde(default)]
    pub instant: bool,
    #[serde(default)]
    pub exemplar: bool,
    #[serde(default)]
    pub format: QueryFormat,
    #[serde(default)]
    pub utc_offset_sec: i64,
    #[serde(default)]
    pub adhoc_filters: Vec<ScopeFilter>,
    #[serde(default)]
    pub scopes: Vec<Scope>,
    #[serde(default)]
    pub group_by_keys: Vec<String>,
    pub time_range: TimeRange,
    #[serde(default)]
    pub max_data_points: i64,
    /// Interval the caller computed for the panel, used by `$__rate_interval`
    #[serde(default)]
    pub interval_hint_ms: i64,
}

impl QueryRequest {
    pub fn new(ref_id: &str, expr: &str, time_range: TimeRange) -> Self {
        Self {
            ref_id: ref_id.to_string(),
            expr: expr.to_string(),
            interval: String::new(),
            interval_ms: 0,
            interval_factor: 0,
            legend_format: String::new(),
            range: false,
            instant: false,
            exemplar: false,
            format: QueryFormat::default(),
            utc_offset_sec: 0,
            adhoc_filters: Vec::new(),
            scopes: Vec::new(),
            group_by_keys: Vec::new(),
            time_range,
            max_data_points: 0,
            interval_hint_ms: 0,
        }
    }

    /// Filters of all scopes, in scope order.
    pub fn scope_filters(&self) -> Vec<ScopeFilter> {
        self.scopes
            .iter()
            .flat_map(|scope| scope.filters.iter().cloned())
            .collect()
    }
}

/// A batch of queries executed together
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryBatch {
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub queries: Vec<QueryRequest>,
}

impl QueryBatch {
    pub fn new(queries: Vec<QueryRequest>) -> Self {
        Self {
            headers: BTreeMap::new(),
            queries,
        }
    }

    pub fn from_alert(&self) -> bool {
        self.headers
            .get(FROM_ALERT_HEADER)
            .is_some_and(|value| value == "true")
    }
}
