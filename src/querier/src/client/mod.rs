//! Prometheus HTTP API calls.
//!
//! A compiled query turns into up to three calls:
//!
//! ```text
//! GET|POST /api/v1/query            query, time
//! GET|POST /api/v1/query_range      query, start, end, step
//! GET|POST /api/v1/query_exemplars  query, start, end
//! ```
//!
//! [`transport`] sends them, [`response`] turns the answers into frames.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::query::CompiledQuery;

pub mod response;
pub mod transport;

pub use response::{ResponseParser, parse_response};
pub use transport::{HttpMethod, PrometheusTransport, ReqwestTransport};

#[cfg(any(test, feature = "testing"))]
pub use transport::MockTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CallKind {
    Instant,
    Range,
    Exemplar,
}

impl CallKind {
    pub fn path(&self) -> &'static str {
        match self {
            CallKind::Instant => "/api/v1/query",
            CallKind::Range => "/api/v1/query_range",
            CallKind::Exemplar => "/api/v1/query_exemplars",
        }
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallKind::Instant => write!(f, "instant"),
            CallKind::Range => write!(f, "range"),
            CallKind::Exemplar => write!(f, "exemplar"),
        }
    }
}

/// One backend call, independent of the HTTP method used to send it.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub ref_id: String,
    pub kind: CallKind,
    pub params: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn instant(query: &CompiledQuery) -> Self {
        Self {
            ref_id: query.ref_id.clone(),
            kind: CallKind::Instant,
            params: vec![
                ("query".to_string(), query.expr.clone()),
                ("time".to_string(), format_time(query.end)),
            ],
        }
    }

    pub fn range(query: &CompiledQuery) -> Self {
        let range = query.time_range();
        Self {
            ref_id: query.ref_id.clone(),
            kind: CallKind::Range,
            params: vec![
                ("query".to_string(), query.expr.clone()),
                ("start".to_string(), format_time(range.start)),
                ("end".to_string(), format_time(range.end)),
                ("step".to_string(), format_seconds(range.step)),
            ],
        }
    }

    pub fn exemplars(query: &CompiledQuery) -> Self {
        let range = query.time_range();
        Self {
            ref_id: query.ref_id.clone(),
            kind: CallKind::Exemplar,
            params: vec![
                ("query".to_string(), query.expr.clone()),
                ("start".to_string(), format_time(range.start)),
                ("end".to_string(), format_time(range.end)),
            ],
        }
    }

    pub fn path(&self) -> &'static str {
        self.kind.path()
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Raw backend answer: status code and the complete body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Unix seconds with a fractional part, shortest form.
pub fn format_time(t: DateTime<Utc>) -> String {
    let seconds = t.timestamp() as f64 + f64::from(t.timestamp_subsec_nanos()) / 1e9;
    seconds.to_string()
}

fn format_seconds(step: chrono::TimeDelta) -> String {
    let seconds = step
        .num_nanoseconds()
        .map_or(step.num_seconds() as f64, |nanos| nanos as f64 / 1e9);
    seconds.to_string()
}
