//! Backend response classification and JSON to frame conversion.
//!
//! The Prometheus API wraps every answer in the same envelope:
//!
//! ```json
//! {
//!   "status": "success" | "error",
//!   "data": ...,
//!   "errorType": "bad_data",
//!   "error": "parse error at char 5",
//!   "warnings": ["..."],
//!   "infos": ["..."]
//! }
//! ```
//!
//! `data` is `{ "resultType": ..., "result": ... }` for query calls and a
//! list of series with exemplars for exemplar calls.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{ApiResponse, CallKind};
use crate::error::QuerierError;
use crate::frame::{
    EXEMPLAR_FRAME_NAME, Field, FieldConfig, FieldValues, Frame, FrameKind, FrameMeta, Labels,
    Notice, Severity, TIME_FIELD_NAME, VALUE_FIELD_NAME, display_name,
};
use crate::interval::duration::format_duration;
use crate::query::CompiledQuery;

/// Longest body prefix kept for responses that are not parsed.
pub const MAX_ERROR_BODY_BYTES: usize = 1024;

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
enum Status {
    Success,
    Error,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(bound = "T: DeserializeOwned", rename_all = "camelCase")]
struct PromResponse<T> {
    status: Status,
    #[serde(default)]
    data: Option<T>,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    warnings: Vec<String>,
    #[serde(default)]
    infos: Vec<String>,
}

impl<T> PromResponse<T> {
    fn notices(&self) -> Vec<Notice> {
        let warnings = self.warnings.iter().map(|text| Notice {
            severity: Severity::Warning,
            text: text.clone(),
        });
        let infos = self.infos.iter().map(|text| Notice {
            severity: Severity::Info,
            text: text.clone(),
        });
        warnings.chain(infos).collect()
    }

    fn into_data(self) -> Result<Option<T>, QuerierError> {
        match self.status {
            Status::Success => Ok(self.data),
            Status::Error => Err(QuerierError::Api {
                error_type: self.error_type.unwrap_or_default(),
                message: self.error.unwrap_or_default(),
            }),
        }
    }
}

type SamplePair = (f64, String);
type HistogramPair = (f64, NativeHistogram);

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "camelCase")]
enum PromData {
    Matrix(Vec<MatrixSeries>),
    Vector(Vec<VectorSample>),
    Scalar(SamplePair),
    String(SamplePair),
}

#[derive(Clone, Debug, Deserialize)]
struct MatrixSeries {
    #[serde(default)]
    metric: Labels,
    #[serde(default)]
    values: Vec<SamplePair>,
    #[serde(default)]
    histograms: Vec<HistogramPair>,
}

#[derive(Clone, Debug, Deserialize)]
struct VectorSample {
    #[serde(default)]
    metric: Labels,
    #[serde(default)]
    value: Option<SamplePair>,
    #[serde(default)]
    histogram: Option<HistogramPair>,
}

/// `buckets` entries are `[boundary_rule, lower, upper, count]`.
#[derive(Clone, Debug, Deserialize)]
struct NativeHistogram {
    #[serde(default)]
    buckets: Vec<(i64, String, String, String)>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExemplarSeries {
    #[serde(default)]
    series_labels: Labels,
    #[serde(default)]
    exemplars: Vec<ExemplarSample>,
}

#[derive(Clone, Debug, Deserialize)]
struct ExemplarSample {
    #[serde(default)]
    labels: Labels,
    value: String,
    timestamp: f64,
}

/// Whether a response with `status` carries a Prometheus envelope worth parsing.
pub fn is_parseable_status(status: u16) -> bool {
    (200..300).contains(&status) || matches!(status, 400 | 422 | 503)
}

/// Converts backend answers for one compiled query into frames.
pub struct ResponseParser<'a> {
    query: &'a CompiledQuery,
    interval_ms: f64,
}

impl<'a> ResponseParser<'a> {
    pub fn new(query: &'a CompiledQuery) -> Self {
        Self {
            query,
            interval_ms: query.step.num_milliseconds() as f64,
        }
    }

    pub fn parse(&self, kind: CallKind, response: &ApiResponse) -> Result<Vec<Frame>, QuerierError> {
        if !is_parseable_status(response.status) {
            let end = response.body.len().min(MAX_ERROR_BODY_BYTES);
            let body = String::from_utf8_lossy(&response.body[..end]).into_owned();
            tracing::error!(
                ref_id = %self.query.ref_id,
                kind = %kind,
                status = response.status,
                "unexpected response from backend"
            );
            return Err(QuerierError::UnexpectedStatus {
                status: response.status,
                body,
            });
        }

        match kind {
            CallKind::Exemplar => self.parse_exemplars(response),
            CallKind::Instant | CallKind::Range => self.parse_query(response),
        }
    }

    fn parse_query(&self, response: &ApiResponse) -> Result<Vec<Frame>, QuerierError> {
        let envelope: PromResponse<PromData> = serde_json::from_slice(&response.body)?;
        self.log_warnings(&envelope.warnings);
        let notices = envelope.notices();

        let mut frames = match envelope.into_data()? {
            Some(PromData::Matrix(series)) => {
                let mut frames = Vec::with_capacity(series.len());
                for series in series {
                    frames.extend(self.matrix_frames(series)?);
                }
                frames
            }
            Some(PromData::Vector(samples)) => {
                let mut frames = Vec::with_capacity(samples.len());
                for sample in samples {
                    frames.extend(self.vector_frames(sample)?);
                }
                frames
            }
            Some(PromData::Scalar((ts, value))) => {
                vec![self.numeric_frame(Labels::new(), ts, &value)?]
            }
            Some(PromData::String((ts, text))) => vec![self.string_frame(ts, text)?],
            None => Vec::new(),
        };

        if frames.is_empty() {
            frames.push(Frame::new("", Vec::new()).with_meta(self.meta(FrameKind::TimeSeriesMulti)));
        }
        Ok(self.finish(frames, notices))
    }

    fn parse_exemplars(&self, response: &ApiResponse) -> Result<Vec<Frame>, QuerierError> {
        let envelope: PromResponse<Vec<ExemplarSeries>> = serde_json::from_slice(&response.body)?;
        self.log_warnings(&envelope.warnings);
        let notices = envelope.notices();

        let mut frames = Vec::new();
        for series in envelope.into_data()?.unwrap_or_default() {
            if !series.exemplars.is_empty() {
                frames.push(self.exemplar_frame(series)?);
            }
        }
        Ok(self.finish(frames, notices))
    }

    fn matrix_frames(&self, series: MatrixSeries) -> Result<Vec<Frame>, QuerierError> {
        let mut frames = Vec::new();

        if !series.values.is_empty() || series.histograms.is_empty() {
            let mut times = Vec::with_capacity(series.values.len());
            let mut values = Vec::with_capacity(series.values.len());
            for (ts, value) in &series.values {
                times.push(parse_timestamp(*ts)?);
                values.push(parse_value(value)?);
            }
            frames.push(
                Frame::new(
                    "",
                    vec![
                        self.time_field(times),
                        self.value_field(series.metric.clone(), FieldValues::Float(values)),
                    ],
                )
                .with_meta(self.meta(FrameKind::TimeSeriesMulti)),
            );
        }

        if !series.histograms.is_empty() {
            frames.push(self.heatmap_frame(&series.metric, &series.histograms)?);
        }
        Ok(frames)
    }

    fn vector_frames(&self, sample: VectorSample) -> Result<Vec<Frame>, QuerierError> {
        let mut frames = Vec::new();
        if let Some((ts, value)) = &sample.value {
            frames.push(self.numeric_frame(sample.metric.clone(), *ts, value)?);
        }
        if let Some(histogram) = sample.histogram {
            frames.push(self.heatmap_frame(&sample.metric, &[histogram])?);
        }
        Ok(frames)
    }

    fn numeric_frame(&self, labels: Labels, ts: f64, value: &str) -> Result<Frame, QuerierError> {
        Ok(Frame::new(
            "",
            vec![
                self.time_field(vec![parse_timestamp(ts)?]),
                self.value_field(labels, FieldValues::Float(vec![parse_value(value)?])),
            ],
        )
        .with_meta(self.meta(FrameKind::NumericMulti)))
    }

    fn string_frame(&self, ts: f64, text: String) -> Result<Frame, QuerierError> {
        Ok(Frame::new(
            "",
            vec![
                self.time_field(vec![parse_timestamp(ts)?]),
                Field::new(VALUE_FIELD_NAME, FieldValues::String(vec![text])),
            ],
        )
        .with_meta(self.meta(FrameKind::NumericMulti)))
    }

    /// One row per histogram bucket.
    fn heatmap_frame(
        &self,
        labels: &Labels,
        histograms: &[HistogramPair],
    ) -> Result<Frame, QuerierError> {
        let mut x_max = Vec::new();
        let mut y_min = Vec::new();
        let mut y_max = Vec::new();
        let mut count = Vec::new();
        let mut y_layout = Vec::new();

        for (ts, histogram) in histograms {
            let ts = parse_timestamp(*ts)?;
            for (rule, lower, upper, bucket_count) in &histogram.buckets {
                x_max.push(ts);
                y_min.push(parse_value(lower)?);
                y_max.push(parse_value(upper)?);
                count.push(parse_value(bucket_count)?);
                y_layout.push(*rule);
            }
        }

        let mut count = self.value_field(labels.clone(), FieldValues::Float(count));
        count.name = "count".to_string();

        Ok(Frame::new(
            "",
            vec![
                self.interval_field("xMax", FieldValues::Time(x_max)),
                Field::new("yMin", FieldValues::Float(y_min)),
                Field::new("yMax", FieldValues::Float(y_max)),
                count,
                Field::new("yLayout", FieldValues::Int(y_layout)),
            ],
        )
        .with_meta(self.meta(FrameKind::HeatmapCells)))
    }

    /// `Time`, `Value`, then one string field per exemplar label.
    fn exemplar_frame(&self, series: ExemplarSeries) -> Result<Frame, QuerierError> {
        let names: BTreeSet<&String> = series
            .exemplars
            .iter()
            .flat_map(|exemplar| exemplar.labels.keys())
            .collect();

        let mut times = Vec::with_capacity(series.exemplars.len());
        let mut values = Vec::with_capacity(series.exemplars.len());
        for exemplar in &series.exemplars {
            times.push(parse_timestamp(exemplar.timestamp)?);
            values.push(parse_value(&exemplar.value)?);
        }

        let mut fields = vec![
            self.time_field(times),
            Field::new(VALUE_FIELD_NAME, FieldValues::Float(values))
                .with_labels(series.series_labels.clone()),
        ];
        for name in names {
            let column = series
                .exemplars
                .iter()
                .map(|exemplar| exemplar.labels.get(name).cloned().unwrap_or_default())
                .collect();
            fields.push(Field::new(name.clone(), FieldValues::String(column)));
        }

        Ok(Frame::new(EXEMPLAR_FRAME_NAME, fields).with_meta(self.meta(FrameKind::Exemplar)))
    }

    fn time_field(&self, times: Vec<DateTime<Utc>>) -> Field {
        self.interval_field(TIME_FIELD_NAME, FieldValues::Time(times))
    }

    fn interval_field(&self, name: &str, values: FieldValues) -> Field {
        Field::new(name, values).with_config(FieldConfig {
            interval_ms: Some(self.interval_ms),
            ..Default::default()
        })
    }

    fn value_field(&self, labels: Labels, values: FieldValues) -> Field {
        let display_name = display_name(&self.query.legend_format, &labels, &self.query.expr);
        Field::new(VALUE_FIELD_NAME, values)
            .with_labels(labels)
            .with_config(FieldConfig {
                interval_ms: None,
                display_name_from_ds: display_name,
            })
    }

    fn meta(&self, kind: FrameKind) -> FrameMeta {
        FrameMeta {
            kind,
            executed_query_string: executed_query_string(self.query),
            notices: Vec::new(),
        }
    }

    fn finish(&self, mut frames: Vec<Frame>, notices: Vec<Notice>) -> Vec<Frame> {
        for frame in &mut frames {
            frame.ref_id = self.query.ref_id.clone();
            if let Some(meta) = frame.meta.as_mut() {
                meta.notices.extend(notices.iter().cloned());
            }
        }
        frames
    }

    fn log_warnings(&self, warnings: &[String]) {
        for warning in warnings {
            tracing::warn!(ref_id = %self.query.ref_id, "Prometheus API response: {warning}");
        }
    }
}

/// Parse one backend answer for `query`.
pub fn parse_response(
    query: &CompiledQuery,
    kind: CallKind,
    response: &ApiResponse,
) -> Result<Vec<Frame>, QuerierError> {
    ResponseParser::new(query).parse(kind, response)
}

pub fn executed_query_string(query: &CompiledQuery) -> String {
    format!("Expr: {}\nStep: {}", query.expr, format_duration(query.step))
}

fn parse_timestamp(ts: f64) -> Result<DateTime<Utc>, QuerierError> {
    DateTime::from_timestamp_millis((ts * 1000.0).round() as i64)
        .ok_or_else(|| QuerierError::Decode(format!("timestamp out of range: {ts}")))
}

fn parse_value(value: &str) -> Result<f64, QuerierError> {
    value
        .parse()
        .map_err(|_| QuerierError::Decode(format!("invalid sample value '{value}'")))
}
