use std::collections::BTreeSet;

use chrono::TimeDelta;

use super::{Exemplar, Sampler};
use crate::frame::{
    EXEMPLAR_FRAME_NAME, Field, FieldConfig, FieldValues, Frame, FrameMeta, Labels,
    TIME_FIELD_NAME, VALUE_FIELD_NAME,
};

/// Union of label names seen across exemplar frames.
#[derive(Debug, Default)]
pub struct LabelTracker {
    names: BTreeSet<String>,
}

impl LabelTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, labels: &Labels) {
        self.names.extend(labels.keys().cloned());
    }

    pub fn add_fields(&mut self, fields: &[Field]) {
        self.names.extend(fields.iter().map(|field| field.name.clone()));
    }

    /// Sorted label names.
    pub fn names(&self) -> Vec<String> {
        self.names.iter().cloned().collect()
    }
}

/// Collects one response's frames and replaces its exemplar frames with a
/// single sampled one.
pub struct Framer {
    frames: Vec<Frame>,
    sampler: Box<dyn Sampler>,
    labels: LabelTracker,
    ref_id: String,
    meta: Option<FrameMeta>,
    time_config: Option<FieldConfig>,
}

impl Framer {
    pub fn new(sampler: Box<dyn Sampler>) -> Self {
        Self {
            frames: Vec::new(),
            sampler,
            labels: LabelTracker::new(),
            ref_id: String::new(),
            meta: None,
            time_config: None,
        }
    }

    /// Exemplar frames are expected as `Time`, `Value` (carrying the series
    /// labels), then one string field per exemplar label.
    pub fn add_frame(&mut self, frame: Frame) {
        if !frame.is_exemplar() {
            self.frames.push(frame);
            return;
        }

        if let Some(interval_ms) = frame.interval_ms() {
            self.sampler
                .set_step(TimeDelta::milliseconds(interval_ms as i64));
        }
        if self.meta.is_none() {
            self.ref_id = frame.ref_id.clone();
            self.meta = frame.meta.clone();
            self.time_config = frame.fields.first().and_then(|field| field.config.clone());
        }

        let [time, value, aux @ ..] = frame.fields.as_slice() else {
            tracing::warn!(ref_id = %frame.ref_id, "dropping exemplar frame without time and value fields");
            return;
        };
        self.labels.add(&value.labels);
        self.labels.add_fields(aux);

        for row in 0..frame.rows() {
            let (Some(timestamp), Some(sample)) = (time.time_at(row), value.float_at(row)) else {
                continue;
            };
            let labels = aux
                .iter()
                .filter_map(|field| {
                    field
                        .string_at(row)
                        .map(|text| (field.name.clone(), text.to_string()))
                })
                .collect();

            self.sampler.add(Exemplar {
                timestamp,
                value: sample,
                series_labels: value.labels.clone(),
                labels,
            });
        }
    }

    /// Pass-through frames followed by the sampled exemplar frame, if any
    /// exemplar survived.
    pub fn frames(mut self) -> Vec<Frame> {
        let exemplars = self.sampler.sample();
        if exemplars.is_empty() {
            return self.frames;
        }

        let names = self.labels.names();
        let mut times = Vec::with_capacity(exemplars.len());
        let mut values = Vec::with_capacity(exemplars.len());
        let mut columns: Vec<Vec<String>> = vec![Vec::with_capacity(exemplars.len()); names.len()];

        for exemplar in &exemplars {
            times.push(exemplar.timestamp);
            values.push(exemplar.value);
            for (name, column) in names.iter().zip(columns.iter_mut()) {
                column.push(exemplar.label_value(name).to_string());
            }
        }

        let mut time = Field::new(TIME_FIELD_NAME, FieldValues::Time(times));
        time.config = self.time_config.take();
        let mut fields = vec![time, Field::new(VALUE_FIELD_NAME, FieldValues::Float(values))];
        fields.extend(
            names
                .into_iter()
                .zip(columns)
                .map(|(name, column)| Field::new(name, FieldValues::String(column))),
        );

        let mut frame = Frame::new(EXEMPLAR_FRAME_NAME, fields);
        frame.ref_id = self.ref_id;
        frame.meta = self.meta;
        self.frames.push(frame);
        self.frames
    }
}
