//! Exemplar reduction.
//!
//! The backend may return thousands of exemplars per series. Every
//! exemplar-shaped frame of a response is fed through a [`Framer`], which
//! samples the rows with the configured [`Sampler`] and emits a single
//! `exemplar` frame whose label columns are the union of all series and
//! exemplar labels.

use chrono::{DateTime, Utc};
use common::config::SamplerKind;

use crate::frame::{Frame, Labels};

pub mod framer;
pub mod sampler;

pub use framer::{Framer, LabelTracker};
pub use sampler::{NoOpSampler, Sampler, StdDevSampler};

/// One exemplar row taken out of an exemplar frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Exemplar {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    /// Labels of the series the exemplar belongs to
    pub series_labels: Labels,
    /// The exemplar's own labels, such as a trace id
    pub labels: Labels,
}

impl Exemplar {
    /// Exemplar labels shadow series labels; missing names read as empty.
    pub fn label_value(&self, name: &str) -> &str {
        self.labels
            .get(name)
            .or_else(|| self.series_labels.get(name))
            .map_or("", String::as_str)
    }
}

pub fn sampler_for(kind: SamplerKind) -> Box<dyn Sampler> {
    match kind {
        SamplerKind::Stddev => Box::new(StdDevSampler::new()),
        SamplerKind::Noop => Box::new(NoOpSampler::new()),
    }
}

/// Replace the exemplar frames in `frames` with one sampled frame.
pub fn reduce(frames: Vec<Frame>, kind: SamplerKind) -> Vec<Frame> {
    let mut framer = Framer::new(sampler_for(kind));
    for frame in frames {
        framer.add_frame(frame);
    }
    framer.frames()
}
