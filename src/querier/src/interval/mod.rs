//! Step and interval computation.
//!
//! [`calculator`] turns a time range and resolution into a rounded interval,
//! [`step`] layers the query, data source and macro precedence rules on top
//! of it, and [`vendor`] holds the range-keyed tables used by the
//! `$__dd_interval` and `$__large_interval` macros.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

pub mod calculator;
pub mod duration;
pub mod step;
pub mod vendor;

pub use calculator::{Interval, IntervalCalculator};
pub use step::{ResolvedStep, StepMacro, StepRequest, StepResolver, calculate_rate_interval};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntervalError {
    #[error("invalid duration '{0}'")]
    InvalidDuration(String),
    #[error("step duration overflow")]
    Overflow,
}

/// Absolute time range of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    pub fn duration(&self) -> TimeDelta {
        self.to - self.from
    }
}
