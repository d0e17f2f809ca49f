use chrono::TimeDelta;

use super::TimeRange;
use super::duration::format_interval;

/// Resolution used when the caller does not ask for a number of data points.
pub const DEFAULT_RESOLUTION: i64 = 1500;
/// Point-count ceiling applied regardless of the requested resolution.
pub const SAFE_RESOLUTION: i64 = 11000;

/// A step value together with its compact text form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    pub text: String,
    pub value: TimeDelta,
}

impl Interval {
    pub fn new(value: TimeDelta) -> Self {
        Self {
            text: format_interval(value),
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IntervalCalculator;

impl IntervalCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Interval for the requested number of data points, never below `min_interval`.
    pub fn calculate(
        &self,
        time_range: &TimeRange,
        min_interval: TimeDelta,
        max_data_points: i64,
    ) -> Interval {
        let resolution = if max_data_points <= 0 {
            DEFAULT_RESOLUTION
        } else {
            max_data_points
        };

        let raw = divide(time_range.duration(), resolution);
        if raw < min_interval {
            return Interval::new(min_interval);
        }

        Interval::new(round_interval(raw).max(min_interval))
    }

    /// Interval that keeps the point count under `safe_resolution`.
    pub fn calculate_safe_interval(&self, time_range: &TimeRange, safe_resolution: i64) -> Interval {
        let raw = divide(time_range.duration(), safe_resolution.max(1));
        Interval::new(round_interval(raw))
    }
}

fn divide(duration: TimeDelta, parts: i64) -> TimeDelta {
    match duration.num_nanoseconds() {
        Some(nanos) => TimeDelta::nanoseconds(nanos / parts),
        None => TimeDelta::milliseconds(duration.num_milliseconds() / parts),
    }
}

const SECOND: i64 = 1000;
const MINUTE: i64 = 60 * SECOND;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;

/// `(upper bound, rounded value)` pairs in milliseconds.
const ROUNDING_BUCKETS: [(i64, i64); 29] = [
    (10, 1),
    (15, 10),
    (35, 20),
    (75, 50),
    (150, 100),
    (350, 200),
    (750, 500),
    (1500, SECOND),
    (3500, 2 * SECOND),
    (7500, 5 * SECOND),
    (12500, 10 * SECOND),
    (17500, 15 * SECOND),
    (25000, 20 * SECOND),
    (45000, 30 * SECOND),
    (90000, MINUTE),
    (210000, 2 * MINUTE),
    (450000, 5 * MINUTE),
    (750000, 10 * MINUTE),
    (1050000, 15 * MINUTE),
    (1500000, 20 * MINUTE),
    (2700000, 30 * MINUTE),
    (5400000, HOUR),
    (9000000, 2 * HOUR),
    (16200000, 3 * HOUR),
    (32400000, 6 * HOUR),
    (DAY, 12 * HOUR),
    (2 * DAY, DAY),
    (7 * DAY, DAY),
    (21 * DAY, 7 * DAY),
];

/// Round a raw interval to the nearest human-friendly bucket.
///
/// Each bucket boundary belongs to the lower bucket.
pub fn round_interval(interval: TimeDelta) -> TimeDelta {
    for (bound, value) in ROUNDING_BUCKETS {
        if interval <= TimeDelta::milliseconds(bound) {
            return TimeDelta::milliseconds(value);
        }
    }

    if interval < TimeDelta::milliseconds(42 * DAY) {
        TimeDelta::milliseconds(30 * DAY)
    } else {
        TimeDelta::milliseconds(365 * DAY)
    }
}
