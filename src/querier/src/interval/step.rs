use chrono::TimeDelta;

use super::calculator::{IntervalCalculator, SAFE_RESOLUTION};
use super::duration::{format_interval, parse_interval};
use super::{IntervalError, TimeRange, vendor};

/// Floor in seconds used when neither the query nor the data source names an interval.
pub const DEFAULT_MIN_INTERVAL_SECS: i64 = 15;
/// Scrape interval assumed by the rate-interval formula when none is known.
pub const DEFAULT_SCRAPE_INTERVAL: &str = "15s";

/// Macro tokens accepted in place of a literal step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMacro {
    Interval,
    IntervalMs,
    RateInterval,
    RateIntervalMs,
    DdInterval,
    LargeInterval,
}

impl StepMacro {
    /// Recognizes both the `$__name` and `${__name}` spellings.
    pub fn parse(step: &str) -> Option<Self> {
        let name = step
            .strip_prefix("${")
            .and_then(|rest| rest.strip_suffix('}'))
            .or_else(|| step.strip_prefix('$'))?;

        match name {
            "__interval" => Some(Self::Interval),
            "__interval_ms" => Some(Self::IntervalMs),
            "__rate_interval" => Some(Self::RateInterval),
            "__rate_interval_ms" => Some(Self::RateIntervalMs),
            "__dd_interval" => Some(Self::DdInterval),
            "__large_interval" => Some(Self::LargeInterval),
            _ => None,
        }
    }
}

/// Inputs for one step resolution.
#[derive(Debug, Clone)]
pub struct StepRequest<'a> {
    /// Step as written on the query: empty, a duration, or a macro token
    pub interval: &'a str,
    /// Millisecond override supplied by the caller, 0 when absent
    pub interval_ms: i64,
    /// Step multiplier, 0 means 1
    pub interval_factor: i64,
    pub max_data_points: i64,
    pub time_range: &'a TimeRange,
}

/// The final step and the step text later macro expansion should see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStep {
    pub step: TimeDelta,
    pub canonical_step: String,
}

#[derive(Debug, Clone)]
pub struct StepResolver {
    calculator: IntervalCalculator,
    scrape_interval: String,
}

impl StepResolver {
    pub fn new(scrape_interval: impl Into<String>) -> Self {
        Self {
            calculator: IntervalCalculator::new(),
            scrape_interval: scrape_interval.into(),
        }
    }

    pub fn scrape_interval(&self) -> &str {
        &self.scrape_interval
    }

    pub fn resolve(&self, request: &StepRequest<'_>) -> Result<ResolvedStep, IntervalError> {
        let token = StepMacro::parse(request.interval);
        let requested = if token.is_some() { "" } else { request.interval };

        let min = min_interval(
            &self.scrape_interval,
            requested,
            request.interval_ms,
            TimeDelta::seconds(DEFAULT_MIN_INTERVAL_SECS),
        )?;
        let calculated = self
            .calculator
            .calculate(request.time_range, min, request.max_data_points);
        let safe = self
            .calculator
            .calculate_safe_interval(request.time_range, SAFE_RESOLUTION);
        let adjusted = calculated.value.max(safe.value);

        let resolved = match token {
            Some(StepMacro::RateInterval) => ResolvedStep {
                step: calculate_rate_interval(adjusted, &self.scrape_interval)?,
                canonical_step: request.interval.to_string(),
            },
            Some(StepMacro::DdInterval) => {
                let step = vendor::default_step(request.time_range.duration());
                ResolvedStep {
                    step,
                    canonical_step: format_interval(step),
                }
            }
            Some(StepMacro::LargeInterval) => ResolvedStep {
                step: vendor::bar_chart_step(request.time_range.duration()),
                canonical_step: request.interval.to_string(),
            },
            _ => ResolvedStep {
                step: scale(adjusted, request.interval_factor)?,
                canonical_step: request.interval.to_string(),
            },
        };

        Ok(resolved)
    }
}

/// Negative factors are kept and produce a negative step.
fn scale(interval: TimeDelta, factor: i64) -> Result<TimeDelta, IntervalError> {
    let factor = if factor == 0 { 1 } else { factor };
    interval
        .num_nanoseconds()
        .and_then(|nanos| nanos.checked_mul(factor))
        .map(TimeDelta::nanoseconds)
        .ok_or(IntervalError::Overflow)
}

/// Lower bound for the step.
///
/// The requested step wins, then the millisecond override, then the data
/// source scrape interval, then `default`.
pub fn min_interval(
    scrape_interval: &str,
    requested: &str,
    interval_ms: i64,
    default: TimeDelta,
) -> Result<TimeDelta, IntervalError> {
    let requested = if requested == "0s" { "" } else { requested };

    if requested.is_empty() && interval_ms != 0 {
        return TimeDelta::try_milliseconds(interval_ms).ok_or(IntervalError::Overflow);
    }

    let interval = if requested.is_empty() {
        scrape_interval
    } else {
        requested
    };
    if interval.is_empty() {
        return Ok(default);
    }

    parse_interval(interval)
}

/// `max(query_interval + scrape, 4 * scrape)`; zero when `scrape_interval`
/// does not parse.
pub fn calculate_rate_interval(
    query_interval: TimeDelta,
    scrape_interval: &str,
) -> Result<TimeDelta, IntervalError> {
    let scrape_interval = if scrape_interval.is_empty() {
        DEFAULT_SCRAPE_INTERVAL
    } else {
        scrape_interval
    };

    let Ok(scrape) = parse_interval(scrape_interval) else {
        return Ok(TimeDelta::zero());
    };
    let with_query = query_interval
        .checked_add(&scrape)
        .ok_or(IntervalError::Overflow)?;
    let four_scrapes = scrape
        .checked_add(&scrape)
        .and_then(|twice| twice.checked_add(&twice))
        .ok_or(IntervalError::Overflow)?;
    Ok(with_query.max(four_scrapes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn range_of(duration: TimeDelta) -> TimeRange {
        let from = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        TimeRange::new(from, from + duration)
    }

    fn resolve(
        scrape: &str,
        interval: &str,
        interval_ms: i64,
        factor: i64,
        range: TimeDelta,
    ) -> ResolvedStep {
        let time_range = range_of(range);
        StepResolver::new(scrape)
            .resolve(&StepRequest {
                interval,
                interval_ms,
                interval_factor: factor,
                max_data_points: 0,
                time_range: &time_range,
            })
            .unwrap()
    }

    #[test]
    fn test_step_macro_spellings() {
        assert_eq!(StepMacro::parse("$__interval"), Some(StepMacro::Interval));
        assert_eq!(StepMacro::parse("${__interval}"), Some(StepMacro::Interval));
        assert_eq!(StepMacro::parse("${__rate_interval_ms}"), Some(StepMacro::RateIntervalMs));
        assert_eq!(StepMacro::parse("$__large_interval"), Some(StepMacro::LargeInterval));
        assert_eq!(StepMacro::parse("$__range"), None);
        assert_eq!(StepMacro::parse("5m"), None);
        assert_eq!(StepMacro::parse(""), None);
    }

    #[test]
    fn test_step_from_scrape_interval() {
        assert_eq!(resolve("15s", "", 0, 1, TimeDelta::hours(12)).step, TimeDelta::seconds(30));
        assert_eq!(resolve("15s", "", 0, 1, TimeDelta::hours(1)).step, TimeDelta::seconds(15));
        assert_eq!(resolve("15s", "", 0, 1, TimeDelta::hours(48)).step, TimeDelta::minutes(2));
        assert_eq!(resolve("240s", "", 0, 1, TimeDelta::hours(48)).step, TimeDelta::minutes(4));
    }

    #[test]
    fn test_step_factor() {
        assert_eq!(resolve("15s", "", 0, 10, TimeDelta::hours(48)).step, TimeDelta::minutes(20));
        assert_eq!(resolve("15s", "", 0, 0, TimeDelta::hours(48)).step, TimeDelta::minutes(2));
    }

    #[test]
    fn test_negative_factor_scales_negative() {
        assert_eq!(resolve("15s", "", 0, -2, TimeDelta::hours(48)).step, TimeDelta::minutes(-4));
    }

    #[test]
    fn test_interval_macro_uses_interval_ms_floor() {
        let resolved = resolve("15s", "$__interval", 60000, 1, TimeDelta::hours(48));
        assert_eq!(resolved.step, TimeDelta::seconds(120));
        assert_eq!(resolved.canonical_step, "$__interval");
    }

    #[test]
    fn test_requested_interval_wins_over_interval_ms() {
        let resolved = resolve("30s", "150s", 100000, 1, TimeDelta::hours(1));
        assert_eq!(resolved.step, TimeDelta::seconds(150));
    }

    #[test]
    fn test_rate_interval_step() {
        let resolved = resolve("30s", "$__rate_interval", 0, 1, TimeDelta::hours(1));
        assert_eq!(resolved.step, TimeDelta::minutes(2));

        let resolved = resolve("30s", "$__rate_interval", 120000, 1, TimeDelta::hours(48));
        assert_eq!(resolved.step, TimeDelta::seconds(150));

        let resolved = resolve("15s", "${__rate_interval}", 0, 1, TimeDelta::minutes(5));
        assert_eq!(resolved.step, TimeDelta::minutes(1));
    }

    #[test]
    fn test_rate_interval_ignores_factor() {
        let resolved = resolve("30s", "$__rate_interval", 0, 10, TimeDelta::hours(1));
        assert_eq!(resolved.step, TimeDelta::minutes(2));
    }

    #[test]
    fn test_dd_interval_returns_canonical_text() {
        let resolved = resolve("15s", "$__dd_interval", 0, 1, TimeDelta::hours(3));
        assert_eq!(resolved.step, TimeDelta::minutes(1));
        assert_eq!(resolved.canonical_step, "1m");
    }

    #[test]
    fn test_large_interval_keeps_token() {
        let resolved = resolve("15s", "$__large_interval", 0, 1, TimeDelta::hours(3));
        assert_eq!(resolved.step, TimeDelta::minutes(5));
        assert_eq!(resolved.canonical_step, "$__large_interval");
    }

    #[test]
    fn test_bad_scrape_interval_is_an_error() {
        let time_range = range_of(TimeDelta::hours(1));
        let result = StepResolver::new("often").resolve(&StepRequest {
            interval: "",
            interval_ms: 0,
            interval_factor: 1,
            max_data_points: 0,
            time_range: &time_range,
        });
        assert!(matches!(result, Err(IntervalError::InvalidDuration(_))));
    }

    #[test]
    fn test_min_interval_precedence() {
        let default = TimeDelta::seconds(DEFAULT_MIN_INTERVAL_SECS);
        assert_eq!(min_interval("30s", "1m", 5000, default).unwrap(), TimeDelta::minutes(1));
        assert_eq!(min_interval("30s", "", 5000, default).unwrap(), TimeDelta::seconds(5));
        assert_eq!(min_interval("30s", "0s", 0, default).unwrap(), TimeDelta::seconds(30));
        assert_eq!(min_interval("", "", 0, default).unwrap(), default);
    }

    #[test]
    fn test_calculate_rate_interval() {
        for (query, scrape) in [(0, 15), (30, 30), (60, 15), (600, 30), (5, 60)] {
            let expected = TimeDelta::seconds((query + scrape).max(4 * scrape));
            assert_eq!(
                calculate_rate_interval(TimeDelta::seconds(query), &format!("{scrape}s")).unwrap(),
                expected
            );
        }
        assert_eq!(calculate_rate_interval(TimeDelta::seconds(60), "").unwrap(), TimeDelta::seconds(75));
        assert_eq!(calculate_rate_interval(TimeDelta::seconds(60), "often").unwrap(), TimeDelta::zero());
    }

    #[test]
    fn test_calculate_rate_interval_overflow() {
        assert_eq!(
            calculate_rate_interval(TimeDelta::MAX, "15s"),
            Err(IntervalError::Overflow)
        );
        assert_eq!(
            calculate_rate_interval(TimeDelta::MAX - TimeDelta::seconds(10), "15s"),
            Err(IntervalError::Overflow)
        );
        assert_eq!(
            calculate_rate_interval(TimeDelta::MAX - TimeDelta::seconds(20), "15s"),
            Ok(TimeDelta::MAX - TimeDelta::seconds(5))
        );
    }

    #[test]
    fn test_out_of_range_interval_ms_is_an_error() {
        let time_range = range_of(TimeDelta::hours(1));
        let resolver = StepResolver::new("15s");

        let rate = resolver.resolve(&StepRequest {
            interval: "$__rate_interval",
            interval_ms: i64::MAX,
            interval_factor: 1,
            max_data_points: 0,
            time_range: &time_range,
        });
        assert_eq!(rate, Err(IntervalError::Overflow));

        let negative = resolver.resolve(&StepRequest {
            interval: "",
            interval_ms: i64::MIN,
            interval_factor: 1,
            max_data_points: 0,
            time_range: &time_range,
        });
        assert_eq!(negative, Err(IntervalError::Overflow));
    }
}
