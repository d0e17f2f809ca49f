//! Textual expansion of `$__interval`-style macros.

use chrono::TimeDelta;

use crate::interval::duration::{format_duration, format_interval};
use crate::interval::{IntervalError, StepMacro, calculate_rate_interval, vendor};

/// Values the macros expand to for one query.
#[derive(Debug, Clone)]
pub struct MacroContext<'a> {
    /// Resolved step of the query
    pub step: TimeDelta,
    /// Step text as requested, after canonicalization by the step resolver
    pub requested_step: &'a str,
    /// Interval hint sent by the caller alongside the query
    pub query_interval: TimeDelta,
    pub scrape_interval: &'a str,
    /// Total length of the query time range
    pub range: TimeDelta,
}

impl MacroContext<'_> {
    /// Rate interval for `$__rate_interval`.
    ///
    /// A query that asked for the rate interval as its step already has it.
    pub fn rate_interval(&self) -> Result<TimeDelta, IntervalError> {
        match StepMacro::parse(self.requested_step) {
            Some(StepMacro::RateInterval) => Ok(self.step),
            Some(StepMacro::Interval) => {
                calculate_rate_interval(self.query_interval, &format_duration(self.step))
            }
            _ if self.requested_step.is_empty() => {
                calculate_rate_interval(self.query_interval, self.scrape_interval)
            }
            _ => calculate_rate_interval(self.query_interval, self.requested_step),
        }
    }
}

/// Replace every known macro in `expr`.
///
/// Longer names that share a prefix with a shorter one (`$__interval_ms`,
/// `$__range_s`) are replaced first.
pub fn interpolate(expr: &str, ctx: &MacroContext<'_>) -> Result<String, IntervalError> {
    let range_ms = ctx.range.num_milliseconds();
    let range_s = (range_ms as f64 / 1000.0).round() as i64;
    let rate_interval = ctx.rate_interval()?;

    let replacements = [
        ("interval_ms", ctx.step.num_milliseconds().to_string()),
        ("interval", format_interval(ctx.step)),
        ("range_ms", range_ms.to_string()),
        ("range_s", range_s.to_string()),
        ("range", format!("{range_s}s")),
        ("rate_interval_ms", rate_interval.num_milliseconds().to_string()),
        ("rate_interval", format_duration(rate_interval)),
        ("dd_interval", format_interval(vendor::default_step(ctx.range))),
        ("large_interval", format_interval(vendor::bar_chart_step(ctx.range))),
    ];

    let mut expanded = expr.to_string();
    for (name, value) in &replacements {
        expanded = expanded.replace(&format!("$__{name}"), value);
    }
    for (name, value) in &replacements {
        expanded = expanded.replace(&format!("${{__{name}}}"), value);
    }
    Ok(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(step: TimeDelta, requested_step: &'a str, query_interval: TimeDelta, range: TimeDelta) -> MacroContext<'a> {
        MacroContext {
            step,
            requested_step,
            query_interval,
            scrape_interval: "15s",
            range,
        }
    }

    #[test]
    fn test_interval_macros() {
        let ctx = ctx(TimeDelta::minutes(2), "", TimeDelta::minutes(1), TimeDelta::hours(48));
        assert_eq!(interpolate("rate(x[$__interval])", &ctx).unwrap(), "rate(x[2m])");
        assert_eq!(interpolate("rate(x[${__interval}])", &ctx).unwrap(), "rate(x[2m])");
        assert_eq!(
            interpolate("rate(x[$__interval_ms]) + rate(x[${__interval}])", &ctx).unwrap(),
            "rate(x[120000]) + rate(x[2m])"
        );
    }

    #[test]
    fn test_range_macros() {
        let ctx = ctx(TimeDelta::minutes(2), "", TimeDelta::minutes(1), TimeDelta::hours(48));
        assert_eq!(interpolate("x[$__range]", &ctx).unwrap(), "x[172800s]");
        assert_eq!(interpolate("x[$__range_s]", &ctx).unwrap(), "x[172800]");
        assert_eq!(interpolate("x[${__range_s}s]", &ctx).unwrap(), "x[172800s]");
        assert_eq!(interpolate("x[$__range_ms]", &ctx).unwrap(), "x[172800000]");
    }

    #[test]
    fn test_range_seconds_round_to_nearest() {
        let below_half = ctx(TimeDelta::seconds(15), "", TimeDelta::minutes(1), TimeDelta::milliseconds(40));
        assert_eq!(interpolate("$__range_s", &below_half).unwrap(), "0");

        let above_half = ctx(TimeDelta::seconds(15), "", TimeDelta::minutes(1), TimeDelta::milliseconds(800));
        assert_eq!(interpolate("$__range_s", &above_half).unwrap(), "1");

        let short = ctx(TimeDelta::seconds(15), "", TimeDelta::minutes(1), TimeDelta::milliseconds(20));
        assert_eq!(interpolate("$__range_ms", &short).unwrap(), "20");
    }

    #[test]
    fn test_rate_interval_from_requested_step() {
        let ctx = ctx(TimeDelta::minutes(5), "5m", TimeDelta::minutes(1), TimeDelta::minutes(5));
        assert_eq!(interpolate("rate(x[$__rate_interval])", &ctx).unwrap(), "rate(x[20m0s])");
    }

    #[test]
    fn test_rate_interval_when_step_is_rate_interval() {
        let ctx = ctx(TimeDelta::minutes(1), "$__rate_interval", TimeDelta::minutes(1), TimeDelta::minutes(5));
        assert_eq!(interpolate("rate(x[$__rate_interval])", &ctx).unwrap(), "rate(x[1m0s])");
    }

    #[test]
    fn test_rate_interval_from_scrape_interval() {
        let ctx = ctx(TimeDelta::minutes(2), "", TimeDelta::minutes(2), TimeDelta::hours(48));
        assert_eq!(
            interpolate("rate(x[$__rate_interval_ms]) + rate(x[${__rate_interval}])", &ctx).unwrap(),
            "rate(x[135000]) + rate(x[2m15s])"
        );
    }

    #[test]
    fn test_rate_interval_from_interval_macro() {
        let ctx = ctx(TimeDelta::minutes(2), "$__interval", TimeDelta::minutes(2), TimeDelta::hours(48));
        assert_eq!(interpolate("rate(x[$__rate_interval])", &ctx).unwrap(), "rate(x[8m0s])");
    }

    #[test]
    fn test_vendor_interval_macros() {
        let ctx = ctx(TimeDelta::minutes(1), "", TimeDelta::minutes(1), TimeDelta::hours(3));
        assert_eq!(interpolate("x[$__dd_interval]", &ctx).unwrap(), "x[1m]");
        assert_eq!(interpolate("x[${__large_interval}]", &ctx).unwrap(), "x[5m]");
    }

    #[test]
    fn test_rate_interval_overflow_is_an_error() {
        let ctx = ctx(TimeDelta::minutes(1), "5m", TimeDelta::MAX, TimeDelta::hours(1));
        assert_eq!(
            interpolate("rate(x[$__rate_interval])", &ctx),
            Err(IntervalError::Overflow)
        );
    }

    #[test]
    fn test_unknown_macros_are_kept() {
        let ctx = ctx(TimeDelta::minutes(1), "", TimeDelta::minutes(1), TimeDelta::hours(1));
        assert_eq!(interpolate("x{job=\"$job\"}", &ctx).unwrap(), "x{job=\"$job\"}");
    }
}
