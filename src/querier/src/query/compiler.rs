use chrono::{DateTime, TimeDelta, TimeZone, Utc};

use crate::error::QuerierError;
use crate::interval::{IntervalError, StepRequest, StepResolver};
use crate::query::model::{QueryFormat, QueryRequest};
use crate::query::promql::macros::{MacroContext, interpolate};
use crate::query::promql::rewrite::apply_filters_and_group_by;

/// A request with its step resolved and expression fully expanded.
///
/// Built once per request and only read afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub ref_id: String,
    pub expr: String,
    pub step: TimeDelta,
    pub legend_format: String,
    pub format: QueryFormat,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub utc_offset_sec: i64,
    pub range_query: bool,
    pub instant_query: bool,
    pub exemplar_query: bool,
}

/// Start and end aligned to the step, as sent to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryTimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub step: TimeDelta,
}

impl CompiledQuery {
    pub fn time_range(&self) -> QueryTimeRange {
        QueryTimeRange {
            start: align_time_range(self.start, self.step, self.utc_offset_sec),
            end: align_time_range(self.end, self.step, self.utc_offset_sec),
            step: self.step,
        }
    }
}

/// Round `t` down to a multiple of `step`, measured in the time zone
/// `offset_sec` seconds away from UTC.
///
/// A zero step leaves `t` unchanged.
pub fn align_time_range(t: DateTime<Utc>, step: TimeDelta, offset_sec: i64) -> DateTime<Utc> {
    let (Some(step_ns), Some(t_ns)) = (step.num_nanoseconds(), t.timestamp_nanos_opt()) else {
        return t;
    };
    if step_ns == 0 {
        return t;
    }

    let step_ns = i128::from(step_ns);
    let offset_ns = i128::from(offset_sec) * 1_000_000_000;
    let aligned = floor_div(i128::from(t_ns) + offset_ns, step_ns) * step_ns - offset_ns;

    match i64::try_from(aligned) {
        Ok(nanos) => Utc.timestamp_nanos(nanos),
        Err(_) => t,
    }
}

fn floor_div(a: i128, b: i128) -> i128 {
    let quotient = a / b;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        quotient - 1
    } else {
        quotient
    }
}

/// Turns raw requests into [`CompiledQuery`] values.
#[derive(Debug, Clone)]
pub struct QueryCompiler {
    resolver: StepResolver,
}

impl QueryCompiler {
    pub fn new(scrape_interval: impl Into<String>) -> Self {
        Self {
            resolver: StepResolver::new(scrape_interval),
        }
    }

    pub fn compile(
        &self,
        request: &QueryRequest,
        from_alert: bool,
    ) -> Result<CompiledQuery, QuerierError> {
        let time_range = &request.time_range;
        if time_range.from > time_range.to {
            return Err(QuerierError::InvalidRequest(format!(
                "time range starts after it ends ({} > {})",
                time_range.from, time_range.to
            )));
        }

        let resolved = self.resolver.resolve(&StepRequest {
            interval: &request.interval,
            interval_ms: request.interval_ms,
            interval_factor: request.interval_factor,
            max_data_points: request.max_data_points,
            time_range,
        })?;

        let query_interval = TimeDelta::try_milliseconds(request.interval_hint_ms)
            .ok_or(IntervalError::Overflow)?;
        let expr = interpolate(
            &request.expr,
            &MacroContext {
                step: resolved.step,
                requested_step: &resolved.canonical_step,
                query_interval,
                scrape_interval: self.resolver.scrape_interval(),
                range: time_range.duration(),
            },
        )?;
        let expr = apply_filters_and_group_by(
            &expr,
            &request.scope_filters(),
            &request.adhoc_filters,
            &request.group_by_keys,
        )?;

        Ok(CompiledQuery {
            ref_id: request.ref_id.clone(),
            expr,
            step: resolved.step,
            legend_format: request.legend_format.clone(),
            format: request.format,
            start: time_range.from,
            end: time_range.to,
            utc_offset_sec: request.utc_offset_sec,
            range_query: request.range || !request.instant,
            instant_query: request.instant,
            exemplar_query: request.exemplar && !from_alert,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::TimeRange;
    use crate::query::model::Scope;
    use crate::query::promql::ScopeFilter;

    fn time_range(duration: TimeDelta) -> TimeRange {
        let from = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        TimeRange::new(from, from + duration)
    }

    fn request(expr: &str, duration: TimeDelta) -> QueryRequest {
        QueryRequest::new("A", expr, time_range(duration))
    }

    fn compile(scrape: &str, request: &QueryRequest) -> CompiledQuery {
        QueryCompiler::new(scrape).compile(request, false).unwrap()
    }

    #[test]
    fn test_interval_macro_scenario() {
        let mut req = request("rate(x[$__interval])", TimeDelta::hours(48));
        req.interval = "$__interval".to_string();
        req.interval_ms = 60000;

        let compiled = compile("15s", &req);
        assert_eq!(compiled.step, TimeDelta::seconds(120));
        assert_eq!(compiled.expr, "rate(x[2m])");
    }

    #[test]
    fn test_invalid_promql_survives_without_filters() {
        let mut req = request(r#"rate(ALERTS{job="test" [$__interval_ms]})"#, TimeDelta::hours(48));
        req.interval_ms = 60000;
        req.interval_hint_ms = 60000;

        let compiled = compile("15s", &req);
        assert_eq!(compiled.expr, r#"rate(ALERTS{job="test" [120000]})"#);
    }

    #[test]
    fn test_rate_interval_scenario() {
        let mut req = request("rate(x[$__rate_interval])", TimeDelta::hours(1));
        req.interval = "$__rate_interval".to_string();
        req.interval_ms = 30000;
        req.interval_hint_ms = 30000;
        req.max_data_points = 12384;

        let compiled = compile("30s", &req);
        assert_eq!(compiled.step, TimeDelta::minutes(2));
        assert_eq!(compiled.expr, "rate(x[2m0s])");
    }

    #[test]
    fn test_auto_step_with_rate_interval_expr() {
        let mut req = request("sum(rate(process_cpu_seconds_total[$__rate_interval]))", TimeDelta::hours(1));
        req.interval_ms = 30000;
        req.interval_hint_ms = 30000;
        req.max_data_points = 1613;

        let compiled = compile("30s", &req);
        assert_eq!(compiled.step, TimeDelta::seconds(30));
        assert_eq!(compiled.expr, "sum(rate(process_cpu_seconds_total[2m0s]))");
    }

    #[test]
    fn test_rate_interval_step_over_two_days() {
        let mut req = request("rate(x[$__rate_interval])", TimeDelta::days(2));
        req.interval = "$__rate_interval".to_string();
        req.interval_ms = 120000;
        req.interval_hint_ms = 120000;
        req.max_data_points = 12384;

        let compiled = compile("30s", &req);
        assert_eq!(compiled.step, TimeDelta::seconds(150));
        assert_eq!(compiled.expr, "rate(x[2m30s])");
    }

    #[test]
    fn test_interval_step_with_rate_interval_expr() {
        let mut req = request("rate(x[$__rate_interval])", TimeDelta::days(2));
        req.interval = "$__interval".to_string();
        req.interval_ms = 120000;
        req.interval_hint_ms = 120000;
        req.max_data_points = 12384;

        let compiled = compile("15s", &req);
        assert_eq!(compiled.step, TimeDelta::seconds(120));
        assert_eq!(compiled.expr, "rate(x[8m0s])");
    }

    #[test]
    fn test_filters_and_scopes() {
        let mut req = request(r#"x{job="p"}"#, TimeDelta::hours(12));
        req.scopes = vec![Scope {
            name: "errors".to_string(),
            title: "Errors".to_string(),
            filters: vec![ScopeFilter::new("status", "equals", "404")],
        }];
        req.adhoc_filters = vec![ScopeFilter::new("status", "equals", "200")];

        let compiled = compile("15s", &req);
        assert_eq!(compiled.expr, r#"x{job="p",status="200"}"#);
    }

    #[test]
    fn test_filters_after_macro_expansion() {
        let mut req = request("rate(http_requests_total[$__interval])", TimeDelta::hours(48));
        req.interval_ms = 60000;
        req.adhoc_filters = vec![ScopeFilter::new("job", "regex-match", "prometheus.*")];

        let compiled = compile("15s", &req);
        assert_eq!(compiled.expr, r#"rate(http_requests_total{job=~"prometheus.*"}[2m])"#);
    }

    #[test]
    fn test_query_type_flags() {
        let req = request("up", TimeDelta::hours(1));
        let compiled = compile("15s", &req);
        assert!(compiled.range_query);
        assert!(!compiled.instant_query);

        let mut req = request("up", TimeDelta::hours(1));
        req.instant = true;
        let compiled = compile("15s", &req);
        assert!(!compiled.range_query);
        assert!(compiled.instant_query);

        let mut req = request("up", TimeDelta::hours(1));
        req.instant = true;
        req.range = true;
        let compiled = compile("15s", &req);
        assert!(compiled.range_query && compiled.instant_query);
    }

    #[test]
    fn test_alerting_disables_exemplars() {
        let mut req = request("up", TimeDelta::hours(12));
        req.exemplar = true;

        let compiler = QueryCompiler::new("15s");
        assert!(compiler.compile(&req, false).unwrap().exemplar_query);
        assert!(!compiler.compile(&req, true).unwrap().exemplar_query);
    }

    #[test]
    fn test_compile_errors() {
        let compiler = QueryCompiler::new("15s");

        let mut req = request("up", TimeDelta::hours(1));
        req.interval = "soon".to_string();
        assert!(matches!(compiler.compile(&req, false), Err(QuerierError::Interval(_))));

        let mut req = request("sum(", TimeDelta::hours(1));
        req.group_by_keys = vec!["job".to_string()];
        assert!(matches!(compiler.compile(&req, false), Err(QuerierError::InvalidQuery(_))));

        let mut req = request("up", TimeDelta::hours(1));
        req.time_range = TimeRange::new(req.time_range.to, req.time_range.from);
        assert!(matches!(compiler.compile(&req, false), Err(QuerierError::InvalidRequest(_))));
    }

    #[test]
    fn test_out_of_range_millisecond_fields_fail_the_query() {
        let compiler = QueryCompiler::new("15s");
        let overflow = |result: Result<CompiledQuery, QuerierError>| {
            matches!(result, Err(QuerierError::Interval(IntervalError::Overflow)))
        };

        let mut req = request("rate(x[$__rate_interval])", TimeDelta::hours(1));
        req.interval = "$__rate_interval".to_string();
        req.interval_ms = i64::MAX;
        assert!(overflow(compiler.compile(&req, false)));

        let mut req = request("up", TimeDelta::hours(1));
        req.interval_ms = i64::MIN;
        assert!(overflow(compiler.compile(&req, false)));

        let mut req = request("up", TimeDelta::hours(1));
        req.interval_hint_ms = i64::MIN;
        assert!(overflow(compiler.compile(&req, false)));
    }

    #[test]
    fn test_align_time_range() {
        let t = Utc.timestamp_opt(1664816826, 0).unwrap();
        assert_eq!(
            align_time_range(t, TimeDelta::seconds(10), 0),
            Utc.timestamp_opt(1664816820, 0).unwrap()
        );

        let t = Utc.timestamp_opt(1664816825, 5_000_000).unwrap();
        assert_eq!(
            align_time_range(t, TimeDelta::milliseconds(10), 0),
            Utc.timestamp_opt(1664816825, 0).unwrap()
        );
        assert_eq!(
            align_time_range(t, TimeDelta::seconds(2), -3),
            Utc.timestamp_opt(1664816825, 0).unwrap()
        );
    }

    #[test]
    fn test_align_week_step_lands_on_thursday() {
        let monday = Utc.timestamp_opt(1704672000, 0).unwrap();
        let thursday = Utc.timestamp_opt(1704326400, 0).unwrap();
        assert_eq!(align_time_range(monday, TimeDelta::weeks(1), 0), thursday);
    }

    #[test]
    fn test_align_zero_step_is_identity() {
        let t = Utc.timestamp_opt(1664816826, 123).unwrap();
        assert_eq!(align_time_range(t, TimeDelta::zero(), 3600), t);
    }
}
