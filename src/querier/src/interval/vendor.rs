//! Range-keyed step tables behind `$__dd_interval` and `$__large_interval`.

use chrono::TimeDelta;
use once_cell::sync::Lazy;

/// `(range upper bound, step)` entries, ascending by bound.
type StepTable = Vec<(TimeDelta, TimeDelta)>;

static DEFAULT_TABLE: Lazy<StepTable> = Lazy::new(|| {
    sorted(vec![
        (TimeDelta::days(30), TimeDelta::hours(4)),
        (TimeDelta::hours(1), TimeDelta::seconds(20)),
        (TimeDelta::hours(4), TimeDelta::minutes(1)),
        (TimeDelta::days(1), TimeDelta::minutes(5)),
        (TimeDelta::days(2), TimeDelta::minutes(10)),
        (TimeDelta::weeks(1), TimeDelta::hours(1)),
    ])
});

static BAR_CHART_TABLE: Lazy<StepTable> = Lazy::new(|| {
    sorted(vec![
        (TimeDelta::hours(1), TimeDelta::minutes(1)),
        (TimeDelta::hours(4), TimeDelta::minutes(5)),
        (TimeDelta::days(1), TimeDelta::minutes(30)),
        (TimeDelta::days(2), TimeDelta::hours(1)),
        (TimeDelta::weeks(1), TimeDelta::hours(4)),
        (TimeDelta::days(30), TimeDelta::days(1)),
    ])
});

fn sorted(mut table: StepTable) -> StepTable {
    table.sort_by_key(|(bound, _)| *bound);
    table
}

fn lookup(table: &[(TimeDelta, TimeDelta)], range: TimeDelta, max_step: TimeDelta) -> TimeDelta {
    table
        .iter()
        .find(|(bound, _)| range <= *bound)
        .map_or(max_step, |(_, step)| *step)
}

/// Step for `$__dd_interval`.
pub fn default_step(range: TimeDelta) -> TimeDelta {
    lookup(&DEFAULT_TABLE, range, TimeDelta::days(1))
}

/// Step for `$__large_interval`, sized for bar charts.
pub fn bar_chart_step(range: TimeDelta) -> TimeDelta {
    lookup(&BAR_CHART_TABLE, range, TimeDelta::weeks(1))
}
