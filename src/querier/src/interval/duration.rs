//! Duration text handling for step and interval strings.
//!
//! Two notations are in play: the compact form used for `$__interval`
//! style values (`2m`, `15s`, `1d`) and the hour-minute-second form used
//! for rate intervals (`2m0s`, `1h0m0s`, `1.5ms`).

use chrono::{Months, TimeDelta, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use super::IntervalError;

const NANOS_PER_MICRO: u64 = 1_000;
const NANOS_PER_MILLI: u64 = 1_000_000;
const NANOS_PER_SECOND: u64 = 1_000_000_000;

static DATE_UNIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)([dwMy])$").expect("date unit pattern is valid"));
static PURE_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+$").expect("number pattern is valid"));

/// Parse an interval string as entered on a query or data source.
///
/// Accepts `<...>` wrapped values, bare integers (seconds), the date units
/// `d`, `w`, `M` and `y`, and compound durations such as `1h30m` or `1.5s`.
pub fn parse_interval(interval: &str) -> Result<TimeDelta, IntervalError> {
    let formatted = interval.replacen('<', "", 1).replacen('>', "", 1);
    let formatted = if PURE_NUMBER_RE.is_match(&formatted) {
        format!("{formatted}s")
    } else {
        formatted
    };

    parse_with_date_units(&formatted)
}

fn parse_with_date_units(input: &str) -> Result<TimeDelta, IntervalError> {
    let Some(captures) = DATE_UNIT_RE.captures(input) else {
        return parse_duration(input);
    };

    let amount: i64 = captures[1]
        .parse()
        .map_err(|_| IntervalError::InvalidDuration(input.to_string()))?;
    match &captures[2] {
        "d" => TimeDelta::try_days(amount),
        "w" => TimeDelta::try_weeks(amount),
        "M" => months_from_now(amount),
        "y" => amount.checked_mul(12).and_then(months_from_now),
        _ => None,
    }
    .ok_or_else(|| IntervalError::InvalidDuration(input.to_string()))
}

fn months_from_now(months: i64) -> Option<TimeDelta> {
    let months = u32::try_from(months).ok()?;
    let now = Utc::now();
    let later = now.checked_add_months(Months::new(months))?;
    Some(later - now)
}

/// Parse an hour-minute-second duration (`300ms`, `1.5h`, `2h45m`, `-1m`).
pub fn parse_duration(input: &str) -> Result<TimeDelta, IntervalError> {
    let invalid = || IntervalError::InvalidDuration(input.to_string());

    let (negative, mut rest) = match input.as_bytes().first() {
        Some(b'-') => (true, &input[1..]),
        Some(b'+') => (false, &input[1..]),
        _ => (false, input),
    };

    if rest == "0" {
        return Ok(TimeDelta::zero());
    }
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total: u128 = 0;
    while !rest.is_empty() {
        let int_len = rest.bytes().take_while(u8::is_ascii_digit).count();
        let int_part = &rest[..int_len];
        rest = &rest[int_len..];

        let mut frac_part = "";
        if let Some(after_dot) = rest.strip_prefix('.') {
            let frac_len = after_dot.bytes().take_while(u8::is_ascii_digit).count();
            frac_part = &after_dot[..frac_len];
            rest = &after_dot[frac_len..];
        }
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }

        let unit_len = rest
            .char_indices()
            .find(|(_, c)| *c == '.' || c.is_ascii_digit())
            .map_or(rest.len(), |(idx, _)| idx);
        let unit = unit_nanos(&rest[..unit_len]).ok_or_else(invalid)?;
        rest = &rest[unit_len..];

        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| invalid())?
        };
        total = whole
            .checked_mul(u128::from(unit))
            .and_then(|nanos| total.checked_add(nanos))
            .ok_or_else(invalid)?;

        // Digits past nanosecond precision cannot contribute.
        let frac_part = &frac_part[..frac_part.len().min(18)];
        if !frac_part.is_empty() {
            let frac: u128 = frac_part.parse().map_err(|_| invalid())?;
            let scale = 10u128.pow(frac_part.len() as u32);
            total += frac * u128::from(unit) / scale;
        }

        if total > i64::MAX as u128 {
            return Err(invalid());
        }
    }

    let nanos = total as i64;
    Ok(TimeDelta::nanoseconds(if negative { -nanos } else { nanos }))
}

fn unit_nanos(unit: &str) -> Option<u64> {
    match unit {
        "ns" => Some(1),
        "us" | "µs" | "μs" => Some(NANOS_PER_MICRO),
        "ms" => Some(NANOS_PER_MILLI),
        "s" => Some(NANOS_PER_SECOND),
        "m" => Some(60 * NANOS_PER_SECOND),
        "h" => Some(3600 * NANOS_PER_SECOND),
        _ => None,
    }
}

/// Compact interval text: the largest whole unit that fits, `1ms` at minimum.
pub fn format_interval(interval: TimeDelta) -> String {
    let ms = interval.num_milliseconds();
    let year = TimeDelta::days(365).num_milliseconds();
    let day = TimeDelta::days(1).num_milliseconds();
    let hour = TimeDelta::hours(1).num_milliseconds();
    let minute = TimeDelta::minutes(1).num_milliseconds();

    if ms >= year {
        format!("{}y", ms / year)
    } else if ms >= day {
        format!("{}d", ms / day)
    } else if ms >= hour {
        format!("{}h", ms / hour)
    } else if ms >= minute {
        format!("{}m", ms / minute)
    } else if ms >= 1000 {
        format!("{}s", ms / 1000)
    } else if ms >= 1 {
        format!("{ms}ms")
    } else {
        "1ms".to_string()
    }
}

/// Hour-minute-second text, e.g. `2m0s`, `1h0m0s`, `2m15s`, `1.5ms`.
pub fn format_duration(duration: TimeDelta) -> String {
    let nanos = duration.num_nanoseconds().unwrap_or(if duration < TimeDelta::zero() {
        i64::MIN
    } else {
        i64::MAX
    });
    if nanos == 0 {
        return "0s".to_string();
    }

    let sign = if nanos < 0 { "-" } else { "" };
    let u = nanos.unsigned_abs();

    let body = if u < NANOS_PER_MICRO {
        format!("{u}ns")
    } else if u < NANOS_PER_MILLI {
        format!("{}µs", with_fraction(u, NANOS_PER_MICRO))
    } else if u < NANOS_PER_SECOND {
        format!("{}ms", with_fraction(u, NANOS_PER_MILLI))
    } else {
        let total_seconds = u / NANOS_PER_SECOND;
        let sub_second = u % NANOS_PER_SECOND;
        let mut seconds = (total_seconds % 60).to_string();
        if sub_second > 0 {
            seconds = format!(
                "{seconds}.{}",
                format!("{sub_second:09}").trim_end_matches('0')
            );
        }

        let total_minutes = total_seconds / 60;
        if total_minutes == 0 {
            format!("{seconds}s")
        } else if total_minutes < 60 {
            format!("{total_minutes}m{seconds}s")
        } else {
            format!("{}h{}m{seconds}s", total_minutes / 60, total_minutes % 60)
        }
    };

    format!("{sign}{body}")
}

fn with_fraction(value: u64, scale: u64) -> String {
    let whole = value / scale;
    let frac = value % scale;
    if frac == 0 {
        return whole.to_string();
    }
    let width = scale.ilog10() as usize;
    let digits = format!("{frac:0width$}");
    format!("{whole}.{}", digits.trim_end_matches('0'))
}
