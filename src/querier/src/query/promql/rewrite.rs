//! Label filter and group-by injection.
//!
//! Scope filters sharing a key are OR-ed together into one regex matcher,
//! ad-hoc filters then replace whatever the scopes produced for their key.
//! The resulting matcher set is written into every vector selector of the
//! expression, and group-by keys are merged into every aggregation.

use std::collections::BTreeMap;

use promql_parser::label::{Labels, Matcher};
use promql_parser::parser::{AggregateExpr, Expr, LabelModifier, VectorSelector};

use super::error::PromQLError;
use super::parser::{parse, to_parser_matcher, walk_mut};
use super::types::{FilterOperator, LabelMatcher, MatcherOp, ScopeFilter};

const METRIC_NAME_LABEL: &str = "__name__";

/// Rewrite `expr` so that every selector carries the effective filter
/// matchers and every aggregation groups by `group_by_keys`.
///
/// Without filters or group-by keys the expression is returned as is,
/// without being parsed.
pub fn apply_filters_and_group_by(
    expr: &str,
    scope_filters: &[ScopeFilter],
    adhoc_filters: &[ScopeFilter],
    group_by_keys: &[String],
) -> Result<String, PromQLError> {
    if scope_filters.is_empty() && adhoc_filters.is_empty() && group_by_keys.is_empty() {
        return Ok(expr.to_string());
    }

    let matchers = build_matcher_set(scope_filters, adhoc_filters)?
        .values()
        .map(to_parser_matcher)
        .collect::<Result<Vec<_>, _>>()?;

    let mut ast = parse(expr)?;
    walk_mut(&mut ast, &mut |node| match node {
        Expr::VectorSelector(vs) => inject_matchers(vs, &matchers),
        Expr::MatrixSelector(ms) => inject_matchers(&mut ms.vs, &matchers),
        Expr::Aggregate(agg) => merge_group_by(agg, group_by_keys),
        _ => {}
    });

    Ok(ast.to_string())
}

/// Fold scope filters, then ad-hoc filters, into one matcher per label.
pub fn build_matcher_set(
    scope_filters: &[ScopeFilter],
    adhoc_filters: &[ScopeFilter],
) -> Result<BTreeMap<String, LabelMatcher>, PromQLError> {
    let mut set: BTreeMap<String, LabelMatcher> = BTreeMap::new();

    for filter in scope_filters {
        if filter.key == METRIC_NAME_LABEL {
            tracing::debug!("Ignoring scope filter on {METRIC_NAME_LABEL}");
            continue;
        }
        let matcher = filter_to_matcher(filter)?;
        let merged = match set.remove(&filter.key) {
            Some(existing) => merge_matchers(existing, matcher),
            None => matcher,
        };
        set.insert(filter.key.clone(), merged);
    }

    for filter in adhoc_filters {
        if filter.key == METRIC_NAME_LABEL {
            tracing::debug!("Ignoring ad-hoc filter on {METRIC_NAME_LABEL}");
            continue;
        }
        set.insert(filter.key.clone(), filter_to_matcher(filter)?);
    }

    Ok(set)
}

fn filter_to_matcher(filter: &ScopeFilter) -> Result<LabelMatcher, PromQLError> {
    let (op, value) = match filter.operator()? {
        FilterOperator::Equals => (MatcherOp::Equal, filter.value.clone()),
        FilterOperator::NotEquals => (MatcherOp::NotEqual, filter.value.clone()),
        FilterOperator::RegexMatch => (MatcherOp::RegexMatch, filter.value.clone()),
        FilterOperator::RegexNotMatch => (MatcherOp::RegexNotMatch, filter.value.clone()),
        FilterOperator::OneOf => (MatcherOp::RegexMatch, alternation(&filter.values)),
        FilterOperator::NotOneOf => (MatcherOp::RegexNotMatch, alternation(&filter.values)),
    };

    Ok(LabelMatcher::new(&filter.key, op, &value))
}

fn alternation(values: &[String]) -> String {
    values
        .iter()
        .map(|value| quote_meta(value))
        .collect::<Vec<_>>()
        .join("|")
}

/// Same-polarity matchers merge into one alternation; otherwise the later
/// matcher replaces the earlier one.
fn merge_matchers(existing: LabelMatcher, next: LabelMatcher) -> LabelMatcher {
    let polarity = (existing.op.is_positive(), next.op.is_positive());
    let op = match polarity {
        (true, true) => MatcherOp::RegexMatch,
        (false, false) => MatcherOp::RegexNotMatch,
        _ => {
            tracing::debug!(
                label = %next.name,
                "Scope filters disagree on polarity, keeping {}{}",
                next.op,
                next.value
            );
            return next;
        }
    };

    let value = format!("{}|{}", as_pattern(&existing), as_pattern(&next));
    LabelMatcher::new(&existing.name, op, &value)
}

fn as_pattern(matcher: &LabelMatcher) -> String {
    match matcher.op {
        MatcherOp::Equal | MatcherOp::NotEqual => quote_meta(&matcher.value),
        MatcherOp::RegexMatch | MatcherOp::RegexNotMatch => matcher.value.clone(),
    }
}

/// Escape regex metacharacters so `value` matches literally.
pub fn quote_meta(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len());
    for c in value.chars() {
        if r"\.+*?()|[]{}^$".contains(c) {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted
}

fn inject_matchers(vs: &mut VectorSelector, matchers: &[Matcher]) {
    if matchers.is_empty() {
        return;
    }

    for matcher in matchers {
        let mut replaced = false;
        for existing in vs
            .matchers
            .matchers
            .iter_mut()
            .filter(|m| m.name == matcher.name)
        {
            *existing = matcher.clone();
            replaced = true;
        }
        if !replaced {
            vs.matchers.matchers.push(matcher.clone());
        }
    }

    vs.matchers.matchers.sort_by(|a, b| a.name.cmp(&b.name));
}

/// `without (...)` aggregations are left alone.
fn merge_group_by(agg: &mut AggregateExpr, keys: &[String]) {
    if keys.is_empty() {
        return;
    }

    match agg.modifier.as_mut() {
        Some(LabelModifier::Include(labels)) => append_missing(labels, keys),
        Some(LabelModifier::Exclude(_)) => {}
        None => {
            let mut labels = Labels { labels: Vec::new() };
            append_missing(&mut labels, keys);
            agg.modifier = Some(LabelModifier::Include(labels));
        }
    }
}

fn append_missing(labels: &mut Labels, keys: &[String]) {
    for key in keys {
        if !labels.labels.contains(key) {
            labels.labels.push(key.clone());
        }
    }
}
