//! PromQL parser wrapper
//!
//! Thin layer over the promql-parser crate: parsing with our error type,
//! a mutable tree walk, and conversions between our matcher type and the
//! parser's.

use promql_parser::label::{MatchOp, Matcher};
use promql_parser::parser::{self, Expr};

use super::error::PromQLError;
use super::types::{LabelMatcher, MatcherOp};

/// Parse a PromQL query string into an AST expression
///
/// # Examples
/// ```ignore
/// use querier::query::promql::parser::parse;
///
/// let expr = parse("http_requests_total{job=\"api\"}")?;
/// let expr = parse("sum by (job)(rate(http_requests_total[5m]))")?;
/// ```
pub fn parse(query: &str) -> Result<Expr, PromQLError> {
    parser::parse(query).map_err(PromQLError::ParseError)
}

/// Visit every node of the tree, parents before children.
pub fn walk_mut<F>(expr: &mut Expr, visit: &mut F)
where
    F: FnMut(&mut Expr),
{
    visit(expr);

    match expr {
        Expr::Call(call) => {
            for arg in call.args.args.iter_mut() {
                walk_mut(arg, visit);
            }
        }
        Expr::Aggregate(agg) => {
            if let Some(param) = agg.param.as_mut() {
                walk_mut(param, visit);
            }
            walk_mut(&mut agg.expr, visit);
        }
        Expr::Binary(bin) => {
            walk_mut(&mut bin.lhs, visit);
            walk_mut(&mut bin.rhs, visit);
        }
        Expr::Paren(paren) => walk_mut(&mut paren.expr, visit),
        Expr::Unary(unary) => walk_mut(&mut unary.expr, visit),
        Expr::Subquery(sq) => walk_mut(&mut sq.expr, visit),
        Expr::VectorSelector(_)
        | Expr::MatrixSelector(_)
        | Expr::Extension(_)
        | Expr::NumberLiteral(_)
        | Expr::StringLiteral(_) => {}
    }
}

/// Extract label matchers from a parsed expression
pub fn extract_matchers(expr: &Expr) -> Vec<LabelMatcher> {
    let mut result = Vec::new();
    collect_matchers_recursive(expr, &mut result);
    result
}

fn collect_matchers_recursive(expr: &Expr, result: &mut Vec<LabelMatcher>) {
    match expr {
        Expr::VectorSelector(vs) => {
            result.extend(vs.matchers.matchers.iter().map(convert_matcher));
        }
        Expr::MatrixSelector(ms) => {
            result.extend(ms.vs.matchers.matchers.iter().map(convert_matcher));
        }
        Expr::Call(call) => {
            for arg in &call.args.args {
                collect_matchers_recursive(arg, result);
            }
        }
        Expr::Aggregate(agg) => {
            collect_matchers_recursive(&agg.expr, result);
        }
        Expr::Binary(bin) => {
            collect_matchers_recursive(&bin.lhs, result);
            collect_matchers_recursive(&bin.rhs, result);
        }
        Expr::Paren(paren) => {
            collect_matchers_recursive(&paren.expr, result);
        }
        Expr::Unary(unary) => {
            collect_matchers_recursive(&unary.expr, result);
        }
        Expr::Subquery(sq) => {
            collect_matchers_recursive(&sq.expr, result);
        }
        Expr::Extension(_) | Expr::NumberLiteral(_) | Expr::StringLiteral(_) => {}
    }
}

fn convert_matcher(matcher: &Matcher) -> LabelMatcher {
    let op = match &matcher.op {
        MatchOp::Equal => MatcherOp::Equal,
        MatchOp::NotEqual => MatcherOp::NotEqual,
        MatchOp::Re(_) => MatcherOp::RegexMatch,
        MatchOp::NotRe(_) => MatcherOp::RegexNotMatch,
    };

    LabelMatcher {
        name: matcher.name.clone(),
        op,
        value: matcher.value.clone(),
    }
}

/// Build a parser matcher by parsing a one-matcher selector, which also
/// compiles and validates regex values.
pub fn to_parser_matcher(matcher: &LabelMatcher) -> Result<Matcher, PromQLError> {
    let selector = format!(
        "placeholder{{{}{}{}}}",
        matcher.name,
        matcher.op,
        quote(&matcher.value)
    );

    let invalid = |reason: String| {
        PromQLError::InvalidMatcher(format!(
            "{}{}{:?}: {reason}",
            matcher.name, matcher.op, matcher.value
        ))
    };

    match parse(&selector) {
        Ok(Expr::VectorSelector(vs)) => vs
            .matchers
            .matchers
            .into_iter()
            .find(|m| m.name == matcher.name)
            .ok_or_else(|| invalid("label not recognized".to_string())),
        Ok(_) => Err(invalid("not a selector".to_string())),
        Err(err) => Err(invalid(err.to_string())),
    }
}

/// Double-quoted PromQL string literal for `value`.
pub fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            '\n' => quoted.push_str("\\n"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}
