//! Label matcher and filter types used when rewriting expressions.

use serde::{Deserialize, Serialize};

use super::error::PromQLError;

/// Label matcher types matching Prometheus semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherOp {
    /// Exact string match (=)
    Equal,
    /// Not equal (!=)
    NotEqual,
    /// Regex match (=~)
    RegexMatch,
    /// Regex not match (!~)
    RegexNotMatch,
}

impl MatcherOp {
    /// `=` and `=~` select series, `!=` and `!~` exclude them.
    pub fn is_positive(&self) -> bool {
        matches!(self, Self::Equal | Self::RegexMatch)
    }
}

impl std::fmt::Display for MatcherOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Equal => write!(f, "="),
            Self::NotEqual => write!(f, "!="),
            Self::RegexMatch => write!(f, "=~"),
            Self::RegexNotMatch => write!(f, "!~"),
        }
    }
}

/// A single label matcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMatcher {
    /// Label name
    pub name: String,
    /// Match operation
    pub op: MatcherOp,
    /// Value to match against
    pub value: String,
}

impl LabelMatcher {
    pub fn new(name: &str, op: MatcherOp, value: &str) -> Self {
        Self {
            name: name.to_string(),
            op,
            value: value.to_string(),
        }
    }

    /// Create a new equality matcher
    pub fn equal(name: &str, value: &str) -> Self {
        Self::new(name, MatcherOp::Equal, value)
    }

    /// Create a new regex matcher
    pub fn regex_match(name: &str, pattern: &str) -> Self {
        Self::new(name, MatcherOp::RegexMatch, pattern)
    }
}

/// Operators a scope or ad-hoc filter may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Equals,
    NotEquals,
    RegexMatch,
    RegexNotMatch,
    OneOf,
    NotOneOf,
}

impl std::str::FromStr for FilterOperator {
    type Err = PromQLError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "equals" => Ok(Self::Equals),
            "not-equals" => Ok(Self::NotEquals),
            "regex-match" => Ok(Self::RegexMatch),
            "regex-not-match" => Ok(Self::RegexNotMatch),
            "one-of" => Ok(Self::OneOf),
            "not-one-of" => Ok(Self::NotOneOf),
            other => Err(PromQLError::UnsupportedOperator(other.to_string())),
        }
    }
}

/// A label filter coming from a scope or from the ad-hoc filter bar
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeFilter {
    pub key: String,
    #[serde(default)]
    pub value: String,
    /// Only used by the `one-of` and `not-one-of` operators
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
    pub operator: String,
}

impl ScopeFilter {
    pub fn new(key: &str, operator: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
            values: Vec::new(),
            operator: operator.to_string(),
        }
    }

    pub fn one_of(key: &str, values: &[&str]) -> Self {
        Self {
            key: key.to_string(),
            value: String::new(),
            values: values.iter().map(|v| v.to_string()).collect(),
            operator: "one-of".to_string(),
        }
    }

    pub fn operator(&self) -> Result<FilterOperator, PromQLError> {
        self.operator.parse()
    }
}
