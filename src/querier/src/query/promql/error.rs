//! PromQL-specific error types

use std::fmt;

/// Errors that can occur while rewriting a PromQL expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromQLError {
    /// Error parsing the PromQL query syntax
    ParseError(String),
    /// Label matcher that cannot be expressed in PromQL
    InvalidMatcher(String),
    /// Filter operator outside the supported set
    UnsupportedOperator(String),
}

impl std::error::Error for PromQLError {}

impl fmt::Display for PromQLError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParseError(msg) => write!(f, "PromQL parse error: {msg}"),
            Self::InvalidMatcher(msg) => write!(f, "Invalid label matcher: {msg}"),
            Self::UnsupportedOperator(op) => write!(f, "Unsupported filter operator: {op}"),
        }
    }
}
