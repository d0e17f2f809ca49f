//! PromQL expression handling
//!
//! Expressions are never evaluated here. They are expanded and rewritten
//! before being sent to the backend:
//!
//! ```text
//! expr text → macros::interpolate → rewrite::apply_filters_and_group_by → expr text
//! ```
//!
//! Macro expansion is textual and runs first, so that macros inside range
//! brackets (`rate(x[$__interval])`) are resolved before the expression is
//! parsed. Filter and group-by injection parses the result with the
//! promql-parser crate, edits the AST and serializes it back.
//!
//! # Modules
//!
//! - [`macros`] - `$__interval`, `$__range`, `$__rate_interval` and friends
//! - [`rewrite`] - scope / ad-hoc filter and group-by injection
//! - [`parser`] - parsing, tree walking and matcher conversion
//! - [`types`] - matcher and filter types
//! - [`error`] - Error types for PromQL operations

pub mod error;
pub mod macros;
pub mod parser;
pub mod rewrite;
pub mod types;

pub use error::PromQLError;
pub use types::{FilterOperator, LabelMatcher, MatcherOp, ScopeFilter};
