//! Query planning: request model, PromQL handling and compilation.

pub mod compiler;
pub mod model;
pub mod promql;

pub use compiler::{CompiledQuery, QueryCompiler, QueryTimeRange, align_time_range};
pub use model::{QueryBatch, QueryFormat, QueryRequest, Scope};
