//! Query planning and response assembly for Prometheus-compatible backends.
//!
//! ```text
//! QueryBatch ─▶ QueryCompiler ─▶ ExecutionCoordinator ─▶ BatchResponse
//!               (step, macros,    (instant / range /
//!                filters)          exemplar calls, exemplar sampling)
//! ```

pub mod client;
pub mod error;
pub mod exemplar;
pub mod executor;
pub mod frame;
pub mod interval;
pub mod query;

pub use client::{PrometheusTransport, ReqwestTransport};
pub use error::QuerierError;
pub use executor::{BatchResponse, ExecutionCoordinator, QueryResponse};
pub use query::{CompiledQuery, QueryBatch, QueryCompiler, QueryRequest};
