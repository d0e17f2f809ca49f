//! Batch execution.
//!
//! Each query of a batch is compiled and then issues up to three backend
//! calls (instant, range, exemplar). In parallel mode queries run
//! concurrently up to the configured limit and the calls of one query run
//! concurrently too; in sequential mode everything is awaited in order.
//! Either way every query ends up with exactly one [`QueryResponse`].

use std::collections::BTreeMap;

use common::config::{Configuration, DEFAULT_CONCURRENT_QUERY_COUNT, SamplerKind};
use futures::{StreamExt, stream};
use serde::{Serialize, Serializer};
use tokio_util::sync::CancellationToken;

use crate::client::{ApiRequest, CallKind, PrometheusTransport, parse_response};
use crate::error::QuerierError;
use crate::exemplar;
use crate::frame::Frame;
use crate::query::{CompiledQuery, QueryBatch, QueryCompiler, QueryRequest};

/// Result for one query of a batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResponse {
    pub frames: Vec<Frame>,
    #[serde(
        serialize_with = "serialize_error",
        skip_serializing_if = "Option::is_none"
    )]
    pub error: Option<QuerierError>,
    /// HTTP status of the failing backend call, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl QueryResponse {
    fn failed(error: QuerierError) -> Self {
        Self {
            frames: Vec::new(),
            error: Some(error),
            status: None,
        }
    }

    /// Fold the outcome of an instant or range call into this response.
    fn merge(&mut self, outcome: CallOutcome) {
        if let Some(error) = outcome.error {
            self.error = Some(match self.error.take() {
                Some(existing) => existing.combine(error),
                None => error,
            });
            self.status = outcome.status;
        }
        self.frames.extend(outcome.frames);
    }
}

fn serialize_error<S>(error: &Option<QuerierError>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match error {
        Some(error) => serializer.serialize_str(&error.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Responses keyed by ref id.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResponse {
    pub results: BTreeMap<String, QueryResponse>,
}

impl BatchResponse {
    pub fn get(&self, ref_id: &str) -> Option<&QueryResponse> {
        self.results.get(ref_id)
    }
}

#[derive(Debug, Default)]
struct CallOutcome {
    frames: Vec<Frame>,
    error: Option<QuerierError>,
    status: Option<u16>,
}

pub struct ExecutionCoordinator<T> {
    transport: T,
    compiler: QueryCompiler,
    parallel: bool,
    concurrency_limit: usize,
    sampler: SamplerKind,
}

impl<T: PrometheusTransport> ExecutionCoordinator<T> {
    pub fn new(transport: T, scrape_interval: impl Into<String>) -> Self {
        Self {
            transport,
            compiler: QueryCompiler::new(scrape_interval),
            parallel: true,
            concurrency_limit: DEFAULT_CONCURRENT_QUERY_COUNT,
            sampler: SamplerKind::default(),
        }
    }

    pub fn from_config(transport: T, config: &Configuration) -> Self {
        Self::new(transport, config.datasource.scrape_interval.clone())
            .with_parallel(config.execution.parallel)
            .with_concurrency_limit(config.execution.concurrency_limit())
            .with_sampler(config.exemplars.sampler)
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Zero is treated as one.
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit.max(1);
        self
    }

    pub fn with_sampler(mut self, sampler: SamplerKind) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run every query of `batch`.
    ///
    /// Cancelling `cancel` aborts calls in flight and makes queries that
    /// have not started yet fail with [`QuerierError::Cancelled`].
    pub async fn execute(&self, batch: &QueryBatch, cancel: &CancellationToken) -> BatchResponse {
        let from_alert = batch.from_alert();
        tracing::debug!(
            queries = batch.queries.len(),
            parallel = self.parallel,
            from_alert,
            "executing query batch"
        );

        let mut results = BTreeMap::new();
        if self.parallel {
            let mut responses = stream::iter(&batch.queries)
                .map(|request| async move {
                    let response = self.run_query(request, from_alert, cancel).await;
                    (request.ref_id.clone(), response)
                })
                .buffer_unordered(self.concurrency_limit);

            while let Some((ref_id, response)) = responses.next().await {
                results.insert(ref_id, response);
            }
        } else {
            for request in &batch.queries {
                let response = self.run_query(request, from_alert, cancel).await;
                results.insert(request.ref_id.clone(), response);
            }
        }

        BatchResponse { results }
    }

    async fn run_query(
        &self,
        request: &QueryRequest,
        from_alert: bool,
        cancel: &CancellationToken,
    ) -> QueryResponse {
        if cancel.is_cancelled() {
            return QueryResponse::failed(QuerierError::Cancelled);
        }

        let query = match self.compiler.compile(request, from_alert) {
            Ok(query) => query,
            Err(err) => {
                tracing::warn!(ref_id = %request.ref_id, error = %err, "failed to compile query");
                return QueryResponse::failed(err);
            }
        };

        let instant = self.dispatch(&query, CallKind::Instant, query.instant_query, cancel);
        let range = self.dispatch(&query, CallKind::Range, query.range_query, cancel);
        let exemplar = self.dispatch(&query, CallKind::Exemplar, query.exemplar_query, cancel);

        let (instant, range, exemplar) = if self.parallel {
            tokio::join!(instant, range, exemplar)
        } else {
            (instant.await, range.await, exemplar.await)
        };

        let mut response = QueryResponse::default();
        for outcome in [instant, range].into_iter().flatten() {
            response.merge(outcome);
        }
        if let Some(outcome) = exemplar {
            if let Some(err) = &outcome.error {
                tracing::warn!(ref_id = %query.ref_id, error = %err, "exemplar query failed");
            }
            response.frames.extend(outcome.frames);
        }
        response
    }

    async fn dispatch(
        &self,
        query: &CompiledQuery,
        kind: CallKind,
        enabled: bool,
        cancel: &CancellationToken,
    ) -> Option<CallOutcome> {
        if !enabled {
            return None;
        }

        let request = match kind {
            CallKind::Instant => ApiRequest::instant(query),
            CallKind::Range => ApiRequest::range(query),
            CallKind::Exemplar => ApiRequest::exemplars(query),
        };
        tracing::debug!(ref_id = %query.ref_id, kind = %kind, expr = %query.expr, "dispatching backend call");

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(QuerierError::Cancelled),
            sent = self.transport.send(&request) => sent,
        };
        let response = match sent {
            Ok(response) => response,
            Err(error) => {
                return Some(CallOutcome {
                    error: Some(error),
                    ..Default::default()
                });
            }
        };

        let outcome = match parse_response(query, kind, &response) {
            Ok(frames) if kind == CallKind::Exemplar => CallOutcome {
                frames: exemplar::reduce(frames, self.sampler),
                ..Default::default()
            },
            Ok(frames) => CallOutcome {
                frames,
                ..Default::default()
            },
            Err(error) => CallOutcome {
                frames: Vec::new(),
                error: Some(error),
                status: Some(response.status),
            },
        };
        Some(outcome)
    }
}
