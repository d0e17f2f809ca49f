use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use common::config::DataSourceConfig;
use url::Url;

use super::response::{MAX_ERROR_BODY_BYTES, is_parseable_status};
use super::{ApiRequest, ApiResponse};
use crate::error::QuerierError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl FromStr for HttpMethod {
    type Err = QuerierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            other => Err(QuerierError::InvalidRequest(format!(
                "unsupported HTTP method '{other}'"
            ))),
        }
    }
}

/// Sends API calls to a Prometheus-compatible backend.
///
/// Implementations return every HTTP answer as an [`ApiResponse`],
/// whatever its status; only failures to get an answer at all are errors.
#[async_trait]
pub trait PrometheusTransport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, QuerierError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
    method: HttpMethod,
    custom_query_parameters: Vec<(String, String)>,
}

impl ReqwestTransport {
    pub fn new(base_url: &str, method: HttpMethod, timeout: Duration) -> Result<Self, QuerierError> {
        Url::parse(base_url)
            .map_err(|e| QuerierError::InvalidRequest(format!("invalid URL '{base_url}': {e}")))?;

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            method,
            custom_query_parameters: Vec::new(),
        })
    }

    pub fn from_config(config: &DataSourceConfig) -> Result<Self, QuerierError> {
        let method = config.http_method.parse()?;
        let transport = Self::new(&config.url, method, config.timeout)?;

        Ok(match config.custom_query_parameters.as_deref() {
            Some(raw) => transport.with_custom_query_parameters(raw),
            None => transport,
        })
    }

    /// Parameters in `a=b&c=d` form appended to every call.
    pub fn with_custom_query_parameters(mut self, raw: &str) -> Self {
        self.custom_query_parameters = url::form_urlencoded::parse(raw.trim_start_matches('?').as_bytes())
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        self
    }

    fn url(&self, request: &ApiRequest) -> Result<Url, QuerierError> {
        let raw = format!("{}{}", self.base_url, request.path());
        let mut url = Url::parse(&raw)
            .map_err(|e| QuerierError::InvalidRequest(format!("invalid URL '{raw}': {e}")))?;
        if !self.custom_query_parameters.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.custom_query_parameters);
        }
        Ok(url)
    }

    async fn execute(
        &self,
        method: HttpMethod,
        request: &ApiRequest,
    ) -> Result<ApiResponse, QuerierError> {
        let url = self.url(request)?;
        let builder = match method {
            HttpMethod::Get => self.client.get(url).query(&request.params),
            HttpMethod::Post => self.client.post(url).form(&request.params),
        };

        let mut response = builder.send().await?;
        let status = response.status().as_u16();
        let body = if is_parseable_status(status) {
            response.bytes().await?
        } else {
            read_prefix(&mut response, MAX_ERROR_BODY_BYTES).await?
        };

        Ok(ApiResponse { status, body })
    }
}

/// First `limit` bytes of the body; the rest is never read.
async fn read_prefix(response: &mut reqwest::Response, limit: usize) -> Result<Bytes, QuerierError> {
    let mut body = BytesMut::new();
    while body.len() < limit {
        match response.chunk().await? {
            Some(chunk) => body.extend_from_slice(&chunk),
            None => break,
        }
    }
    body.truncate(limit);
    Ok(body.freeze())
}

#[async_trait]
impl PrometheusTransport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, QuerierError> {
        let response = self.execute(self.method, request).await?;

        if self.method == HttpMethod::Post && response.status == 405 {
            tracing::debug!(
                ref_id = %request.ref_id,
                path = request.path(),
                "POST not allowed, retrying with GET"
            );
            return self.execute(HttpMethod::Get, request).await;
        }

        Ok(response)
    }
}

#[cfg(any(test, feature = "testing"))]
type MockOutcome = Result<ApiResponse, QuerierError>;

/// Transport answering from canned responses keyed by ref id and call kind.
#[cfg(any(test, feature = "testing"))]
pub struct MockTransport {
    pub send_calls: tokio::sync::Mutex<Vec<ApiRequest>>,
    responses: std::collections::HashMap<(String, super::CallKind), MockOutcome>,
    fallback: MockOutcome,
    delay: Option<Duration>,
    in_flight: std::sync::atomic::AtomicUsize,
    peak_in_flight: std::sync::atomic::AtomicUsize,
}

#[cfg(any(test, feature = "testing"))]
impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "testing"))]
impl MockTransport {
    pub fn new() -> Self {
        Self {
            send_calls: tokio::sync::Mutex::new(Vec::new()),
            responses: std::collections::HashMap::new(),
            fallback: Ok(ApiResponse::new(
                200,
                r#"{"status":"success","data":{"resultType":"matrix","result":[]}}"#,
            )),
            delay: None,
            in_flight: std::sync::atomic::AtomicUsize::new(0),
            peak_in_flight: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn expect_response(
        mut self,
        ref_id: &str,
        kind: super::CallKind,
        status: u16,
        body: &str,
    ) -> Self {
        self.responses.insert(
            (ref_id.to_string(), kind),
            Ok(ApiResponse::new(status, body.to_string())),
        );
        self
    }

    pub fn expect_error(mut self, ref_id: &str, kind: super::CallKind, error: QuerierError) -> Self {
        self.responses.insert((ref_id.to_string(), kind), Err(error));
        self
    }

    /// Every call waits this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn calls(&self) -> Vec<ApiRequest> {
        self.send_calls.lock().await.clone()
    }

    /// Highest number of calls that were waiting on the mock at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(any(test, feature = "testing"))]
#[async_trait]
impl PrometheusTransport for MockTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, QuerierError> {
        use std::sync::atomic::Ordering;

        self.send_calls.lock().await.push(request.clone());
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.responses
            .get(&(request.ref_id.clone(), request.kind))
            .unwrap_or(&self.fallback)
            .clone()
    }
}
