use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, TimeZone, Utc};
use querier::client::response::MAX_ERROR_BODY_BYTES;
use querier::client::{HttpMethod, PrometheusTransport, ReqwestTransport};
use querier::interval::TimeRange;
use querier::{ExecutionCoordinator, QueryBatch, QueryRequest};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

const MATRIX: &str = r#"{"status":"success","data":{"resultType":"matrix","result":[{"metric":{"job":"api"},"values":[[1700000000,"1"]]}]}}"#;

/// Request line and body of one received request.
type Received = Arc<Mutex<Vec<(String, String)>>>;

/// Minimal HTTP/1.1 backend: answers POST with `post_status`, GET with a matrix.
async fn start_backend(post_status: u16) -> (String, Received) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let received: Received = Arc::new(Mutex::new(Vec::new()));

    let log = received.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let log = log.clone();
            tokio::spawn(async move { serve(stream, post_status, log).await });
        }
    });

    (format!("http://{addr}"), received)
}

async fn serve(mut stream: TcpStream, post_status: u16, log: Received) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let request_line = head.lines().next().unwrap_or_default().to_string();
    let body = String::from_utf8_lossy(&buf[header_end..]).to_string();
    let is_post = request_line.starts_with("POST");
    log.lock().await.push((request_line, body));

    let (status, reason, payload) = if is_post && post_status != 200 {
        (post_status, "Method Not Allowed", String::new())
    } else {
        (200, "OK", MATRIX.to_string())
    };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
        payload.len()
    );
    stream.write_all(response.as_bytes()).await.unwrap();
    stream.shutdown().await.ok();
}

/// Backend answering every request with `status` and `body`.
async fn start_fixed_backend(status: u16, body: String) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let body = body.clone();
            tokio::spawn(async move {
                let mut chunk = [0u8; 4096];
                let _ = stream.read(&mut chunk).await;
                let response = format!(
                    "HTTP/1.1 {status} Status\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                // The client may hang up before the whole body is written.
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    format!("http://{addr}")
}

fn batch() -> QueryBatch {
    let from = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    QueryBatch::new(vec![QueryRequest::new(
        "A",
        "up",
        TimeRange::new(from, from + TimeDelta::hours(1)),
    )])
}

#[tokio::test]
async fn test_post_sends_form_body() {
    let (url, received) = start_backend(200).await;
    let transport = ReqwestTransport::new(&url, HttpMethod::Post, Duration::from_secs(5)).unwrap();
    let coordinator = ExecutionCoordinator::new(transport, "15s");

    let response = coordinator.execute(&batch(), &CancellationToken::new()).await;
    let result = response.get("A").unwrap();
    assert!(result.error.is_none(), "{:?}", result.error);
    assert_eq!(result.frames.len(), 1);

    let received = received.lock().await;
    assert_eq!(received.len(), 1);
    assert!(received[0].0.starts_with("POST /api/v1/query_range "));
    assert!(received[0].1.contains("query=up"));
    assert!(received[0].1.contains("step=15"));
}

#[tokio::test]
async fn test_post_rejected_with_405_retries_as_get() {
    let (url, received) = start_backend(405).await;
    let transport = ReqwestTransport::new(&url, HttpMethod::Post, Duration::from_secs(5))
        .unwrap()
        .with_custom_query_parameters("dedup=false");
    let coordinator = ExecutionCoordinator::new(transport, "15s");

    let response = coordinator.execute(&batch(), &CancellationToken::new()).await;
    assert!(response.get("A").unwrap().error.is_none());

    let received = received.lock().await;
    assert_eq!(received.len(), 2);
    assert!(received[0].0.starts_with("POST /api/v1/query_range?dedup=false "));
    assert!(received[1].0.starts_with("GET /api/v1/query_range?dedup=false&query=up"));
}

#[tokio::test]
async fn test_error_body_read_stops_at_cap() {
    let body = "x".repeat(256 * 1024);
    let url = start_fixed_backend(502, body.clone()).await;
    let transport = ReqwestTransport::new(&url, HttpMethod::Get, Duration::from_secs(5)).unwrap();
    let request = querier::client::ApiRequest::range(
        &querier::QueryCompiler::new("15s")
            .compile(&batch().queries[0], false)
            .unwrap(),
    );

    let response = transport.send(&request).await.unwrap();
    assert_eq!(response.status, 502);
    assert_eq!(response.body.len(), MAX_ERROR_BODY_BYTES);

    let url = start_fixed_backend(200, body).await;
    let transport = ReqwestTransport::new(&url, HttpMethod::Get, Duration::from_secs(5)).unwrap();
    let response = transport.send(&request).await.unwrap();
    assert_eq!(response.body.len(), 256 * 1024);
}

#[tokio::test]
async fn test_unreachable_backend_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport =
        ReqwestTransport::new(&format!("http://{addr}"), HttpMethod::Get, Duration::from_secs(5))
            .unwrap();
    let request = querier::client::ApiRequest::instant(
        &querier::QueryCompiler::new("15s")
            .compile(&batch().queries[0], false)
            .unwrap(),
    );

    let err = transport.send(&request).await.unwrap_err();
    assert!(matches!(err, querier::QuerierError::Transport(_)));
}
