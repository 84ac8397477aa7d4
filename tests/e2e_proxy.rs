//! End-to-end proxy tests.
//!
//! Each test starts an in-process mock upstream on an ephemeral port and
//! points a proxy at it, so the full path (header rewriting, upstream call,
//! relay, diagnostics) runs over real HTTP.

use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, Request, StatusCode},
    routing::post,
    Router,
};
use chat_relay::{ApiKey, Config, Diagnostics, MemorySink, Palette, ProxyServer};
use futures::stream::{self, StreamExt};
use http_body_util::BodyExt;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tower::ServiceExt;

const API_KEY: &str = "sk-upstream-secret";

/// What the mock upstream saw
#[derive(Clone, Default)]
struct Captured {
    headers: Arc<Mutex<Vec<HeaderMap>>>,
    bodies: Arc<Mutex<Vec<Bytes>>>,
}

impl Captured {
    fn last_headers(&self) -> HeaderMap {
        self.headers.lock().unwrap().last().cloned().unwrap()
    }

    fn requests(&self) -> usize {
        self.bodies.lock().unwrap().len()
    }
}

/// Serve `app` on an ephemeral port and return its chat-completions URL
async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}/v1/chat/completions")
}

/// Mock upstream answering every request with a fixed response
async fn spawn_upstream(
    status: StatusCode,
    content_type: &'static str,
    body: &'static str,
) -> (String, Captured) {
    let captured = Captured::default();
    let seen = captured.clone();

    let app = Router::new().route(
        "/v1/chat/completions",
        post(move |headers: HeaderMap, request_body: Bytes| {
            let seen = seen.clone();
            async move {
                seen.headers.lock().unwrap().push(headers);
                seen.bodies.lock().unwrap().push(request_body);
                (status, [(header::CONTENT_TYPE, content_type)], body)
            }
        }),
    );

    (serve(app).await, captured)
}

fn proxy_for(upstream_url: &str) -> (ProxyServer, Arc<MemorySink>) {
    let mut config = Config::default();
    config.proxy.upstream_url = upstream_url.to_string();

    let sink = Arc::new(MemorySink::new());
    let diagnostics = Diagnostics::new(sink.clone(), Palette::plain());
    let server =
        ProxyServer::with_diagnostics(config, ApiKey::new(API_KEY).unwrap(), diagnostics).unwrap();
    (server, sink)
}

fn chat_request(stream: bool) -> Request<Body> {
    let payload = serde_json::json!({
        "model": "gpt-4o",
        "messages": [{"role": "user", "content": "Tell me a haiku."}],
        "stream": stream,
        "stream_options": {"include_usage": true}
    });

    Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, "Bearer client-supplied-key")
        .header("Posit-Client-Type", "positron-assistant")
        .header("x-trace-id", "trace-123")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

const SSE_BODY: &str = concat!(
    "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hello\"},\"finish_reason\":null}],\"usage\":null}\n",
    "data: {\"id\":\"c1\",\"choices\":[],\"usage\":{\"prompt_tokens\":10,\"completion_tokens\":5,\"total_tokens\":15}}\n",
);

#[tokio::test]
async fn test_streaming_lines_relayed_as_frames() {
    let (upstream, _captured) = spawn_upstream(StatusCode::OK, "text/event-stream", SSE_BODY).await;
    let (proxy, sink) = proxy_for(&upstream);

    let response = proxy.router().oneshot(chat_request(true)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );
    assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "no-cache");

    let mut body = response.into_body();
    let mut frames = Vec::new();
    while let Some(frame) = body.frame().await {
        if let Ok(data) = frame.unwrap().into_data() {
            frames.push(data);
        }
    }

    let expected: Vec<Bytes> = SSE_BODY
        .lines()
        .map(|line| Bytes::from(format!("{line}\n")))
        .collect();
    assert_eq!(frames, expected);

    let out = sink.contents();
    assert!(out.contains("Response from provider (200, streaming)"));
    assert!(out.contains("data: {\n  \"id\": \"c1\",\n  \"choices\": [\n"));
    assert!(out.contains("• Input tokens:  10"));
    assert!(out.contains("• Output tokens: 5"));
    assert!(out.contains("• Total tokens:  15"));
    assert!(out.contains("TIMING SUMMARY (streaming request)"));
    assert!(out.contains("• Request preparation:"));
    assert!(out.contains("• Provider initial response:"));
    assert!(out.contains("• First content chunk latency:"));
    assert!(out.contains("• Total request time:"));
}

#[tokio::test]
async fn test_headers_rewritten_for_upstream() {
    let (upstream, captured) = spawn_upstream(StatusCode::OK, "application/json", "{}").await;
    let (proxy, _sink) = proxy_for(&upstream);

    let response = proxy.router().oneshot(chat_request(false)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let headers = captured.last_headers();
    assert_eq!(
        headers.get(header::AUTHORIZATION).unwrap(),
        &format!("Bearer {API_KEY}")
    );
    assert_eq!(headers.get_all(header::AUTHORIZATION).iter().count(), 1);
    assert!(headers.get("posit-client-type").is_none());
    assert!(headers.keys().all(|name| !name.as_str().starts_with("posit")));
    assert_eq!(headers.get("x-trace-id").unwrap(), "trace-123");
    assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "application/json");
}

#[tokio::test]
async fn test_request_body_forwarded_unchanged() {
    let (upstream, captured) = spawn_upstream(StatusCode::OK, "application/json", "{}").await;
    let (proxy, _sink) = proxy_for(&upstream);

    // Key order and spacing must survive the trip
    let raw = r#"{"stream": false, "zeta": 1, "messages": [], "alpha": {"b": 2, "a": 1}}"#;
    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .body(Body::from(raw))
        .unwrap();

    proxy.router().oneshot(request).await.unwrap();

    let bodies = captured.bodies.lock().unwrap();
    assert_eq!(bodies.last().unwrap(), &Bytes::from_static(raw.as_bytes()));
}

#[tokio::test]
async fn test_non_streaming_body_copied_whole() {
    const JSON_BODY: &str = r#"{"id":"chatcmpl-1","object":"chat.completion","choices":[{"index":0,"message":{"role":"assistant","content":"Hi"},"finish_reason":"stop"}],"usage":{"prompt_tokens":7,"completion_tokens":1,"total_tokens":8}}"#;
    let (upstream, _captured) = spawn_upstream(StatusCode::OK, "application/json", JSON_BODY).await;
    let (proxy, sink) = proxy_for(&upstream);

    let response = proxy.router().oneshot(chat_request(false)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, Bytes::from_static(JSON_BODY.as_bytes()));

    let out = sink.contents();
    assert!(out.contains("• Total tokens:  8"));
    assert!(out.contains("TIMING SUMMARY (non-streaming request)"));
    assert!(!out.contains("First content chunk latency"));
}

#[tokio::test]
async fn test_upstream_status_mirrored() {
    const ERROR_BODY: &str = r#"{"error":{"message":"Rate limit reached","type":"requests"}}"#;
    let (upstream, _captured) =
        spawn_upstream(StatusCode::TOO_MANY_REQUESTS, "application/json", ERROR_BODY).await;
    let (proxy, _sink) = proxy_for(&upstream);

    let response = proxy.router().oneshot(chat_request(false)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, Bytes::from_static(ERROR_BODY.as_bytes()));
}

#[tokio::test]
async fn test_malformed_request_never_reaches_upstream() {
    let (upstream, captured) = spawn_upstream(StatusCode::OK, "application/json", "{}").await;
    let (proxy, _sink) = proxy_for(&upstream);

    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .body(Body::from("this is not json"))
        .unwrap();
    let response = proxy.router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(captured.requests(), 0);
}

#[tokio::test]
async fn test_blank_lines_pass_through() {
    const FRAMED: &str = "event: message\ndata: {\"a\":1}\n\ndata: [DONE]\n\n";
    let (upstream, _captured) = spawn_upstream(StatusCode::OK, "text/event-stream", FRAMED).await;
    let (proxy, _sink) = proxy_for(&upstream);

    let response = proxy.router().oneshot(chat_request(true)).await.unwrap();
    let body = response.into_body().collect().await.unwrap().to_bytes();

    assert_eq!(body, Bytes::from_static(FRAMED.as_bytes()));
}

/// The second upstream line is held back until the client has seen the
/// first one; a batching relay would deadlock here.
#[tokio::test]
async fn test_each_line_flushed_before_next_read() {
    let (gate_tx, gate_rx) = oneshot::channel::<()>();
    let gate = Arc::new(Mutex::new(Some(gate_rx)));

    let app = Router::new().route(
        "/v1/chat/completions",
        post(move || {
            let gate = gate.clone();
            async move {
                let gate_rx = gate.lock().unwrap().take().unwrap();
                let first = stream::once(async {
                    Ok::<_, Infallible>(Bytes::from_static(b"data: {\"n\":1}\n"))
                });
                let second = stream::once(async move {
                    let _ = gate_rx.await;
                    Ok::<_, Infallible>(Bytes::from_static(b"data: {\"n\":2}\n"))
                });
                (
                    [(header::CONTENT_TYPE, "text/event-stream")],
                    Body::from_stream(first.chain(second)),
                )
            }
        }),
    );
    let upstream = serve(app).await;
    let (proxy, _sink) = proxy_for(&upstream);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = proxy.serve(listener).await;
    });

    let client = reqwest::Client::new();
    let mut response = client
        .post(format!("http://{proxy_addr}/v1/chat/completions"))
        .json(&serde_json::json!({"stream": true, "messages": []}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let first = timeout(Duration::from_secs(5), response.chunk())
        .await
        .expect("first line was not flushed")
        .unwrap()
        .unwrap();
    assert_eq!(first, Bytes::from_static(b"data: {\"n\":1}\n"));

    gate_tx.send(()).unwrap();

    let mut rest = Vec::new();
    while let Some(chunk) = timeout(Duration::from_secs(5), response.chunk())
        .await
        .expect("stream stalled")
        .unwrap()
    {
        rest.extend_from_slice(&chunk);
    }
    assert_eq!(rest, b"data: {\"n\":2}\n");
}

#[tokio::test]
async fn test_unreachable_upstream_returns_server_error() {
    // Bind then drop to get a port nothing listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (proxy, _sink) = proxy_for(&format!("http://{addr}/v1/chat/completions"));
    let response = proxy.router().oneshot(chat_request(true)).await.unwrap();

    assert!(response.status().is_server_error());
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(json["error"]["message"]
        .as_str()
        .unwrap()
        .contains("Failed to connect to upstream"));
}

#[tokio::test]
async fn test_concurrent_requests_are_independent() {
    let (upstream, captured) = spawn_upstream(StatusCode::OK, "text/event-stream", SSE_BODY).await;
    let (proxy, _sink) = proxy_for(&upstream);
    let router = proxy.router();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let router = router.clone();
        handles.push(tokio::spawn(async move {
            let response = router.oneshot(chat_request(true)).await.unwrap();
            response.into_body().collect().await.unwrap().to_bytes()
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), Bytes::from_static(SSE_BODY.as_bytes()));
    }
    assert_eq!(captured.requests(), 8);
}
