//! Chat-completions reverse proxy server.
//!
//! One POST endpoint, one upstream. Requests are forwarded unchanged apart
//! from header rewriting; responses are mirrored back, streamed line by line
//! when the client asked for `"stream": true`.
//!
//! # Request lifecycle
//!
//! ```text
//! Client               Chat Relay                       Upstream
//!   |                      |                               |
//!   |-- POST /v1/chat ---->| RequestStart                  |
//!   |                      | RequestPrepStart              |
//!   |                      |   read body, rewrite headers  |
//!   |                      | RequestPrepEnd                |
//!   |                      | ProviderCallStart             |
//!   |                      |------------ POST ------------>|
//!   |                      |<--------- headers ------------| ProviderResponseEnd
//!   |<-- status/headers ---|                               |
//!   |<-- line ------------ |<--------- body bytes ---------| FirstChunk
//!   |<-- line ------------ |                               |
//!   |                      | Completion -> usage + timing  |
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use reqwest::Client;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

use super::forward::{client_headers, is_streaming_request, upstream_headers};
use crate::config::{ApiKey, Config};
use crate::detect::FormatDetector;
use crate::diagnostics::Diagnostics;
use crate::error::{RelayError, Result};
use crate::relay::{RelayOptions, StreamRelay};
use crate::timing::{Checkpoint, RequestTiming};

/// Frames buffered between the relay task and the client body.
///
/// Kept at one so the relay never runs ahead of the client by more than a
/// single line.
const CLIENT_BUFFER_FRAMES: usize = 1;

/// Shared proxy state.
///
/// Immutable after construction; nothing in here is mutated per request.
struct ProxyState {
    config: Config,
    api_key: ApiKey,
    client: Client,
    relay: StreamRelay,
}

impl ProxyState {
    fn new(config: Config, api_key: ApiKey, diagnostics: Diagnostics) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.proxy.connect_timeout_secs))
            .build()
            .map_err(|e| RelayError::Network(format!("Failed to create HTTP client: {e}")))?;

        let relay = StreamRelay::new(
            RelayOptions::from(&config.diagnostics),
            Arc::new(FormatDetector::new()),
            diagnostics,
        );

        Ok(Self {
            config,
            api_key,
            client,
            relay,
        })
    }
}

/// Chat Relay proxy server
pub struct ProxyServer {
    state: Arc<ProxyState>,
}

impl ProxyServer {
    /// Create a proxy writing diagnostics to the console
    pub fn new(config: Config, api_key: ApiKey) -> Result<Self> {
        let diagnostics = Diagnostics::console(config.diagnostics.color);
        Self::with_diagnostics(config, api_key, diagnostics)
    }

    /// Create a proxy writing diagnostics to a custom sink
    pub fn with_diagnostics(config: Config, api_key: ApiKey, diagnostics: Diagnostics) -> Result<Self> {
        if !config.proxy.endpoint.starts_with('/') {
            return Err(RelayError::Config(format!(
                "Endpoint must start with '/': {}",
                config.proxy.endpoint
            )));
        }

        Ok(Self {
            state: Arc::new(ProxyState::new(config, api_key, diagnostics)?),
        })
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.state.config
    }

    /// Get the router for the proxy
    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.state.config.proxy.endpoint, post(chat_completions_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until the server stops.
    pub async fn run(&self) -> Result<()> {
        let addr = self.state.config.proxy.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| RelayError::Server(format!("Failed to bind TCP to {}: {}", addr, e)))?;

        self.serve(listener).await
    }

    /// Serve on an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let config = &self.state.config;

        tracing::info!("Chat relay starting...");
        if let Ok(addr) = listener.local_addr() {
            tracing::info!("Listening on http://{}{}", addr, config.proxy.endpoint);
        }
        tracing::info!("Upstream: {}", config.proxy.upstream_url);
        tracing::info!(
            "Diagnostics: pretty_print={}, accumulate_text={}, preserve_blank_lines={}",
            config.diagnostics.pretty_print,
            config.diagnostics.accumulate_text,
            config.diagnostics.preserve_blank_lines
        );

        axum::serve(listener, self.router())
            .await
            .map_err(|e| RelayError::Server(format!("TCP server error: {}", e)))
    }
}

// === Handlers ===

/// Chat completions handler - supports both streaming and non-streaming
async fn chat_completions_handler(
    State(state): State<Arc<ProxyState>>,
    request: Request,
) -> Response {
    let timing = RequestTiming::start();
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("chat_completion", %request_id);

    forward_request(state, request, timing).instrument(span).await
}

async fn forward_request(
    state: Arc<ProxyState>,
    request: Request,
    mut timing: RequestTiming,
) -> Response {
    let proxy = &state.config.proxy;
    let (parts, body) = request.into_parts();

    timing.mark(Checkpoint::RequestPrepStart);

    let body = match axum::body::to_bytes(body, proxy.max_body_size).await {
        Ok(body) => body,
        Err(e) => {
            let err = RelayError::InvalidRequest(format!("Failed to read request body: {e}"));
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, &err);
        },
    };

    let streaming = match is_streaming_request(&body) {
        Ok(streaming) => streaming,
        Err(err) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, &err),
    };

    let headers = match upstream_headers(&parts.headers, &state.api_key, &proxy.stripped_header_prefix) {
        Ok(headers) => headers,
        Err(err) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, &err),
    };

    tracing::debug!(streaming, bytes = body.len(), "Forwarding request upstream");

    let upstream = state
        .client
        .post(&proxy.upstream_url)
        .headers(headers)
        .body(body);

    timing.mark(Checkpoint::RequestPrepEnd);
    timing.mark(Checkpoint::ProviderCallStart);

    let response = match upstream.send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("Failed to connect to upstream: {}", e);
            let err = RelayError::Network(format!("Failed to connect to upstream: {e}"));
            return error_response(StatusCode::BAD_GATEWAY, &err);
        },
    };

    timing.mark(Checkpoint::ProviderResponseEnd);

    let status = response.status();
    let headers = client_headers(response.headers());
    tracing::info!(status = status.as_u16(), streaming, "Upstream responded");
    state.relay.diagnostics().response_header(status.as_u16(), streaming);

    if streaming {
        let (tx, rx) = mpsc::channel(CLIENT_BUFFER_FRAMES);
        let relay = state.relay.clone();
        let upstream = response.bytes_stream();

        tokio::spawn(
            async move {
                relay.run(upstream, &tx, &mut timing).await;
            }
            .in_current_span(),
        );

        build_response(status, headers, Body::from_stream(ReceiverStream::new(rx)))
    } else {
        match response.bytes().await {
            Ok(bytes) => {
                state.relay.summarize_buffered(&bytes, &mut timing);
                build_response(status, headers, Body::from(bytes))
            },
            Err(e) => {
                tracing::error!("Failed to read upstream response: {}", e);
                let err = RelayError::Upstream(format!("Failed to read upstream response: {e}"));
                error_response(StatusCode::BAD_GATEWAY, &err)
            },
        }
    }
}

fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// OpenAI-style error envelope
fn error_response(status: StatusCode, err: &RelayError) -> Response {
    (
        status,
        Json(json!({
            "error": {
                "message": err.to_string(),
                "type": err.kind()
            }
        })),
    )
        .into_response()
}
