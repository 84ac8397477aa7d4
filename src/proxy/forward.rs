//! Request forwarding: inbound body inspection and header rewriting.

use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value};

use crate::config::ApiKey;
use crate::error::{RelayError, Result};

/// Headers that describe a single connection and are never forwarded
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// Whether the inbound chat request asks for a streamed response.
///
/// The body must be a JSON object; a missing or non-boolean `stream` field
/// means non-streaming. No other field is validated.
pub fn is_streaming_request(body: &[u8]) -> Result<bool> {
    let payload: Map<String, Value> = serde_json::from_slice(body)
        .map_err(|e| RelayError::InvalidRequest(format!("Request body is not a JSON object: {e}")))?;

    Ok(payload
        .get("stream")
        .and_then(|v| v.as_bool())
        .unwrap_or(false))
}

/// Build the outbound header set from the inbound one.
///
/// - headers whose name starts with `stripped_prefix` (case-insensitive) are
///   dropped; an empty prefix strips nothing
/// - hop-by-hop headers, `Host`, `Content-Length` and `Accept-Encoding` are
///   dropped so the upstream body arrives as plain, re-framable text
/// - `Content-Type` is forced to `application/json`
/// - `Authorization` is always replaced with the configured key
pub fn upstream_headers(
    inbound: &HeaderMap,
    api_key: &ApiKey,
    stripped_prefix: &str,
) -> Result<HeaderMap> {
    let prefix = stripped_prefix.to_ascii_lowercase();
    let mut outbound = HeaderMap::with_capacity(inbound.len() + 2);

    for (name, value) in inbound {
        let lower = name.as_str();
        if !prefix.is_empty() && lower.starts_with(&prefix) {
            tracing::debug!(header = lower, "Stripping reserved header");
            continue;
        }
        if is_hop_by_hop(name)
            || *name == header::HOST
            || *name == header::CONTENT_LENGTH
            || *name == header::ACCEPT_ENCODING
            || *name == header::AUTHORIZATION
        {
            continue;
        }
        outbound.append(name.clone(), value.clone());
    }

    outbound.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );

    let mut auth = HeaderValue::from_str(&api_key.bearer())
        .map_err(|_| RelayError::Config("API key contains invalid header characters".into()))?;
    auth.set_sensitive(true);
    outbound.insert(header::AUTHORIZATION, auth);

    Ok(outbound)
}

/// Headers to send back to the client, mirrored from the upstream response.
///
/// Hop-by-hop headers and `Content-Length` are left to the server, which
/// re-frames the body; `Cache-Control: no-cache` is always set.
pub fn client_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len() + 1);

    for (name, value) in upstream {
        if is_hop_by_hop(name) || *name == header::CONTENT_LENGTH {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers
}
