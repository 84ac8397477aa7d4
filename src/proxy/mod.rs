//! Diagnostic reverse proxy for one chat-completions endpoint.
//!
//! The proxy sits between a client and a single upstream LLM API. Requests
//! are forwarded as-is (reserved headers stripped, `Authorization` replaced
//! with the configured key) and responses are relayed back, line by line for
//! SSE streams, while a pretty-printed copy of every chunk, a token usage
//! summary and a timing summary are written to the console.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Chat Relay                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  Client App ──────> Header ──────────────────────>          │
//! │                     Rewrite                                  │
//! │                                         │                    │
//! │                                         v                    │
//! │                                   ┌──────────┐               │
//! │                                   │ Upstream │               │
//! │                                   │   LLM    │               │
//! │                                   └──────────┘               │
//! │                                         │                    │
//! │  Client App <────── Stream Relay <──────┘                   │
//! │                          │                                   │
//! │                          └──> detect / usage / pretty-print  │
//! │                                   (console diagnostics)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use chat_relay::config::{ApiKey, Config};
//! use chat_relay::proxy::ProxyServer;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::load(None).unwrap();
//!     let api_key = ApiKey::resolve(None).unwrap();
//!
//!     let server = ProxyServer::new(config, api_key).unwrap();
//!     server.run().await.unwrap();
//! }
//! ```
//!
//! # Client Configuration
//!
//! Point your OpenAI client at the proxy:
//!
//! ```python
//! # Python
//! from openai import OpenAI
//!
//! client = OpenAI(
//!     base_url="http://localhost:8081/v1",
//!     api_key="unused"  # replaced by the proxy
//! )
//! ```

mod forward;
mod server;

pub use forward::{client_headers, is_streaming_request, upstream_headers, HOP_BY_HOP_HEADERS};
pub use server::ProxyServer;
