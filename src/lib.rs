//! # Chat Relay - Diagnostic Streaming Proxy for LLM APIs
//!
//! A single-endpoint reverse proxy that sits between a client and an upstream
//! chat-completions API. Requests are forwarded unchanged, responses
//! (including server-sent-event streams) are relayed back line by line, and
//! every chunk is mirrored to the console as readable diagnostics.
//!
//! ## Features
//!
//! - **Faithful streaming**: each upstream line reaches the client as its own
//!   frame, in upstream order, before the next line is read
//! - **Provider-agnostic text detection**: chat-completions, Anthropic
//!   messages and Responses API deltas
//! - **Order-preserving pretty-printing**: JSON chunks are indented without
//!   reordering keys
//! - **Token usage**: extracted from whichever shape the provider reports
//! - **Timing**: request preparation, provider latency, first-chunk latency
//!   and total time per request
//!
//! ## Pipeline
//!
//! ```text
//!                        ┌──────────────┐
//!  upstream body ───────>│ LineSplitter │
//!                        └──────┬───────┘
//!                               │ line
//!             ┌─────────────────┼──────────────────┬───────────────┐
//!             v                 v                  v               v
//!        client frame    FormatDetector      UsageTracker    pretty_print
//!                        (text deltas)      (last "usage")   (diagnostics)
//!                                                  │
//!  end of stream ──> RequestTiming::summary ──> TIMING SUMMARY + USAGE SUMMARY
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use chat_relay::{ApiKey, Config, ProxyServer};
//!
//! let config = Config::load(None)?;
//! let api_key = ApiKey::resolve(None)?; // OPENAI_API_KEY
//! ProxyServer::new(config, api_key)?.run().await?;
//! ```
//!
//! ### Diagnostics Helpers
//!
//! ```rust
//! use chat_relay::{detect, extract_usage, pretty_print};
//!
//! let chunk = br#"{"choices":[{"delta":{"content":"Hi"}}]}"#;
//! assert_eq!(detect(chunk), "Hi");
//!
//! assert_eq!(pretty_print(r#"{"b":1,"a":2}"#), "{\n  \"b\": 1,\n  \"a\": 2\n}");
//!
//! let usage = extract_usage(
//!     br#"{"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#,
//! )
//! .unwrap();
//! assert_eq!(usage.total_tokens, 15);
//! ```
//!
//! ## Modules
//!
//! - [`proxy`]: HTTP server (Axum-based) and request forwarding
//! - [`relay`]: Line-by-line streaming relay
//! - [`detect`]: Provider wire-schema detection
//! - [`pretty`]: Order-preserving JSON formatter
//! - [`usage`]: Token usage extraction
//! - [`timing`]: Per-request timing checkpoints
//! - [`diagnostics`]: Console rendering and sinks
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod config;
pub mod detect;
pub mod diagnostics;
pub mod error;
pub mod pretty;
pub mod proxy;
pub mod relay;
pub mod timing;
pub mod usage;

// Re-exports for convenience
pub use config::{ApiKey, Config};
pub use detect::{detect, FormatDetector, SchemaProbe};
pub use diagnostics::{DiagnosticSink, Diagnostics, MemorySink, Palette};
pub use error::{RelayError, Result};
pub use pretty::pretty_print;
pub use proxy::ProxyServer;
pub use relay::{RelayEnd, RelayOptions, RelayReport, StreamRelay};
pub use timing::{Checkpoint, RequestTiming, TimingSummary};
pub use usage::{extract_usage, TokenUsage};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
