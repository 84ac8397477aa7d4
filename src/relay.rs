//! Line-by-line SSE relay with diagnostics.
//!
//! The relay owns the upstream body for the lifetime of one request. Each
//! newline-delimited line is forwarded to the client as its own body frame
//! before the next read, so the client observes lines in upstream order with
//! no batching. Diagnostics are derived from the same line afterwards and can
//! never affect what the client receives.
//!
//! ```text
//! upstream bytes ──> LineSplitter ──> line ──┬──> client (line + "\n", one frame)
//!                                            ├──> FormatDetector (accumulated text)
//!                                            ├──> UsageTracker (last "usage" line)
//!                                            └──> Diagnostics (pretty-printed copy)
//!
//! end of input ──> Completion checkpoint ──> usage summary ──> timing summary
//! ```

use std::fmt::Display;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::{Stream, StreamExt};
use tokio::sync::mpsc;

use crate::config::DiagnosticsConfig;
use crate::detect::FormatDetector;
use crate::diagnostics::Diagnostics;
use crate::error::{RelayError, Result};
use crate::timing::{Checkpoint, RequestTiming};
use crate::usage::{extract_usage, TokenUsage, UsageTracker};

/// SSE data field prefix
pub const DATA_PREFIX: &[u8] = b"data: ";

/// Payload of an SSE data line, if `line` is one.
pub fn strip_data_prefix(line: &[u8]) -> Option<&[u8]> {
    line.strip_prefix(DATA_PREFIX)
}

/// Frames sent to the client body
pub type ClientFrame = std::result::Result<Bytes, std::io::Error>;

/// Splits an incrementally-arriving byte stream into lines.
///
/// Lines are returned without their `\n` terminator; a trailing `\r` is
/// dropped as well.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: BytesMut,
    // Prefix of `pending` already known to hold no newline
    scanned: usize,
}

impl LineSplitter {
    /// Create an empty splitter
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every line it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(offset) = self.pending[self.scanned..].iter().position(|b| *b == b'\n') {
            let pos = self.scanned + offset;
            let mut line = self.pending.split_to(pos + 1);
            self.scanned = 0;
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(pos - 1);
            }
            lines.push(line.freeze());
        }
        self.scanned = self.pending.len();
        lines
    }

    /// Bytes received after the last newline
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Final unterminated line, if any
    pub fn finish(self) -> Option<Bytes> {
        let mut rest = self.pending;
        if rest.last() == Some(&b'\r') {
            rest.truncate(rest.len() - 1);
        }
        if rest.is_empty() {
            None
        } else {
            Some(rest.freeze())
        }
    }
}

/// Per-relay behavior switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOptions {
    /// Concatenate detected text and print it after the timing summary
    pub accumulate_text: bool,
    /// Pretty-print data payloads in diagnostics (raw echo otherwise)
    pub pretty_print: bool,
    /// Forward blank lines as bare newlines instead of dropping them
    pub preserve_blank_lines: bool,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self::from(&DiagnosticsConfig::default())
    }
}

impl From<&DiagnosticsConfig> for RelayOptions {
    fn from(config: &DiagnosticsConfig) -> Self {
        Self {
            accumulate_text: config.accumulate_text,
            pretty_print: config.pretty_print,
            preserve_blank_lines: config.preserve_blank_lines,
        }
    }
}

/// Why the relay loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEnd {
    /// Upstream reached end of input
    Completed,
    /// Reading the upstream body failed; already-forwarded lines stand
    UpstreamError(String),
    /// The client stopped accepting frames
    ClientDisconnected,
}

/// Outcome of one relayed stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReport {
    /// Why the loop stopped
    pub end: RelayEnd,
    /// Lines read from upstream
    pub lines_read: usize,
    /// Lines forwarded to the client
    pub lines_forwarded: usize,
    /// Usage parsed from the last line mentioning `usage`
    pub usage: Option<TokenUsage>,
    /// Accumulated text, when enabled
    pub text: Option<String>,
}

#[derive(Default)]
struct LoopState {
    usage: UsageTracker,
    text: String,
    lines_read: usize,
    lines_forwarded: usize,
}

/// Streaming relay orchestrator.
///
/// Holds only immutable per-process pieces; all per-request state lives in
/// [`StreamRelay::run`] and the caller's [`RequestTiming`].
#[derive(Debug, Clone)]
pub struct StreamRelay {
    options: RelayOptions,
    detector: Arc<FormatDetector>,
    diagnostics: Diagnostics,
}

impl StreamRelay {
    /// Create a relay with explicit options
    pub fn new(options: RelayOptions, detector: Arc<FormatDetector>, diagnostics: Diagnostics) -> Self {
        Self {
            options,
            detector,
            diagnostics,
        }
    }

    /// Relay options
    pub fn options(&self) -> RelayOptions {
        self.options
    }

    /// Diagnostics handle
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Relay `upstream` to `client` line by line, then emit the usage and
    /// timing summaries.
    pub async fn run<S, E>(
        &self,
        upstream: S,
        client: &mpsc::Sender<ClientFrame>,
        timing: &mut RequestTiming,
    ) -> RelayReport
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: Display,
    {
        let mut state = LoopState::default();
        let end = self.pump(upstream, client, timing, &mut state).await;

        timing.mark(Checkpoint::Completion);

        match &end {
            RelayEnd::Completed => {
                tracing::debug!(lines = state.lines_read, "Upstream stream completed");
            },
            RelayEnd::UpstreamError(e) => {
                tracing::warn!(lines = state.lines_read, "Upstream read failed mid-stream: {}", e);
            },
            RelayEnd::ClientDisconnected => {
                tracing::warn!(
                    lines = state.lines_forwarded,
                    "Client disconnected while streaming"
                );
            },
        }

        let usage = match state.usage.finish() {
            Ok(usage) => usage,
            Err(e) => {
                tracing::debug!("Failed to parse usage info: {}", e);
                self.diagnostics
                    .warning(&format!("Failed to parse usage info: {e}"));
                None
            },
        };
        if let Some(usage) = &usage {
            tracing::info!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "Token usage"
            );
            self.diagnostics.usage(usage);
        } else if state.usage.has_candidate() {
            tracing::debug!("Usage line seen but no known usage shape matched");
        }

        self.diagnostics.timing(&timing.summary(true));

        let text = if self.options.accumulate_text {
            if !state.text.is_empty() {
                self.diagnostics.accumulated(&state.text);
            }
            Some(state.text)
        } else {
            None
        };

        RelayReport {
            end,
            lines_read: state.lines_read,
            lines_forwarded: state.lines_forwarded,
            usage,
            text,
        }
    }

    async fn pump<S, E>(
        &self,
        upstream: S,
        client: &mpsc::Sender<ClientFrame>,
        timing: &mut RequestTiming,
        state: &mut LoopState,
    ) -> RelayEnd
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: Display,
    {
        futures::pin_mut!(upstream);
        let mut splitter = LineSplitter::new();

        loop {
            match upstream.next().await {
                Some(Ok(chunk)) => {
                    for line in splitter.push(&chunk) {
                        if self.process_line(&line, client, timing, state).await.is_err() {
                            return RelayEnd::ClientDisconnected;
                        }
                    }
                },
                Some(Err(e)) => {
                    if !splitter.pending().is_empty() {
                        tracing::debug!(
                            bytes = splitter.pending().len(),
                            "Discarding partial line after read error"
                        );
                    }
                    return RelayEnd::UpstreamError(e.to_string());
                },
                None => {
                    if let Some(line) = splitter.finish() {
                        if self.process_line(&line, client, timing, state).await.is_err() {
                            return RelayEnd::ClientDisconnected;
                        }
                    }
                    return RelayEnd::Completed;
                },
            }
        }
    }

    async fn process_line(
        &self,
        line: &[u8],
        client: &mpsc::Sender<ClientFrame>,
        timing: &mut RequestTiming,
        state: &mut LoopState,
    ) -> Result<()> {
        timing.mark_once(Checkpoint::FirstChunk);
        state.lines_read += 1;

        if line.is_empty() {
            if self.options.preserve_blank_lines {
                forward(client, line).await?;
                state.lines_forwarded += 1;
            }
            return Ok(());
        }

        forward(client, line).await?;
        state.lines_forwarded += 1;

        let Some(payload) = strip_data_prefix(line) else {
            return Ok(());
        };

        if self.options.accumulate_text {
            if let Some(detection) = self.detector.detect_with_schema(payload) {
                tracing::trace!(schema = detection.schema, "Detected text delta");
                state.text.push_str(&detection.text);
            }
        }

        state.usage.observe(line);
        self.diagnostics.chunk(payload, self.options.pretty_print);

        Ok(())
    }

    /// Diagnostics for a buffered (non-streaming) response body.
    pub fn summarize_buffered(&self, body: &[u8], timing: &mut RequestTiming) -> Option<TokenUsage> {
        timing.mark(Checkpoint::Completion);

        self.diagnostics.chunk(body, self.options.pretty_print);

        let usage = extract_usage(body);
        if let Some(usage) = &usage {
            tracing::info!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "Token usage"
            );
            self.diagnostics.usage(usage);
        }

        self.diagnostics.timing(&timing.summary(false));
        usage
    }
}

/// Send `line` plus a newline as a single frame.
async fn forward(client: &mpsc::Sender<ClientFrame>, line: &[u8]) -> Result<()> {
    let mut frame = BytesMut::with_capacity(line.len() + 1);
    frame.extend_from_slice(line);
    frame.put_u8(b'\n');

    client
        .send(Ok(frame.freeze()))
        .await
        .map_err(|_| RelayError::ClientDisconnected)
}
