//! Human-readable diagnostic output.
//!
//! Rendering is kept separate from output: the `render_*` functions build
//! colorized text blocks and a [`DiagnosticSink`] decides where they go. The
//! console sink writes to stdout; [`MemorySink`] captures blocks in memory.
//!
//! This output is for people watching the proxy. Operational events go through
//! `tracing` instead.

use std::fmt::Write as _;
use std::io::Write as _;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::pretty::pretty_print_bytes;
use crate::timing::TimingSummary;
use crate::usage::TokenUsage;

/// Destination for rendered diagnostic blocks.
pub trait DiagnosticSink: Send + Sync {
    /// Emit one block; the block carries its own trailing newline
    fn emit(&self, block: &str);
}

/// Writes blocks to stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleSink;

impl DiagnosticSink for ConsoleSink {
    fn emit(&self, block: &str) {
        let mut stdout = std::io::stdout().lock();
        // Diagnostics never affect the forwarding path
        let _ = stdout.write_all(block.as_bytes());
        let _ = stdout.flush();
    }
}

/// Collects blocks in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    blocks: Mutex<Vec<String>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks emitted so far
    pub fn blocks(&self) -> Vec<String> {
        self.blocks.lock().map(|b| b.clone()).unwrap_or_default()
    }

    /// All blocks concatenated
    pub fn contents(&self) -> String {
        self.blocks().concat()
    }
}

impl DiagnosticSink for MemorySink {
    fn emit(&self, block: &str) {
        if let Ok(mut blocks) = self.blocks.lock() {
            blocks.push(block.to_string());
        }
    }
}

/// ANSI color codes, or empty strings when color is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    enabled: bool,
}

impl Palette {
    /// Palette with colors on or off
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Colorless palette
    pub fn plain() -> Self {
        Self::new(false)
    }

    fn code(&self, code: &'static str) -> &'static str {
        if self.enabled {
            code
        } else {
            ""
        }
    }

    fn reset(&self) -> &'static str {
        self.code("\x1b[0m")
    }
    fn red(&self) -> &'static str {
        self.code("\x1b[31m")
    }
    fn green(&self) -> &'static str {
        self.code("\x1b[32m")
    }
    fn yellow(&self) -> &'static str {
        self.code("\x1b[33m")
    }
    fn blue(&self) -> &'static str {
        self.code("\x1b[34m")
    }
    fn cyan(&self) -> &'static str {
        self.code("\x1b[36m")
    }
    fn bold(&self) -> &'static str {
        self.code("\x1b[1m")
    }
}

/// Render one forwarded data payload (without its `data: ` prefix).
pub fn render_chunk(palette: Palette, payload: &[u8], pretty: bool) -> String {
    let body = if pretty {
        pretty_print_bytes(payload)
    } else {
        String::from_utf8_lossy(payload).into_owned()
    };
    format!("{}data: {}{}\n\n", palette.cyan(), body, palette.reset())
}

/// Render the token usage block.
pub fn render_usage(palette: Palette, usage: &TokenUsage) -> String {
    let (b, g, r) = (palette.bold(), palette.green(), palette.reset());
    let mut out = String::new();
    let _ = writeln!(out, "\n{b}{g}============= TOKEN USAGE SUMMARY =============={r}");
    let _ = writeln!(out, "{g}• Input tokens:  {}{r}", usage.prompt_tokens);
    let _ = writeln!(out, "{g}• Output tokens: {}{r}", usage.completion_tokens);
    let _ = writeln!(out, "{g}• Total tokens:  {}{r}", usage.total_tokens);
    let _ = writeln!(out, "{b}{g}================================================={r}");
    out
}

fn render_metric(
    out: &mut String,
    palette: Palette,
    emphasis: &str,
    label: &str,
    value: Duration,
    starts: &str,
    ends: &str,
) {
    let (c, r) = (palette.cyan(), palette.reset());
    let _ = writeln!(out, "{emphasis}• {label}: {value:?}{r}");
    let _ = writeln!(out, "  ↳ {c}Starts:{r} {starts}");
    let _ = writeln!(out, "  ↳ {c}Ends:{r} {ends}");
}

/// Render the timing block. Metrics that could not be derived are omitted.
pub fn render_timing(palette: Palette, summary: &TimingSummary) -> String {
    let (b, bl, g, r) = (palette.bold(), palette.blue(), palette.green(), palette.reset());
    let kind = if summary.streaming {
        "streaming"
    } else {
        "non-streaming"
    };

    let mut out = String::new();
    let _ = writeln!(
        out,
        "\n{b}{bl}======== TIMING SUMMARY ({kind} request) ========{r}"
    );
    let _ = writeln!(
        out,
        "  received at {}",
        summary.received_at.format("%Y-%m-%d %H:%M:%S%.3f UTC")
    );

    if let Some(d) = summary.request_prep {
        render_metric(
            &mut out,
            palette,
            g,
            "Request preparation",
            d,
            "Creating the request to forward to provider",
            "Request fully prepared with headers and body",
        );
    }
    if let Some(d) = summary.provider_response {
        render_metric(
            &mut out,
            palette,
            g,
            "Provider initial response",
            d,
            "Sending request to provider API",
            "First response headers received from provider",
        );
    }
    if let Some(d) = summary.first_chunk {
        render_metric(
            &mut out,
            palette,
            g,
            "First content chunk latency",
            d,
            "Initial request received by proxy",
            "First content chunk received from provider",
        );
    }
    if let Some(d) = summary.total {
        render_metric(
            &mut out,
            palette,
            b,
            "Total request time",
            d,
            "Initial request received by proxy",
            "Complete response finished processing",
        );
    }

    let _ = writeln!(out, "{b}{bl}================================================={r}\n");
    out
}

/// Render the accumulated assistant text.
pub fn render_accumulated(palette: Palette, text: &str) -> String {
    let (b, y, r) = (palette.bold(), palette.yellow(), palette.reset());
    let rule = "===========================================================";
    let mut out = String::new();
    let _ = writeln!(out, "\n{b}{y}{rule}{r}");
    let _ = writeln!(out, "{b}{y}Accumulated Text Response{r}");
    let _ = writeln!(out, "{b}{y}{rule}{r}");
    let _ = writeln!(out, "{text}");
    let _ = writeln!(out, "{y}{rule}{r}");
    out
}

/// Render a one-line warning.
pub fn render_warning(palette: Palette, message: &str) -> String {
    format!("{}{}{}\n", palette.red(), message, palette.reset())
}

/// Renders blocks with a palette and hands them to a sink.
#[derive(Clone)]
pub struct Diagnostics {
    sink: Arc<dyn DiagnosticSink>,
    palette: Palette,
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostics")
            .field("palette", &self.palette)
            .finish_non_exhaustive()
    }
}

impl Diagnostics {
    /// Diagnostics writing to `sink`
    pub fn new(sink: Arc<dyn DiagnosticSink>, palette: Palette) -> Self {
        Self { sink, palette }
    }

    /// Colorized diagnostics on stdout
    pub fn console(color: bool) -> Self {
        Self::new(Arc::new(ConsoleSink), Palette::new(color))
    }

    /// Forwarded data payload
    pub fn chunk(&self, payload: &[u8], pretty: bool) {
        self.sink.emit(&render_chunk(self.palette, payload, pretty));
    }

    /// Header line for a response
    pub fn response_header(&self, status: u16, streaming: bool) {
        let (b, bl, r) = (self.palette.bold(), self.palette.blue(), self.palette.reset());
        let kind = if streaming { "streaming" } else { "non-streaming" };
        self.sink
            .emit(&format!("{b}{bl}Response from provider ({status}, {kind}):{r}\n"));
    }

    /// Token usage summary
    pub fn usage(&self, usage: &TokenUsage) {
        self.sink.emit(&render_usage(self.palette, usage));
    }

    /// Timing summary
    pub fn timing(&self, summary: &TimingSummary) {
        self.sink.emit(&render_timing(self.palette, summary));
    }

    /// Accumulated text
    pub fn accumulated(&self, text: &str) {
        self.sink.emit(&render_accumulated(self.palette, text));
    }

    /// Warning line
    pub fn warning(&self, message: &str) {
        self.sink.emit(&render_warning(self.palette, message));
    }
}
