//! Provider-agnostic detection of streamed text deltas.
//!
//! Upstream providers emit heterogeneous, partially overlapping JSON shapes on
//! the same logical stream. Rather than requiring an explicit provider tag, the
//! detector tries an ordered list of probes, each of which deserializes the
//! fragment against its own shape. The first probe that yields non-empty text
//! wins.
//!
//! # Supported shapes
//!
//! | Probe        | Shape                                                             |
//! |--------------|-------------------------------------------------------------------|
//! | `chat_delta` | `{"choices":[{"delta":{"content":"..."}}]}`                       |
//! | `anthropic`  | `{"type":"content_block_delta","delta":{"type":"text_delta","text":"..."}}` |
//! | `responses`  | `{"type":"response.output_text.delta","delta":"..."}`             |

use serde::Deserialize;

/// A single wire-schema matcher.
pub trait SchemaProbe: Send + Sync {
    /// Short name of the schema, used in debug logs
    fn name(&self) -> &'static str;

    /// Extract non-empty text from `fragment`, or `None` if the fragment does
    /// not match this schema.
    fn extract(&self, fragment: &[u8]) -> Option<String>;
}

/// Chat-completions streaming delta.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatDeltaProbe;

#[derive(Deserialize)]
struct ChatChunk {
    choices: Option<Vec<ChatChoice>>,
}

#[derive(Deserialize)]
struct ChatChoice {
    delta: Option<ChatDelta>,
}

#[derive(Deserialize)]
struct ChatDelta {
    content: Option<String>,
}

impl SchemaProbe for ChatDeltaProbe {
    fn name(&self) -> &'static str {
        "chat_delta"
    }

    fn extract(&self, fragment: &[u8]) -> Option<String> {
        let chunk: ChatChunk = serde_json::from_slice(fragment).ok()?;
        // Only the first choice carries the primary text
        let content = chunk.choices?.into_iter().next()?.delta?.content?;
        non_empty(content)
    }
}

/// Anthropic messages `content_block_delta` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicProbe;

const CONTENT_BLOCK_DELTA: &str = "content_block_delta";
const TEXT_DELTA: &str = "text_delta";

#[derive(Deserialize)]
struct AnthropicEvent {
    #[serde(rename = "type")]
    kind: Option<String>,
    delta: Option<AnthropicDelta>,
}

#[derive(Deserialize)]
struct AnthropicDelta {
    #[serde(rename = "type")]
    kind: Option<String>,
    text: Option<String>,
}

impl SchemaProbe for AnthropicProbe {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn extract(&self, fragment: &[u8]) -> Option<String> {
        let event: AnthropicEvent = serde_json::from_slice(fragment).ok()?;
        if event.kind.as_deref() != Some(CONTENT_BLOCK_DELTA) {
            return None;
        }
        let delta = event.delta?;
        if delta.kind.as_deref() != Some(TEXT_DELTA) {
            return None;
        }
        non_empty(delta.text?)
    }
}

/// Responses API `response.output_text.delta` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponsesProbe;

const OUTPUT_TEXT_DELTA: &str = "response.output_text.delta";

#[derive(Deserialize)]
struct ResponsesEvent {
    #[serde(rename = "type")]
    kind: Option<String>,
    delta: Option<String>,
}

impl SchemaProbe for ResponsesProbe {
    fn name(&self) -> &'static str {
        "responses"
    }

    fn extract(&self, fragment: &[u8]) -> Option<String> {
        let event: ResponsesEvent = serde_json::from_slice(fragment).ok()?;
        if event.kind.as_deref() != Some(OUTPUT_TEXT_DELTA) {
            return None;
        }
        non_empty(event.delta?)
    }
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// A successful detection: the text and the probe that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// Name of the matching schema
    pub schema: &'static str,
    /// Incremental assistant-visible text
    pub text: String,
}

/// Ordered list of schema probes.
pub struct FormatDetector {
    probes: Vec<Box<dyn SchemaProbe>>,
}

impl Default for FormatDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatDetector {
    /// Detector with the built-in probes in priority order: chat delta,
    /// Anthropic, Responses API.
    pub fn new() -> Self {
        Self {
            probes: vec![
                Box::new(ChatDeltaProbe),
                Box::new(AnthropicProbe),
                Box::new(ResponsesProbe),
            ],
        }
    }

    /// Detector with no probes; every fragment yields no text
    pub fn empty() -> Self {
        Self { probes: Vec::new() }
    }

    /// Append a probe, tried after all existing ones
    pub fn with_probe(mut self, probe: impl SchemaProbe + 'static) -> Self {
        self.probes.push(Box::new(probe));
        self
    }

    /// Names of the registered probes, in priority order
    pub fn probe_names(&self) -> Vec<&'static str> {
        self.probes.iter().map(|p| p.name()).collect()
    }

    /// Run the probes in order and return the first match
    pub fn detect_with_schema(&self, fragment: &[u8]) -> Option<Detection> {
        self.probes.iter().find_map(|probe| {
            probe.extract(fragment).map(|text| Detection {
                schema: probe.name(),
                text,
            })
        })
    }

    /// Extract the text delta from `fragment`.
    ///
    /// Returns an empty string when nothing matches; malformed input is never
    /// an error.
    pub fn detect(&self, fragment: &[u8]) -> String {
        self.detect_with_schema(fragment)
            .map(|d| d.text)
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for FormatDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatDetector")
            .field("probes", &self.probe_names())
            .finish()
    }
}

/// Extract text with the default probe order
pub fn detect(fragment: &[u8]) -> String {
    FormatDetector::new().detect(fragment)
}
