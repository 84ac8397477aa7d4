//! Token usage extraction from upstream response payloads.
//!
//! Providers report token accounting under different shapes and usually only
//! on a terminal chunk. [`extract_usage`] looks in these places, in order:
//!
//! 1. top-level `usage` with `prompt_tokens`, `completion_tokens` and
//!    `total_tokens`
//! 2. if any `choices[*].finish_reason` is non-empty, top-level `usage` again,
//!    accepting `input_tokens`/`output_tokens` naming and a missing total
//! 3. top-level `usage` in `input_tokens`/`output_tokens` naming (Anthropic
//!    `message_delta`)
//! 4. `response.usage` (Responses API `response.completed`)
//! 5. `message.usage` (Anthropic `message_start`)
//!
//! Counts are JSON numbers and are truncated to integers. Anything that fails
//! to parse is reported as "not found".

use serde_json::{Map, Value};

use crate::error::Result;
use crate::relay::strip_data_prefix;

/// Token accounting for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct TokenUsage {
    /// Prompt (input) tokens
    pub prompt_tokens: u64,
    /// Completion (output) tokens
    pub completion_tokens: u64,
    /// Total tokens as reported by the provider
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Whether `total_tokens == prompt_tokens + completion_tokens`.
    ///
    /// Not enforced; providers occasionally count cached or reasoning tokens
    /// differently.
    pub fn is_consistent(&self) -> bool {
        self.prompt_tokens.checked_add(self.completion_tokens) == Some(self.total_tokens)
    }
}

/// Extract token usage from a raw payload, with or without a `data: ` prefix.
///
/// Returns `None` when no known usage shape is present or the payload is not
/// a JSON object.
pub fn extract_usage(raw: &[u8]) -> Option<TokenUsage> {
    match try_extract_usage(raw) {
        Ok(usage) => usage,
        Err(e) => {
            tracing::debug!("Failed to parse usage info: {}", e);
            None
        },
    }
}

/// Like [`extract_usage`], but reports a payload that is not a JSON object as
/// an error instead of "not found".
pub fn try_extract_usage(raw: &[u8]) -> Result<Option<TokenUsage>> {
    let json = strip_data_prefix(raw).unwrap_or(raw);
    let object: Map<String, Value> = serde_json::from_slice(json)?;

    let Some(usage) = find_usage(&object) else {
        return Ok(None);
    };
    if !usage.is_consistent() {
        tracing::warn!(
            prompt = usage.prompt_tokens,
            completion = usage.completion_tokens,
            total = usage.total_tokens,
            "Provider reported inconsistent token totals"
        );
    }
    Ok(Some(usage))
}

fn find_usage(object: &Map<String, Value>) -> Option<TokenUsage> {
    let top = object.get("usage").and_then(Value::as_object);

    if let Some(usage) = top.and_then(chat_counts) {
        return Some(usage);
    }

    if has_terminal_choice(object) {
        if let Some(usage) = top.and_then(lenient_counts) {
            return Some(usage);
        }
    }

    if let Some(usage) = top.and_then(input_output_counts) {
        return Some(usage);
    }

    ["response", "message"].iter().find_map(|key| {
        object
            .get(*key)?
            .get("usage")?
            .as_object()
            .and_then(lenient_counts)
    })
}

fn has_terminal_choice(object: &Map<String, Value>) -> bool {
    object
        .get("choices")
        .and_then(Value::as_array)
        .is_some_and(|choices| {
            choices.iter().any(|choice| {
                choice
                    .get("finish_reason")
                    .and_then(Value::as_str)
                    .is_some_and(|reason| !reason.is_empty())
            })
        })
}

fn count(usage: &Map<String, Value>, key: &str) -> Option<u64> {
    let n = usage.get(key)?.as_f64()?;
    if n.is_finite() && n >= 0.0 {
        Some(n.trunc() as u64)
    } else {
        None
    }
}

/// All three chat-completions counters present.
fn chat_counts(usage: &Map<String, Value>) -> Option<TokenUsage> {
    Some(TokenUsage {
        prompt_tokens: count(usage, "prompt_tokens")?,
        completion_tokens: count(usage, "completion_tokens")?,
        total_tokens: count(usage, "total_tokens")?,
    })
}

/// `input_tokens`/`output_tokens`, total derived when absent.
fn input_output_counts(usage: &Map<String, Value>) -> Option<TokenUsage> {
    let prompt_tokens = count(usage, "input_tokens")?;
    let completion_tokens = count(usage, "output_tokens")?;
    Some(TokenUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens: count(usage, "total_tokens")
            .unwrap_or_else(|| prompt_tokens.saturating_add(completion_tokens)),
    })
}

/// Either naming, total derived when absent.
fn lenient_counts(usage: &Map<String, Value>) -> Option<TokenUsage> {
    if let (Some(prompt_tokens), Some(completion_tokens)) = (
        count(usage, "prompt_tokens"),
        count(usage, "completion_tokens"),
    ) {
        return Some(TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: count(usage, "total_tokens")
                .unwrap_or_else(|| prompt_tokens.saturating_add(completion_tokens)),
        });
    }
    input_output_counts(usage)
}

/// Keeps the most recent line that mentions `usage`.
///
/// Only one candidate is retained per request; it is parsed once, after the
/// stream ends.
#[derive(Debug, Default)]
pub struct UsageTracker {
    candidate: Option<Vec<u8>>,
}

impl UsageTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a line; it replaces the previous candidate if it contains the
    /// substring `usage`.
    pub fn observe(&mut self, line: &[u8]) {
        if contains(line, b"usage") {
            self.candidate = Some(line.to_vec());
        }
    }

    /// Whether a candidate line has been seen
    pub fn has_candidate(&self) -> bool {
        self.candidate.is_some()
    }

    /// Parse the retained candidate.
    ///
    /// `Ok(None)` when no candidate was seen or it carries no known usage
    /// shape; an error when the candidate is not a JSON object.
    pub fn finish(&self) -> Result<Option<TokenUsage>> {
        match self.candidate.as_deref() {
            Some(line) => try_extract_usage(line),
            None => Ok(None),
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
