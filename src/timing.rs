//! Per-request timing checkpoints.
//!
//! A [`RequestTiming`] is created when a request arrives and is owned by the
//! task handling that request; pipeline stages receive it by `&mut`. Unset
//! checkpoints stay `None` and suppress every interval that depends on them.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Named pipeline checkpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    /// Request entered the handler
    RequestStart,
    /// Building the upstream request began
    RequestPrepStart,
    /// Upstream request fully built
    RequestPrepEnd,
    /// Upstream request sent
    ProviderCallStart,
    /// Upstream response headers received
    ProviderResponseEnd,
    /// First line read from the upstream stream (streaming only)
    FirstChunk,
    /// Response fully relayed
    Completion,
}

/// Timestamps for one request.
#[derive(Debug, Clone)]
pub struct RequestTiming {
    received_at: DateTime<Utc>,
    request_start: Option<Instant>,
    request_prep_start: Option<Instant>,
    request_prep_end: Option<Instant>,
    provider_call_start: Option<Instant>,
    provider_response_end: Option<Instant>,
    first_chunk: Option<Instant>,
    completion: Option<Instant>,
}

impl Default for RequestTiming {
    fn default() -> Self {
        Self::unstarted()
    }
}

impl RequestTiming {
    /// Start timing now
    pub fn start() -> Self {
        let mut timing = Self::unstarted();
        timing.mark(Checkpoint::RequestStart);
        timing
    }

    /// A recorder with no checkpoint set
    pub fn unstarted() -> Self {
        Self {
            received_at: Utc::now(),
            request_start: None,
            request_prep_start: None,
            request_prep_end: None,
            provider_call_start: None,
            provider_response_end: None,
            first_chunk: None,
            completion: None,
        }
    }

    /// Wall-clock time the request was received
    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Record `checkpoint` as now
    pub fn mark(&mut self, checkpoint: Checkpoint) {
        self.mark_at(checkpoint, Instant::now());
    }

    /// Record `checkpoint` at an explicit instant
    pub fn mark_at(&mut self, checkpoint: Checkpoint, at: Instant) {
        *self.slot(checkpoint) = Some(at);
    }

    /// Record `checkpoint` as now unless already set
    pub fn mark_once(&mut self, checkpoint: Checkpoint) {
        let slot = self.slot(checkpoint);
        if slot.is_none() {
            *slot = Some(Instant::now());
        }
    }

    /// Instant recorded for `checkpoint`, if any
    pub fn get(&self, checkpoint: Checkpoint) -> Option<Instant> {
        match checkpoint {
            Checkpoint::RequestStart => self.request_start,
            Checkpoint::RequestPrepStart => self.request_prep_start,
            Checkpoint::RequestPrepEnd => self.request_prep_end,
            Checkpoint::ProviderCallStart => self.provider_call_start,
            Checkpoint::ProviderResponseEnd => self.provider_response_end,
            Checkpoint::FirstChunk => self.first_chunk,
            Checkpoint::Completion => self.completion,
        }
    }

    /// Whether `checkpoint` has been recorded
    pub fn is_set(&self, checkpoint: Checkpoint) -> bool {
        self.get(checkpoint).is_some()
    }

    fn slot(&mut self, checkpoint: Checkpoint) -> &mut Option<Instant> {
        match checkpoint {
            Checkpoint::RequestStart => &mut self.request_start,
            Checkpoint::RequestPrepStart => &mut self.request_prep_start,
            Checkpoint::RequestPrepEnd => &mut self.request_prep_end,
            Checkpoint::ProviderCallStart => &mut self.provider_call_start,
            Checkpoint::ProviderResponseEnd => &mut self.provider_response_end,
            Checkpoint::FirstChunk => &mut self.first_chunk,
            Checkpoint::Completion => &mut self.completion,
        }
    }

    fn between(&self, from: Checkpoint, to: Checkpoint) -> Option<Duration> {
        self.get(to)?.checked_duration_since(self.get(from)?)
    }

    /// Derive the interval durations.
    ///
    /// An interval is `None` if either endpoint is unset or the endpoints are
    /// out of order. First-chunk latency is only reported for streaming
    /// requests.
    pub fn summary(&self, streaming: bool) -> TimingSummary {
        TimingSummary {
            streaming,
            received_at: self.received_at,
            request_prep: self.between(Checkpoint::RequestPrepStart, Checkpoint::RequestPrepEnd),
            provider_response: self.between(
                Checkpoint::ProviderCallStart,
                Checkpoint::ProviderResponseEnd,
            ),
            first_chunk: if streaming {
                self.between(Checkpoint::RequestStart, Checkpoint::FirstChunk)
            } else {
                None
            },
            total: self.between(Checkpoint::RequestStart, Checkpoint::Completion),
        }
    }
}

/// Derived durations for one request
#[derive(Debug, Clone, PartialEq)]
pub struct TimingSummary {
    /// Whether the request was streamed
    pub streaming: bool,
    /// Wall-clock time the request was received
    pub received_at: DateTime<Utc>,
    /// Request preparation (prep end - prep start)
    pub request_prep: Option<Duration>,
    /// Provider initial response (response end - call start)
    pub provider_response: Option<Duration>,
    /// First content chunk latency (first chunk - request start)
    pub first_chunk: Option<Duration>,
    /// Total request time (completion - request start)
    pub total: Option<Duration>,
}
