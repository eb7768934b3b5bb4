//! # Core Streaming Types
//!
//! Events the translator emits and the summary it hands to accounting when
//! a stream ends, however it ends.

use crate::{core::canonical::ToolCall, error::GatewayError, schemas::Usage};
use uuid::Uuid;

/// Per-stream identity and sequence counter.
#[derive(Debug, Clone)]
pub struct StreamingState {
    /// Unique request identifier, shared by every event of the stream
    pub request_id: String,
    pub model: String,
    seq: u64,
}

impl StreamingState {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            request_id: format!("chatcmpl-{}", Uuid::new_v4().simple()),
            model: model.into(),
            seq: 0,
        }
    }

    /// Get the next sequence index and increment
    pub fn next_seq(&mut self) -> u64 {
        let seq = self.seq;
        self.seq += 1;
        seq
    }

    pub fn emitted(&self) -> u64 {
        self.seq
    }
}

/// Lifecycle of one in-flight stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Opened,
    Draining,
    Completed,
    Aborted,
}

impl StreamPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, StreamPhase::Completed | StreamPhase::Aborted)
    }
}

/// Canonical streamed event. `seq` increases by one per event so a caller
/// can restore order.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Delta {
        request_id: String,
        seq: u64,
        text: String,
    },
    Finished {
        request_id: String,
        seq: u64,
        usage: Usage,
        finish_reason: String,
        tool_calls: Vec<ToolCall>,
    },
    Error {
        request_id: String,
        seq: u64,
        error: GatewayError,
        usage: Usage,
    },
}

impl StreamEvent {
    pub fn seq(&self) -> u64 {
        match self {
            StreamEvent::Delta { seq, .. }
            | StreamEvent::Finished { seq, .. }
            | StreamEvent::Error { seq, .. } => *seq,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Delta { .. })
    }
}

/// How a stream ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    Completed,
    Failed(GatewayError),
    /// The caller went away before the upstream finished.
    Cancelled,
}

/// What was produced before the stream ended, for usage accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSummary {
    pub request_id: String,
    pub usage: Usage,
    pub text_chars: usize,
    pub tool_calls: usize,
    pub outcome: StreamOutcome,
}

/// Invoked exactly once per stream with its summary.
pub type CompletionHook = Box<dyn FnOnce(StreamSummary) + Send + 'static>;
