//! # Streaming Module
//!
//! Incremental translation of upstream event streams into canonical events,
//! and their OpenAI-compatible SSE rendering.
//!
//! ## Key Features:
//! - Pull-based translation with backpressure from the caller
//! - Tool-call fragment reassembly across frames
//! - Usage accounting on completion, failure and caller disconnect

pub mod core;
#[cfg(feature = "server")]
pub mod sse;
pub mod translator;

pub use self::core::{
    CompletionHook, StreamEvent, StreamOutcome, StreamPhase, StreamSummary, StreamingState,
};
#[cfg(feature = "server")]
pub use sse::{to_sse, StreamingResponse};
pub use translator::StreamTranslator;
