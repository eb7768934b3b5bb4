//! # Tools Module
//!
//! Tool-call plumbing shared by every backend family. Declarations and
//! arguments stay opaque JSON; only the adapters reshape them for the wire.

pub mod accumulator;

pub use accumulator::ToolCallAccumulator;
pub use crate::core::canonical::{Tool, ToolCall};
