//! # Core Infrastructure
//!
//! Provider-neutral building blocks shared by the adapters, the admission
//! gate and the orchestrator.

pub mod canonical;
pub mod clock;
pub mod http_client;

pub use canonical::{ChatMessage, ChatRequest, Role, Tool, ToolCall};
pub use clock::{Clock, ManualClock, SystemClock};
