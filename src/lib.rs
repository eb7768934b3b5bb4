//! # NexusNitro Gateway (nnGW)
//!
//! A multi-backend LLM gateway. Callers speak the OpenAI chat-completions
//! dialect; requests are translated into a canonical form, admitted against
//! per-client rate limits and quotas, and forwarded to Gemini, Anthropic,
//! OpenAI, Azure OpenAI or vLLM. Streaming answers are translated back into
//! OpenAI-style server-sent events.
//!
//! ## Architecture
//!
//! - [`core`] - canonical request model, clock and HTTP client factory
//! - [`adapters`] - per-family wire translation and upstream calls
//! - [`registry`] - named backends built once at startup
//! - [`streaming`] - upstream stream lines to ordered stream events
//! - [`tools`] - streamed tool-call reassembly
//! - [`clients`] - client records, key hashing and the cached resolver
//! - [`admission`] - fixed-window rate limits, quotas and output clamp
//! - [`gateway`] - the per-request orchestrator
//! - [`usage`] - usage records and their sinks
//! - [`error`] - the caller-facing error taxonomy
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nexus_nitro_gateway::{
//!     admission::AdmissionGate,
//!     clients::{Client, ClientResolver, InMemoryClientStore},
//!     config::ProviderConfig,
//!     core::SystemClock,
//!     usage::TracingUsageLogger,
//!     Gateway, ProviderRegistry,
//! };
//! use std::{sync::Arc, time::Duration};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = ProviderRegistry::build(vec![
//!     ProviderConfig::new("local", "vllm", "http://localhost:8000", "llama"),
//! ])?;
//!
//! let mut store = InMemoryClientStore::new();
//! store.insert("salt", "sk-local", Client::new("acme", "local"));
//!
//! let clock = Arc::new(SystemClock);
//! let resolver = ClientResolver::new(Arc::new(store), "salt", Duration::from_secs(300), clock.clone());
//! let gate = Arc::new(AdmissionGate::new(clock, Duration::from_secs(86_400)));
//! let gateway = Gateway::new(resolver, gate, Arc::new(registry), Arc::new(TracingUsageLogger));
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod admission;
pub mod clients;
pub mod config;
pub mod core;
pub mod error;
pub mod gateway;
pub mod graceful_shutdown;
pub mod registry;
pub mod schemas;
pub mod streaming;
pub mod tools;
pub mod usage;

#[cfg(feature = "server")]
pub mod server;

pub use adapters::{Adapter, AdapterTrait, ProviderKind};
pub use config::{Config, ProviderConfig};
pub use error::GatewayError;
pub use gateway::{CompletionStream, Gateway};
pub use graceful_shutdown::GracefulShutdown;
pub use registry::ProviderRegistry;
pub use schemas::{ChatCompletionRequest, ChatCompletionResponse, Message};

#[cfg(feature = "server")]
pub use server::{create_router, AppState};

/// The result type used throughout the library
pub type Result<T> = std::result::Result<T, GatewayError>;
