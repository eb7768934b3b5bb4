//! # Provider Adapters Module
//!
//! One adapter per upstream backend family. Each translates the canonical
//! chat request into its provider's wire protocol and parses answers,
//! stream frames and tool calls back.
//!
//! ## Supported Backends:
//!
//! - **Gemini**: Google Generative Language API
//! - **Anthropic**: Claude Messages API
//! - **OpenAI**: OpenAI API and any compatible endpoint (the fallback family)
//! - **Azure OpenAI**: Microsoft Azure OpenAI Service
//! - **vLLM**: High-throughput local inference servers

use crate::{
    config::ProviderConfig,
    core::{
        canonical::{ChatRequest, ToolCall},
        http_client::{HttpClientBuilder, HttpClientError},
    },
    error::AdapterError,
};
use std::{fmt, sync::Arc};

// Base adapter functionality
pub mod base;

// Individual adapter modules
pub mod anthropic;
pub mod azure;
pub mod gemini;
pub mod openai;
pub mod vllm;

pub use anthropic::AnthropicAdapter;
pub use azure::AzureOpenAIAdapter;
pub use gemini::GeminiAdapter;
pub use openai::OpenAIAdapter;
pub use vllm::VLLMAdapter;

pub use base::{
    AdapterTrait, AdapterUtils, EventSource, ParsedCompletion, ProbeReport, RawResponse,
    StreamChunk, StreamToolUpdate, ToolCallFragment,
};

/// Backend family named by a provider's `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Gemini,
    Anthropic,
    OpenAI,
    AzureOpenAI,
    VLLM,
}

impl ProviderKind {
    /// Unknown types fall back to the OpenAI-compatible family.
    pub fn parse(provider_type: &str) -> Self {
        match provider_type.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Self::Gemini,
            "anthropic" | "claude" => Self::Anthropic,
            "azure" | "azure-openai" | "azure_openai" => Self::AzureOpenAI,
            "vllm" | "local" | "lightllm" => Self::VLLM,
            "openai" => Self::OpenAI,
            other => {
                tracing::debug!(provider_type = other, "unknown provider type, using openai");
                Self::OpenAI
            }
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Gemini => "gemini",
            Self::Anthropic => "anthropic",
            Self::OpenAI => "openai",
            Self::AzureOpenAI => "azure",
            Self::VLLM => "vllm",
        };
        f.write_str(name)
    }
}

/// # Provider Adapter Enum
///
/// Closed set of backend families behind [`AdapterTrait`]. Adding a backend
/// means adding a variant here and a module above.
#[derive(Clone, Debug)]
pub enum Adapter {
    Gemini(GeminiAdapter),
    Anthropic(AnthropicAdapter),
    OpenAI(OpenAIAdapter),
    AzureOpenAI(AzureOpenAIAdapter),
    VLLM(VLLMAdapter),
}

impl Adapter {
    /// Factory method for creating an adapter from one provider entry
    pub fn from_config(config: ProviderConfig) -> Result<Self, HttpClientError> {
        let client = HttpClientBuilder::for_provider(&config).build()?;
        let kind = ProviderKind::parse(&config.provider_type);
        let config = Arc::new(config);

        Ok(match kind {
            ProviderKind::Gemini => Self::Gemini(GeminiAdapter::new(config, client)),
            ProviderKind::Anthropic => Self::Anthropic(AnthropicAdapter::new(config, client)),
            ProviderKind::OpenAI => Self::OpenAI(OpenAIAdapter::new(config, client)),
            ProviderKind::AzureOpenAI => Self::AzureOpenAI(AzureOpenAIAdapter::new(config, client)),
            ProviderKind::VLLM => Self::VLLM(VLLMAdapter::new(config, client)),
        })
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::Gemini(_) => ProviderKind::Gemini,
            Self::Anthropic(_) => ProviderKind::Anthropic,
            Self::OpenAI(_) => ProviderKind::OpenAI,
            Self::AzureOpenAI(_) => ProviderKind::AzureOpenAI,
            Self::VLLM(_) => ProviderKind::VLLM,
        }
    }

    pub fn as_trait(&self) -> &dyn AdapterTrait {
        match self {
            Self::Gemini(adapter) => adapter,
            Self::Anthropic(adapter) => adapter,
            Self::OpenAI(adapter) => adapter,
            Self::AzureOpenAI(adapter) => adapter,
            Self::VLLM(adapter) => adapter,
        }
    }

    /// A new adapter pointed at `base_url`, or `None` for families that
    /// cannot be redirected. `self` is left untouched.
    pub fn with_base_url(&self, base_url: &str) -> Option<Self> {
        match self {
            Self::OpenAI(adapter) => Some(Self::OpenAI(adapter.with_base_url(base_url))),
            Self::VLLM(adapter) => Some(Self::VLLM(adapter.with_base_url(base_url))),
            Self::Gemini(_) | Self::Anthropic(_) | Self::AzureOpenAI(_) => None,
        }
    }
}

#[async_trait::async_trait]
impl AdapterTrait for Adapter {
    fn name(&self) -> &'static str {
        self.as_trait().name()
    }

    fn config(&self) -> &ProviderConfig {
        self.as_trait().config()
    }

    async fn completion(&self, request: &ChatRequest) -> Result<RawResponse, AdapterError> {
        self.as_trait().completion(request).await
    }

    async fn completion_stream(&self, request: &ChatRequest) -> Result<EventSource, AdapterError> {
        self.as_trait().completion_stream(request).await
    }

    fn parse_response(&self, body: &[u8]) -> Result<ParsedCompletion, AdapterError> {
        self.as_trait().parse_response(body)
    }

    fn parse_tool_calls(&self, body: &[u8]) -> Vec<ToolCall> {
        self.as_trait().parse_tool_calls(body)
    }

    fn parse_stream_chunk(&self, frame: &str) -> StreamChunk {
        self.as_trait().parse_stream_chunk(frame)
    }

    fn parse_stream_tool_call(&self, frame: &str) -> StreamToolUpdate {
        self.as_trait().parse_stream_tool_call(frame)
    }

    fn stream_frame_prefix(&self) -> &'static str {
        self.as_trait().stream_frame_prefix()
    }

    fn is_stream_end(&self, frame: &str) -> bool {
        self.as_trait().is_stream_end(frame)
    }

    fn parse_stream_error(&self, frame: &str) -> Option<String> {
        self.as_trait().parse_stream_error(frame)
    }

    async fn probe(&self) -> ProbeReport {
        self.as_trait().probe().await
    }

    async fn discover_models(&self) -> Result<Vec<String>, AdapterError> {
        self.as_trait().discover_models().await
    }

    fn supports_base_url_override(&self) -> bool {
        self.as_trait().supports_base_url_override()
    }
}
