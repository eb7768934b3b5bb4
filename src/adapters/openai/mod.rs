//! # OpenAI Adapter Module
//!
//! OpenAI API and any OpenAI-compatible endpoint (LiteLLM, LM Studio,
//! Ollama's `/v1`, ...). Unknown backend types land here.
//!
//! - Endpoint: `{base}/chat/completions`
//! - Auth: `Authorization: Bearer <key>` when a key is configured
//! - Streaming usage requested through `stream_options.include_usage`

pub mod wire;

use crate::{
    adapters::base::{
        AdapterTrait, AdapterUtils, EventSource, ParsedCompletion, ProbeReport, RawResponse,
        StreamChunk, StreamToolUpdate,
    },
    config::ProviderConfig,
    core::canonical::{ChatRequest, ToolCall},
    error::AdapterError,
};
use reqwest::{Client, RequestBuilder};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct OpenAIAdapter {
    config: Arc<ProviderConfig>,
    /// HTTP client with connection pooling
    client: Client,
}

impl OpenAIAdapter {
    pub fn new(config: Arc<ProviderConfig>, client: Client) -> Self {
        Self { config, client }
    }

    /// Same adapter against another endpoint, sharing the connection pool.
    pub fn with_base_url(&self, base_url: &str) -> Self {
        Self {
            config: Arc::new(self.config.with_base_url(base_url)),
            client: self.client.clone(),
        }
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn chat_request(&self, request: &ChatRequest) -> RequestBuilder {
        let model = AdapterUtils::effective_model(request, &self.config);
        AdapterUtils::log_request(self.name(), model, request.messages.len(), request.stream);

        let url = format!("{}/chat/completions", self.base_url());
        self.authorized(self.client.post(url))
            .json(&wire::build_body(request, Some(model)))
    }

    fn models_request(&self) -> RequestBuilder {
        self.authorized(self.client.get(format!("{}/models", self.base_url())))
            .timeout(self.config.timeout())
    }
}

#[async_trait::async_trait]
impl AdapterTrait for OpenAIAdapter {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn completion(&self, request: &ChatRequest) -> Result<RawResponse, AdapterError> {
        let builder = self.chat_request(request).timeout(self.config.timeout());
        AdapterUtils::send_collect(
            self.name(),
            AdapterUtils::effective_model(request, &self.config),
            builder,
        )
        .await
    }

    async fn completion_stream(&self, request: &ChatRequest) -> Result<EventSource, AdapterError> {
        AdapterUtils::open_event_source(self.name(), self.chat_request(request)).await
    }

    fn parse_response(&self, body: &[u8]) -> Result<ParsedCompletion, AdapterError> {
        wire::parse_response(body)
    }

    fn parse_tool_calls(&self, body: &[u8]) -> Vec<ToolCall> {
        wire::parse_tool_calls(body)
    }

    fn parse_stream_chunk(&self, frame: &str) -> StreamChunk {
        wire::parse_stream_chunk(frame)
    }

    fn parse_stream_tool_call(&self, frame: &str) -> StreamToolUpdate {
        wire::parse_stream_tool_call(frame)
    }

    async fn probe(&self) -> ProbeReport {
        AdapterUtils::probe_endpoint(self.name(), self.models_request()).await
    }

    async fn discover_models(&self) -> Result<Vec<String>, AdapterError> {
        AdapterUtils::fetch_models(self.models_request(), AdapterUtils::decode_model_listing).await
    }

    fn supports_base_url_override(&self) -> bool {
        true
    }
}
