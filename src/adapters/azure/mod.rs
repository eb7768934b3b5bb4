//! # Azure OpenAI Adapter
//!
//! Azure OpenAI Service speaks the OpenAI wire format, but the deployment
//! (model) is part of the URL:
//! `https://{resource}.openai.azure.com/openai/deployments/{deployment}/chat/completions?api-version=...`
//! so the request body carries no `model` field. Auth uses the `api-key`
//! header.

use crate::{
    adapters::{
        base::{
            AdapterTrait, AdapterUtils, EventSource, ParsedCompletion, ProbeReport, RawResponse,
            StreamChunk, StreamToolUpdate,
        },
        openai::wire,
    },
    config::ProviderConfig,
    core::canonical::{ChatRequest, ToolCall},
    error::AdapterError,
};
use reqwest::{Client, RequestBuilder};
use std::sync::Arc;

/// Pinned data-plane API version unless the configuration overrides it.
/// Must be new enough to accept `stream_options` on streaming requests.
pub const DEFAULT_API_VERSION: &str = "2024-10-21";

#[derive(Clone, Debug)]
pub struct AzureOpenAIAdapter {
    config: Arc<ProviderConfig>,
    client: Client,
}

impl AzureOpenAIAdapter {
    pub fn new(config: Arc<ProviderConfig>, client: Client) -> Self {
        Self { config, client }
    }

    fn api_version(&self) -> &str {
        self.config.api_version.as_deref().unwrap_or(DEFAULT_API_VERSION)
    }

    fn with_auth(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.query(&[("api-version", self.api_version())]);
        match &self.config.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    fn chat_request(&self, request: &ChatRequest) -> RequestBuilder {
        let deployment = AdapterUtils::effective_model(request, &self.config);
        AdapterUtils::log_request(self.name(), deployment, request.messages.len(), request.stream);

        let url = format!(
            "{}/openai/deployments/{}/chat/completions",
            self.base_url(),
            deployment
        );
        self.with_auth(self.client.post(url))
            .json(&wire::build_body(request, None))
    }

    fn models_request(&self) -> RequestBuilder {
        self.with_auth(self.client.get(format!("{}/openai/models", self.base_url())))
            .timeout(self.config.timeout())
    }
}

#[async_trait::async_trait]
impl AdapterTrait for AzureOpenAIAdapter {
    fn name(&self) -> &'static str {
        "azure"
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
}
