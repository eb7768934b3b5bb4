//! # vLLM Adapter
//!
//! High-throughput local inference servers (vLLM, and LightLLM or SGLang in
//! their OpenAI-compatible mode). The base URL is the server root; the
//! adapter appends `/v1/...` itself and probes the server's `/health`.

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

#[derive(Clone, Debug)]
pub struct VLLMAdapter {
    config: Arc<ProviderConfig>,
    client: Client,
}

impl VLLMAdapter {
    pub fn new(config: Arc<ProviderConfig>, client: Client) -> Self {
        Self { config, client }
    }

    pub fn with_base_url(&self, base_url: &str) -> Self {
        Self {
            config: Arc::new(self.config.with_base_url(base_url)),
            client: self.client.clone(),
        }
    }

    /// Server root; tolerates a configured base that already ends in `/v1`.
    fn root(&self) -> &str {
        self.base_url().trim_end_matches("/v1")
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

        self.authorized(self.client.post(format!("{}/v1/chat/completions", self.root())))
            .json(&wire::build_body(request, Some(model)))
    }
}

#[async_trait::async_trait]
impl AdapterTrait for VLLMAdapter {
    fn name(&self) -> &'static str {
        "vllm"
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
        let builder = self
            .authorized(self.client.get(format!("{}/health", self.root())))
            .timeout(self.config.timeout());
        AdapterUtils::probe_endpoint(self.name(), builder).await
    }

    async fn discover_models(&self) -> Result<Vec<String>, AdapterError> {
        let builder = self
            .authorized(self.client.get(format!("{}/v1/models", self.root())))
            .timeout(self.config.timeout());
        AdapterUtils::fetch_models(builder, AdapterUtils::decode_model_listing).await
    }

    fn supports_base_url_override(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{canonical::ChatMessage, http_client::HttpClientBuilder};

    fn adapter(base: &str) -> VLLMAdapter {
        let config = ProviderConfig::new("local", "vllm", base, "meta-llama/Llama-3-8B");
        VLLMAdapter::new(Arc::new(config), HttpClientBuilder::new().build().unwrap())
    }

    #[test]
    fn test_vllm_adapter_creation() {
        let adapter = adapter("http://localhost:8000");
        assert_eq!(adapter.name(), "vllm");
        assert!(!adapter.has_auth());
        assert_eq!(adapter.models(), vec!["meta-llama/Llama-3-8B"]);
    }

    #[test]
    fn test_root_handles_v1_suffix() {
        let request = ChatRequest {
            messages: vec![ChatMessage::user("hi")],
            ..Default::default()
        };
        for base in ["http://gpu-1:8000", "http://gpu-1:8000/", "http://gpu-1:8000/v1"] {
            let built = adapter(base).chat_request(&request).build().unwrap();
            assert_eq!(built.url().as_str(), "http://gpu-1:8000/v1/chat/completions");
        }
    }

    #[test]
    fn test_body_carries_default_model() {
        let request = ChatRequest {
            messages: vec![ChatMessage::user("hi")],
            ..Default::default()
        };
        let built = adapter("http://gpu-1:8000").chat_request(&request).build().unwrap();
        let body: serde_json::Value =
            serde_json::from_slice(built.body().unwrap().as_bytes().unwrap()).unwrap();
        assert_eq!(body["model"], "meta-llama/Llama-3-8B");
    }
}
