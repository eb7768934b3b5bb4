//! # Gemini Adapter
//!
//! Google Generative Language API. The model is part of the URL path
//! (`{base}/models/{model}:generateContent`), the key travels as the `key`
//! query parameter and turns are `contents[].parts[]` with the assistant
//! role spelled `model`. Streams use `:streamGenerateContent?alt=sse`; every
//! frame is a complete response object and the stream simply ends at EOF.

pub mod wire;

use crate::{
    adapters::base::{
        AdapterTrait, AdapterUtils, EventSource, ParsedCompletion, ProbeReport, RawResponse,
        StreamChunk, StreamToolUpdate, ToolCallFragment,
    },
    config::ProviderConfig,
    core::canonical::{ChatRequest, ToolCall},
    error::AdapterError,
};
use reqwest::{Client, RequestBuilder};
use std::sync::Arc;
use uuid::Uuid;
use wire::{GeminiFunctionCall, GeminiModelListing, GeminiRequest, GeminiResponse};

#[derive(Clone, Debug)]
pub struct GeminiAdapter {
    config: Arc<ProviderConfig>,
    client: Client,
}

impl GeminiAdapter {
    pub fn new(config: Arc<ProviderConfig>, client: Client) -> Self {
        Self { config, client }
    }

    fn with_key(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.query(&[("key", key)]),
            None => builder,
        }
    }

    fn generate_request(&self, request: &ChatRequest) -> RequestBuilder {
        let model = AdapterUtils::effective_model(request, &self.config);
        AdapterUtils::log_request(self.name(), model, request.messages.len(), request.stream);

        let model = model.trim_start_matches("models/");
        let builder = if request.stream {
            self.client
                .post(format!("{}/models/{}:streamGenerateContent", self.base_url(), model))
                .query(&[("alt", "sse")])
        } else {
            self.client
                .post(format!("{}/models/{}:generateContent", self.base_url(), model))
        };
        self.with_key(builder).json(&GeminiRequest::from_canonical(request))
    }

    fn models_request(&self) -> RequestBuilder {
        self.with_key(self.client.get(format!("{}/models", self.base_url())))
            .timeout(self.config.timeout())
    }

    fn call_id(call: &GeminiFunctionCall) -> String {
        call.id
            .clone()
            .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()))
    }

    fn decode_models(body: &[u8]) -> Result<Vec<String>, AdapterError> {
        let listing: GeminiModelListing = serde_json::from_slice(body)?;
        Ok(listing
            .models
            .into_iter()
            .map(|m| m.name.trim_start_matches("models/").to_string())
            .collect())
    }
}

#[async_trait::async_trait]
impl AdapterTrait for GeminiAdapter {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn completion(&self, request: &ChatRequest) -> Result<RawResponse, AdapterError> {
        let builder = self.generate_request(request).timeout(self.config.timeout());
        AdapterUtils::send_collect(
            self.name(),
            AdapterUtils::effective_model(request, &self.config),
            builder,
        )
        .await
    }

    async fn completion_stream(&self, request: &ChatRequest) -> Result<EventSource, AdapterError> {
        AdapterUtils::open_event_source(self.name(), self.generate_request(request)).await
    }

    fn parse_response(&self, body: &[u8]) -> Result<ParsedCompletion, AdapterError> {
        let response: GeminiResponse = serde_json::from_slice(body)?;
        let (input_tokens, output_tokens) = response.usage();
        Ok(ParsedCompletion {
            text: response.first_text(),
            input_tokens,
            output_tokens,
            finish_reason: response.finish_reason(),
        })
    }

    fn parse_tool_calls(&self, body: &[u8]) -> Vec<ToolCall> {
        let Ok(response) = serde_json::from_slice::<GeminiResponse>(body) else {
            return Vec::new();
        };
        response
            .function_calls()
            .map(|call| ToolCall {
                id: Self::call_id(call),
                name: call.name.clone(),
                arguments: call.args.to_string(),
            })
            .collect()
    }

    fn parse_stream_chunk(&self, frame: &str) -> StreamChunk {
        let Ok(response) = serde_json::from_str::<GeminiResponse>(frame) else {
            return StreamChunk::default();
        };
        let (input_tokens, output_tokens) = response.usage();
        StreamChunk {
            text: response.first_text(),
            input_tokens,
            output_tokens,
        }
    }

    fn parse_stream_tool_call(&self, frame: &str) -> StreamToolUpdate {
        let Ok(response) = serde_json::from_str::<GeminiResponse>(frame) else {
            return StreamToolUpdate::default();
        };
        // calls arrive whole, each with a fresh id
        StreamToolUpdate {
            fragments: response
                .function_calls()
                .enumerate()
                .map(|(index, call)| ToolCallFragment {
                    index: index as u32,
                    id: Some(Self::call_id(call)),
                    name: Some(call.name.clone()),
                    arguments: call.args.to_string(),
                })
                .collect(),
            finish_reason: response.finish_reason(),
        }
    }

    fn is_stream_end(&self, _frame: &str) -> bool {
        false
    }

    async fn probe(&self) -> ProbeReport {
        AdapterUtils::probe_endpoint(self.name(), self.models_request()).await
    }

    async fn discover_models(&self) -> Result<Vec<String>, AdapterError> {
        AdapterUtils::fetch_models(self.models_request(), Self::decode_models).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{canonical::ChatMessage, http_client::HttpClientBuilder};
    use serde_json::json;

    fn adapter() -> GeminiAdapter {
        let config = ProviderConfig::new(
            "gemini",
            "gemini",
            "https://generativelanguage.googleapis.com/v1beta",
            "gemini-1.5-flash",
        )
        .with_api_key("g-key");
        GeminiAdapter::new(Arc::new(config), HttpClientBuilder::new().build().unwrap())
    }

    fn echo_request() -> ChatRequest {
        ChatRequest {
            messages: vec![ChatMessage::system("s"), ChatMessage::user("hi")],
            ..Default::default()
        }
    }

    #[test]
    fn test_model_in_path_key_in_query() {
        let built = adapter().generate_request(&echo_request()).build().unwrap();
        assert_eq!(
            built.url().as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent?key=g-key"
        );
        let body: serde_json::Value =
            serde_json::from_slice(built.body().unwrap().as_bytes().unwrap()).unwrap();
        assert!(body.get("model").is_none());
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hi");
    }

    #[test]
    fn test_stream_url_requests_sse() {
        let mut request = echo_request();
        request.stream = true;
        request.model = "models/gemini-1.5-pro".to_string();
        let built = adapter().generate_request(&request).build().unwrap();
        assert_eq!(
            built.url().as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-pro:streamGenerateContent?alt=sse&key=g-key"
        );
    }

    #[test]
    fn test_parse_response_echo() {
        let body = json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": "hi"}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 1, "totalTokenCount": 5}
        })
        .to_string();
        let parsed = adapter().parse_response(body.as_bytes()).unwrap();
        assert_eq!(parsed.text, "hi");
        assert_eq!((parsed.input_tokens, parsed.output_tokens), (4, 1));
        assert_eq!(parsed.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_multi_part_response_keeps_first_part_only() {
        // Known limitation: later parts are dropped.
        let body = json!({
            "candidates": [{"content": {"parts": [{"text": "first"}, {"text": " second"}]}}]
        })
        .to_string();
        assert_eq!(adapter().parse_response(body.as_bytes()).unwrap().text, "first");
    }

    #[test]
    fn test_function_calls_get_ids() {
        let body = json!({
            "candidates": [{
                "content": {"parts": [{"functionCall": {"name": "lookup", "args": {"q": "x"}}}]},
                "finishReason": "STOP"
            }]
        })
        .to_string();
        let adapter = adapter();
        let calls = adapter.parse_tool_calls(body.as_bytes());
        assert_eq!(calls.len(), 1);
        assert!(calls[0].id.starts_with("call_"));
        assert_eq!(calls[0].arguments, "{\"q\":\"x\"}");
        assert_eq!(
            adapter.parse_response(body.as_bytes()).unwrap().finish_reason.as_deref(),
            Some("tool_calls")
        );

        let update = adapter.parse_stream_tool_call(&body);
        assert_eq!(update.fragments.len(), 1);
        assert_eq!(update.fragments[0].name.as_deref(), Some("lookup"));
    }

    #[test]
    fn test_stream_chunk_and_end() {
        let adapter = adapter();
        let frame = r#"{"candidates":[{"content":{"parts":[{"text":"Hel"}],"role":"model"}}],"usageMetadata":{"promptTokenCount":3}}"#;
        let chunk = adapter.parse_stream_chunk(frame);
        assert_eq!(chunk.text, "Hel");
        assert_eq!(chunk.input_tokens, 3);
        assert!(!adapter.is_stream_end(frame));
        assert!(!adapter.is_stream_end("[DONE]"));
    }

    #[test]
    fn test_decode_models_strips_prefix() {
        let body = br#"{"models":[{"name":"models/gemini-1.5-flash"},{"name":"models/text-embedding-004"}]}"#;
        assert_eq!(
            GeminiAdapter::decode_models(body).unwrap(),
            vec!["gemini-1.5-flash", "text-embedding-004"]
        );
    }
}
