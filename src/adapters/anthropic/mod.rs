//! # Anthropic Adapter
//!
//! Claude models through the Messages API (`POST {base}/v1/messages`).
//!
//! - Auth: `x-api-key` plus a pinned `anthropic-version` header
//! - System messages travel in the top-level `system` field
//! - Tool calls are `tool_use` content blocks, results are `tool_result`
//!   blocks in a user turn
//! - Streams are typed events; tool arguments arrive as `input_json_delta`
//!   fragments keyed by content-block index

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
use wire::{
    map_stop_reason, AnthropicDelta, AnthropicRequest, AnthropicResponse, AnthropicResponseBlock,
    AnthropicStreamEvent,
};

pub const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Clone, Debug)]
pub struct AnthropicAdapter {
    config: Arc<ProviderConfig>,
    client: Client,
}

impl AnthropicAdapter {
    pub fn new(config: Arc<ProviderConfig>, client: Client) -> Self {
        Self { config, client }
    }

    fn root(&self) -> &str {
        self.base_url().trim_end_matches("/v1")
    }

    fn with_headers(&self, builder: RequestBuilder) -> RequestBuilder {
        let version = self
            .config
            .api_version
            .as_deref()
            .unwrap_or(DEFAULT_ANTHROPIC_VERSION);
        let builder = builder.header("anthropic-version", version);
        match &self.config.api_key {
            Some(key) => builder.header("x-api-key", key),
            None => builder,
        }
    }

    fn messages_request(&self, request: &ChatRequest) -> RequestBuilder {
        let model = AdapterUtils::effective_model(request, &self.config);
        AdapterUtils::log_request(self.name(), model, request.messages.len(), request.stream);

        self.with_headers(self.client.post(format!("{}/v1/messages", self.root())))
            .json(&AnthropicRequest::from_canonical(request, model))
    }

    fn models_request(&self) -> RequestBuilder {
        self.with_headers(self.client.get(format!("{}/v1/models", self.root())))
            .timeout(self.config.timeout())
    }

    fn parse_event(frame: &str) -> Option<AnthropicStreamEvent> {
        serde_json::from_str(frame).ok()
    }
}

#[async_trait::async_trait]
impl AdapterTrait for AnthropicAdapter {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn completion(&self, request: &ChatRequest) -> Result<RawResponse, AdapterError> {
        let builder = self.messages_request(request).timeout(self.config.timeout());
        AdapterUtils::send_collect(
            self.name(),
            AdapterUtils::effective_model(request, &self.config),
            builder,
        )
        .await
    }

    async fn completion_stream(&self, request: &ChatRequest) -> Result<EventSource, AdapterError> {
        AdapterUtils::open_event_source(self.name(), self.messages_request(request)).await
    }

    fn parse_response(&self, body: &[u8]) -> Result<ParsedCompletion, AdapterError> {
        let response: AnthropicResponse = serde_json::from_slice(body)?;
        let text = response
            .content
            .iter()
            .filter_map(|block| match block {
                AnthropicResponseBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<String>();

        Ok(ParsedCompletion {
            text,
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
            finish_reason: response.stop_reason.as_deref().map(map_stop_reason),
        })
    }

    fn parse_tool_calls(&self, body: &[u8]) -> Vec<ToolCall> {
        let Ok(response) = serde_json::from_slice::<AnthropicResponse>(body) else {
            return Vec::new();
        };
        response
            .content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicResponseBlock::ToolUse { id, name, input } => Some(ToolCall {
                    id,
                    name,
                    arguments: input.to_string(),
                }),
                _ => None,
            })
            .collect()
    }

    fn parse_stream_chunk(&self, frame: &str) -> StreamChunk {
        match Self::parse_event(frame) {
            Some(AnthropicStreamEvent::MessageStart { message }) => StreamChunk {
                text: String::new(),
                input_tokens: message.usage.input_tokens,
                output_tokens: message.usage.output_tokens,
            },
            Some(AnthropicStreamEvent::ContentBlockDelta {
                delta: AnthropicDelta::TextDelta { text },
                ..
            }) => StreamChunk {
                text,
                ..Default::default()
            },
            Some(AnthropicStreamEvent::MessageDelta { usage, .. }) => StreamChunk {
                text: String::new(),
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
            },
            _ => StreamChunk::default(),
        }
    }

    fn parse_stream_tool_call(&self, frame: &str) -> StreamToolUpdate {
        match Self::parse_event(frame) {
            Some(AnthropicStreamEvent::ContentBlockStart {
                index,
                content_block: AnthropicResponseBlock::ToolUse { id, name, .. },
            }) => StreamToolUpdate {
                fragments: vec![ToolCallFragment {
                    index,
                    id: Some(id),
                    name: Some(name),
                    arguments: String::new(),
                }],
                finish_reason: None,
            },
            Some(AnthropicStreamEvent::ContentBlockDelta {
                index,
                delta: AnthropicDelta::InputJsonDelta { partial_json },
            }) => StreamToolUpdate {
                fragments: vec![ToolCallFragment {
                    index,
                    arguments: partial_json,
                    ..Default::default()
                }],
                finish_reason: None,
            },
            Some(AnthropicStreamEvent::MessageDelta { delta, .. }) => StreamToolUpdate {
                fragments: Vec::new(),
                finish_reason: delta.stop_reason.as_deref().map(map_stop_reason),
            },
            _ => StreamToolUpdate::default(),
        }
    }

    fn is_stream_end(&self, frame: &str) -> bool {
        matches!(Self::parse_event(frame), Some(AnthropicStreamEvent::MessageStop))
    }

    async fn probe(&self) -> ProbeReport {
        AdapterUtils::probe_endpoint(self.name(), self.models_request()).await
    }

    async fn discover_models(&self) -> Result<Vec<String>, AdapterError> {
        AdapterUtils::fetch_models(self.models_request(), AdapterUtils::decode_model_listing).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        canonical::{ChatMessage, Tool},
        http_client::HttpClientBuilder,
    };
    use serde_json::json;

    fn adapter() -> AnthropicAdapter {
        let config = ProviderConfig::new("claude", "anthropic", "https://api.anthropic.com", "claude-3-5-sonnet-latest")
            .with_api_key("sk-ant-test");
        AnthropicAdapter::new(Arc::new(config), HttpClientBuilder::new().build().unwrap())
    }

    fn body_of(builder: RequestBuilder) -> (reqwest::Request, serde_json::Value) {
        let built = builder.build().unwrap();
        let body = serde_json::from_slice(built.body().unwrap().as_bytes().unwrap()).unwrap();
        (built, body)
    }

    #[test]
    fn test_system_moves_to_dedicated_field() {
        let request = ChatRequest {
            messages: vec![
                ChatMessage::system("You are terse."),
                ChatMessage::user("hi"),
                ChatMessage::assistant("hello"),
                ChatMessage::system("Answer in English."),
                ChatMessage::user("again"),
            ],
            ..Default::default()
        };
        let (built, body) = body_of(adapter().messages_request(&request));

        assert_eq!(built.url().as_str(), "https://api.anthropic.com/v1/messages");
        assert_eq!(built.headers()["x-api-key"], "sk-ant-test");
        assert_eq!(built.headers()["anthropic-version"], DEFAULT_ANTHROPIC_VERSION);
        assert_eq!(body["system"], "You are terse.\nAnswer in English.");
        let roles: Vec<&str> = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["user", "assistant", "user"]);
        assert_eq!(body["messages"][2]["content"], "again");
        assert_eq!(body["max_tokens"], wire::DEFAULT_MAX_TOKENS);
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn test_tools_use_input_schema() {
        let request = ChatRequest {
            messages: vec![ChatMessage::user("weather?")],
            tools: vec![Tool {
                name: "get_weather".to_string(),
                description: Some("Current weather".to_string()),
                parameter_schema: Some(json!({"type": "object", "properties": {"city": {"type": "string"}}})),
            }],
            max_output_tokens: Some(100),
            ..Default::default()
        };
        let (_, body) = body_of(adapter().messages_request(&request));
        assert_eq!(body["tools"][0]["name"], "get_weather");
        assert_eq!(body["tools"][0]["input_schema"]["properties"]["city"]["type"], "string");
        assert_eq!(body["max_tokens"], 100);
    }

    #[test]
    fn test_parse_response_echo() {
        let body = json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": "hi"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 9, "output_tokens": 1}
        })
        .to_string();
        let parsed = adapter().parse_response(body.as_bytes()).unwrap();
        assert_eq!(parsed.text, "hi");
        assert_eq!((parsed.input_tokens, parsed.output_tokens), (9, 1));
        assert_eq!(parsed.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_parse_tool_use_blocks() {
        let body = json!({
            "content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "Paris"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 1, "output_tokens": 1}
        })
        .to_string();
        let calls = adapter().parse_tool_calls(body.as_bytes());
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "toolu_1");
        assert_eq!(serde_json::from_str::<serde_json::Value>(&calls[0].arguments).unwrap(), json!({"city": "Paris"}));
    }

    #[test]
    fn test_stream_frames() {
        let adapter = adapter();

        let start = r#"{"type":"message_start","message":{"id":"msg_1","usage":{"input_tokens":25,"output_tokens":1}}}"#;
        assert_eq!(adapter.parse_stream_chunk(start).input_tokens, 25);

        let text = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}"#;
        assert_eq!(adapter.parse_stream_chunk(text).text, "Hel");

        let tool_start = r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"f","input":{}}}"#;
        let update = adapter.parse_stream_tool_call(tool_start);
        assert_eq!(update.fragments[0].index, 1);
        assert_eq!(update.fragments[0].name.as_deref(), Some("f"));

        let json_delta = r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"a\":"}}"#;
        assert_eq!(adapter.parse_stream_tool_call(json_delta).fragments[0].arguments, "{\"a\":");

        let message_delta = r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":15}}"#;
        assert_eq!(adapter.parse_stream_chunk(message_delta).output_tokens, 15);
        assert_eq!(
            adapter.parse_stream_tool_call(message_delta).finish_reason.as_deref(),
            Some("tool_calls")
        );

        assert!(adapter.is_stream_end(r#"{"type":"message_stop"}"#));
        assert!(!adapter.is_stream_end("[DONE]"));
    }

    #[test]
    fn test_in_band_stream_error() {
        let frame = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        assert_eq!(adapter().parse_stream_error(frame).as_deref(), Some("Overloaded"));
    }
}
