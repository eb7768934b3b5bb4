//! OpenAI chat completions wire format, shared by the OpenAI-compatible,
//! Azure and vLLM adapters.

use crate::{
    adapters::base::{ParsedCompletion, StreamChunk, StreamToolUpdate, ToolCallFragment},
    core::canonical::{ChatMessage, ChatRequest, Role, ToolCall},
    error::AdapterError,
    schemas::{FunctionDefinition, Message, MessageContent, Tool as WireTool, ToolCall as WireToolCall},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct OpenAIChatBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<&'a str>,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    pub stop: &'a [String],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<&'a Value>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
pub struct StreamOptions {
    pub include_usage: bool,
}

/// Build the request body. `model` is `None` for families that carry the
/// model in the URL instead.
pub fn build_body<'a>(request: &'a ChatRequest, model: Option<&'a str>) -> OpenAIChatBody<'a> {
    OpenAIChatBody {
        model,
        messages: request.messages.iter().map(to_wire_message).collect(),
        max_tokens: request.max_output_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
        stop: &request.stop,
        tools: request
            .tools
            .iter()
            .map(|tool| WireTool {
                tool_type: "function".to_string(),
                function: FunctionDefinition {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameter_schema.clone(),
                },
            })
            .collect(),
        tool_choice: request.tool_choice.as_ref(),
        response_format: request.response_format.as_ref(),
        stream: request.stream,
        stream_options: request.stream.then_some(StreamOptions { include_usage: true }),
    }
}

fn to_wire_message(message: &ChatMessage) -> Message {
    let has_calls = !message.tool_calls.is_empty();
    let content = if has_calls && message.content.is_empty() {
        None
    } else {
        Some(MessageContent::Text(message.content.clone()))
    };

    Message {
        role: message.role.as_str().to_string(),
        content,
        name: None,
        tool_calls: has_calls.then(|| message.tool_calls.iter().map(WireToolCall::from).collect()),
        tool_call_id: match message.role {
            Role::Tool => message.tool_call_id.clone(),
            _ => None,
        },
    }
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    #[serde(default)]
    message: Option<OpenAIMessage>,
    #[serde(default)]
    delta: Option<OpenAIDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAIDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAIToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct OpenAIToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<OpenAIFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct OpenAIFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAIUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

pub fn parse_response(body: &[u8]) -> Result<ParsedCompletion, AdapterError> {
    let response: OpenAIResponse = serde_json::from_slice(body)?;
    let usage = response.usage.unwrap_or_default();
    let first = response.choices.into_iter().next();

    Ok(ParsedCompletion {
        text: first
            .as_ref()
            .and_then(|c| c.message.as_ref())
            .and_then(|m| m.content.clone())
            .unwrap_or_default(),
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        finish_reason: first.and_then(|c| c.finish_reason),
    })
}

pub fn parse_tool_calls(body: &[u8]) -> Vec<ToolCall> {
    serde_json::from_slice::<OpenAIResponse>(body)
        .ok()
        .and_then(|r| r.choices.into_iter().next())
        .and_then(|c| c.message)
        .and_then(|m| m.tool_calls)
        .unwrap_or_default()
        .into_iter()
        .map(ToolCall::from)
        .collect()
}

pub fn parse_stream_chunk(frame: &str) -> StreamChunk {
    let Ok(chunk) = serde_json::from_str::<OpenAIResponse>(frame) else {
        return StreamChunk::default();
    };
    let usage = chunk.usage.unwrap_or_default();

    StreamChunk {
        text: chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta)
            .and_then(|d| d.content)
            .unwrap_or_default(),
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
    }
}

pub fn parse_stream_tool_call(frame: &str) -> StreamToolUpdate {
    let Some(choice) = serde_json::from_str::<OpenAIResponse>(frame)
        .ok()
        .and_then(|r| r.choices.into_iter().next())
    else {
        return StreamToolUpdate::default();
    };

    let fragments = choice
        .delta
        .and_then(|d| d.tool_calls)
        .unwrap_or_default()
        .into_iter()
        .map(|call| {
            let (name, arguments) = call
                .function
                .map(|f| (f.name, f.arguments.unwrap_or_default()))
                .unwrap_or_default();
            ToolCallFragment {
                index: call.index,
                id: call.id,
                name,
                arguments,
            }
        })
        .collect();

    StreamToolUpdate {
        fragments,
        finish_reason: choice.finish_reason,
    }
}
