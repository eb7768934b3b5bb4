//! # Canonical Request Model
//!
//! The provider-neutral representation of a chat request. Inbound OpenAI
//! requests are converted into these types once; every adapter translates
//! from here into its own wire format.
//!
//! Tool-call arguments, tool parameter schemas, `response_format` and
//! `tool_choice` stay opaque: the gateway forwards them, it never interprets
//! them.

use crate::{
    error::GatewayError,
    schemas::{ChatCompletionRequest, FunctionCall, Message, ToolCall as WireToolCall},
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl FromStr for Role {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" | "developer" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" | "function" => Ok(Role::Tool),
            other => Err(GatewayError::InvalidRequest(format!(
                "unsupported message role '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Set on `tool` messages: the call this message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Set on `assistant` messages that requested tool invocations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// JSON text exactly as produced by the model
    pub arguments: String,
}

impl From<WireToolCall> for ToolCall {
    fn from(call: WireToolCall) -> Self {
        Self {
            id: call.id,
            name: call.function.name,
            arguments: call.function.arguments,
        }
    }
}

impl From<&ToolCall> for WireToolCall {
    fn from(call: &ToolCall) -> Self {
        WireToolCall {
            id: call.id.clone(),
            tool_type: "function".to_string(),
            function: FunctionCall {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            },
        }
    }
}

/// Tool declaration offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_schema: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Empty until the orchestrator resolves it against the backend
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stop: Vec<String>,
    pub tools: Vec<Tool>,
    pub tool_choice: Option<serde_json::Value>,
    pub response_format: Option<serde_json::Value>,
    pub stream: bool,
}

impl ChatRequest {
    /// Convert an inbound OpenAI request, rejecting shapes no adapter can send.
    pub fn from_openai(req: ChatCompletionRequest) -> Result<Self, GatewayError> {
        if req.messages.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "messages must contain at least one message".to_string(),
            ));
        }

        let messages = req
            .messages
            .into_iter()
            .map(ChatMessage::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let tools = req
            .tools
            .unwrap_or_default()
            .into_iter()
            .map(|tool| Tool {
                name: tool.function.name,
                description: tool.function.description,
                parameter_schema: tool.function.parameters,
            })
            .collect();

        Ok(Self {
            model: req.model.unwrap_or_default(),
            messages,
            max_output_tokens: req.max_completion_tokens.or(req.max_tokens),
            temperature: req.temperature,
            top_p: req.top_p,
            stop: req.stop.map(|s| s.into_vec()).unwrap_or_default(),
            tools,
            tool_choice: req.tool_choice,
            response_format: req.response_format,
            stream: req.stream.unwrap_or(false),
        })
    }

    /// Put a system message in front of the conversation, keeping the rest in order.
    pub fn prepend_system_prompt(&mut self, prompt: &str) {
        self.messages.insert(0, ChatMessage::system(prompt));
    }

    /// Rough input size estimate: four characters per token.
    pub fn estimated_input_tokens(&self) -> u64 {
        let chars: usize = self
            .messages
            .iter()
            .map(|m| {
                m.content.len()
                    + m.tool_calls
                        .iter()
                        .map(|c| c.name.len() + c.arguments.len())
                        .sum::<usize>()
            })
            .sum();
        (chars / 4).max(1) as u64
    }

    /// Texts of all system messages, in order.
    pub fn system_texts(&self) -> impl Iterator<Item = &str> {
        self.messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }

    /// Whether the caller asked for a JSON object response.
    pub fn wants_json_object(&self) -> bool {
        self.response_format
            .as_ref()
            .and_then(|f| f.get("type"))
            .and_then(|t| t.as_str())
            .map(|t| t == "json_object" || t == "json_schema")
            .unwrap_or(false)
    }
}

impl TryFrom<Message> for ChatMessage {
    type Error = GatewayError;

    fn try_from(message: Message) -> Result<Self, Self::Error> {
        let role: Role = message.role.parse()?;
        let content = message.text();

        if role == Role::Tool && message.tool_call_id.is_none() {
            return Err(GatewayError::InvalidRequest(
                "tool messages must carry tool_call_id".to_string(),
            ));
        }

        Ok(Self {
            role,
            content,
            tool_call_id: message.tool_call_id,
            tool_calls: message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(ToolCall::from)
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{FunctionDefinition, Tool as WireTool};

    #[test]
    fn test_empty_messages_rejected() {
        let err = ChatRequest::from_openai(ChatCompletionRequest::default()).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
    }

    #[test]
    fn test_conversion_preserves_order_and_fields() {
        let call = WireToolCall {
            id: "call_1".to_string(),
            tool_type: "function".to_string(),
            function: FunctionCall {
                name: "lookup".to_string(),
                arguments: "{\"q\":1}".to_string(),
            },
        };
        let req = ChatCompletionRequest {
            model: Some("m".to_string()),
            messages: vec![
                Message::system("sys"),
                Message::user("hi"),
                Message::assistant("").with_tool_calls(vec![call]),
                Message::tool("call_1", "42"),
            ],
            max_tokens: Some(10),
            max_completion_tokens: Some(20),
            tools: Some(vec![WireTool {
                tool_type: "function".to_string(),
                function: FunctionDefinition {
                    name: "lookup".to_string(),
                    description: None,
                    parameters: Some(serde_json::json!({"type": "object"})),
                },
            }]),
            ..Default::default()
        };

        let canonical = ChatRequest::from_openai(req).unwrap();
        let roles: Vec<Role> = canonical.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::Tool]);
        assert_eq!(canonical.messages[2].tool_calls[0].arguments, "{\"q\":1}");
        assert_eq!(canonical.messages[3].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(canonical.max_output_tokens, Some(20));
        assert_eq!(canonical.tools[0].name, "lookup");
    }

    #[test]
    fn test_unknown_role_rejected() {
        let mut msg = Message::user("x");
        msg.role = "narrator".to_string();
        assert!(ChatMessage::try_from(msg).is_err());
    }

    #[test]
    fn test_tool_message_requires_call_id() {
        let mut msg = Message::tool("id", "x");
        msg.tool_call_id = None;
        assert!(ChatMessage::try_from(msg).is_err());
    }

    #[test]
    fn test_prepend_system_prompt_keeps_order() {
        let mut req = ChatRequest {
            messages: vec![ChatMessage::user("a"), ChatMessage::assistant("b")],
            ..Default::default()
        };
        req.prepend_system_prompt("rules");
        assert_eq!(req.messages[0], ChatMessage::system("rules"));
        assert_eq!(req.messages[1].content, "a");
        assert_eq!(req.messages[2].content, "b");
    }

    #[test]
    fn test_token_estimate() {
        let req = ChatRequest {
            messages: vec![ChatMessage::user("x".repeat(400))],
            ..Default::default()
        };
        assert_eq!(req.estimated_input_tokens(), 100);
    }
}
