//! Gemini `generateContent` wire types.

use crate::{
    adapters::base::AdapterUtils,
    core::canonical::{ChatMessage, ChatRequest, Role},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiRequest {
    pub contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<GeminiToolSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'static str>,
    pub parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<GeminiFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_response: Option<GeminiFunctionResponse>,
}

impl GeminiPart {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiFunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiFunctionResponse {
    pub name: String,
    pub response: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiToolSet {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

impl GeminiRequest {
    pub fn from_canonical(request: &ChatRequest) -> Self {
        let system: Vec<GeminiPart> = request.system_texts().map(GeminiPart::text).collect();

        let generation_config = GenerationConfig {
            max_output_tokens: request.max_output_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
            stop_sequences: request.stop.clone(),
            response_mime_type: request.wants_json_object().then_some("application/json"),
        };

        let tools = if request.tools.is_empty() {
            Vec::new()
        } else {
            vec![GeminiToolSet {
                function_declarations: request
                    .tools
                    .iter()
                    .map(|tool| FunctionDeclaration {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: tool.parameter_schema.clone(),
                    })
                    .collect(),
            }]
        };

        Self {
            contents: convert_messages(&request.messages),
            system_instruction: (!system.is_empty()).then(|| GeminiContent {
                role: None,
                parts: system,
            }),
            generation_config: (generation_config != GenerationConfig::default())
                .then_some(generation_config),
            tools,
            tool_config: request.tool_choice.as_ref().and_then(map_tool_choice),
        }
    }
}

fn convert_messages(messages: &[ChatMessage]) -> Vec<GeminiContent> {
    // functionResponse parts are matched by name, not by call id
    let call_names: HashMap<&str, &str> = messages
        .iter()
        .flat_map(|m| m.tool_calls.iter())
        .map(|call| (call.id.as_str(), call.name.as_str()))
        .collect();

    let mut out: Vec<GeminiContent> = Vec::with_capacity(messages.len());
    for message in messages {
        match message.role {
            Role::System => {}
            Role::User => out.push(GeminiContent {
                role: Some("user"),
                parts: vec![GeminiPart::text(message.content.as_str())],
            }),
            Role::Assistant => {
                let mut parts = Vec::with_capacity(message.tool_calls.len() + 1);
                if !message.content.is_empty() || message.tool_calls.is_empty() {
                    parts.push(GeminiPart::text(message.content.as_str()));
                }
                parts.extend(message.tool_calls.iter().map(|call| GeminiPart {
                    function_call: Some(GeminiFunctionCall {
                        id: None,
                        name: call.name.clone(),
                        args: AdapterUtils::arguments_as_object(&call.arguments),
                    }),
                    ..Default::default()
                }));
                out.push(GeminiContent {
                    role: Some("model"),
                    parts,
                });
            }
            Role::Tool => {
                let call_id = message.tool_call_id.as_deref().unwrap_or_default();
                let part = GeminiPart {
                    function_response: Some(GeminiFunctionResponse {
                        name: call_names.get(call_id).copied().unwrap_or(call_id).to_string(),
                        response: tool_output(&message.content),
                    }),
                    ..Default::default()
                };
                let previous_responses = out.last_mut().filter(|last| {
                    last.role == Some("user")
                        && last.parts.iter().all(|p| p.function_response.is_some())
                });
                match previous_responses {
                    Some(last) => last.parts.push(part),
                    None => out.push(GeminiContent {
                        role: Some("user"),
                        parts: vec![part],
                    }),
                }
            }
        }
    }
    out
}

/// `functionResponse.response` must be an object.
fn tool_output(content: &str) -> Value {
    match serde_json::from_str::<Value>(content) {
        Ok(value @ Value::Object(_)) => value,
        _ => json!({ "content": content }),
    }
}

fn map_tool_choice(choice: &Value) -> Option<Value> {
    let config = match choice {
        Value::String(mode) => match mode.as_str() {
            "auto" => json!({"mode": "AUTO"}),
            "none" => json!({"mode": "NONE"}),
            "required" => json!({"mode": "ANY"}),
            _ => return None,
        },
        Value::Object(_) => {
            let name = choice.pointer("/function/name").and_then(Value::as_str)?;
            json!({"mode": "ANY", "allowedFunctionNames": [name]})
        }
        _ => return None,
    };
    Some(json!({ "functionCallingConfig": config }))
}

pub fn map_finish_reason(reason: &str) -> String {
    match reason {
        "STOP" => "stop".to_string(),
        "MAX_TOKENS" => "length".to_string(),
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => {
            "content_filter".to_string()
        }
        other => other.to_ascii_lowercase(),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiResponse {
    #[serde(default)]
    pub candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiCandidate {
    #[serde(default)]
    pub content: Option<GeminiResponseContent>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GeminiResponseContent {
    #[serde(default)]
    pub parts: Vec<GeminiPart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u32,
    #[serde(default)]
    pub candidates_token_count: u32,
}

impl GeminiResponse {
    fn parts(&self) -> &[GeminiPart] {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| content.parts.as_slice())
            .unwrap_or_default()
    }

    /// Text of the first part only; later parts are not concatenated.
    pub fn first_text(&self) -> String {
        self.parts()
            .first()
            .and_then(|part| part.text.clone())
            .unwrap_or_default()
    }

    pub fn function_calls(&self) -> impl Iterator<Item = &GeminiFunctionCall> {
        self.parts().iter().filter_map(|part| part.function_call.as_ref())
    }

    pub fn usage(&self) -> (u32, u32) {
        self.usage_metadata
            .as_ref()
            .map(|u| (u.prompt_token_count, u.candidates_token_count))
            .unwrap_or_default()
    }

    /// Gemini reports STOP even when it asked for a function call.
    pub fn finish_reason(&self) -> Option<String> {
        let reason = self.candidates.first()?.finish_reason.as_deref()?;
        if self.function_calls().next().is_some() && reason == "STOP" {
            return Some("tool_calls".to_string());
        }
        Some(map_finish_reason(reason))
    }
}

#[derive(Debug, Deserialize)]
pub struct GeminiModelListing {
    #[serde(default)]
    pub models: Vec<GeminiModelEntry>,
}

#[derive(Debug, Deserialize)]
pub struct GeminiModelEntry {
    pub name: String,
}
