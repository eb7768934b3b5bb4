//! # Base Adapter Functionality
//!
//! The capability contract every backend family implements, the value types
//! that cross it, and the HTTP plumbing shared by all adapters.

use crate::{
    config::ProviderConfig,
    core::canonical::{ChatRequest, ToolCall},
    error::{extract_upstream_message, AdapterError},
};
use bytes::Bytes;
use futures_util::{stream::BoxStream, StreamExt, TryStreamExt};
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;
use tracing::debug;

/// Longest single line accepted from an upstream event stream.
const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Owned, pull-based stream of raw upstream lines. Dropping it closes the
/// underlying connection.
pub type EventSource = BoxStream<'static, Result<String, AdapterError>>;

/// Upstream answer to a single-shot completion, whatever its status.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: Bytes,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedCompletion {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Already mapped to the OpenAI vocabulary (stop, length, tool_calls, ...)
    pub finish_reason: Option<String>,
}

/// What one stream frame contributes to the text and usage totals. Usage
/// stays zero until a frame reports it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamChunk {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Piece of a tool call as it arrives over a stream. Fragments sharing an
/// index belong to the same call; `arguments` is appended verbatim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallFragment {
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamToolUpdate {
    pub fragments: Vec<ToolCallFragment>,
    pub finish_reason: Option<String>,
}

impl StreamToolUpdate {
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty() && self.finish_reason.is_none()
    }
}

/// Result of a best-effort connectivity check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub message: String,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Base adapter trait that all backend families implement
#[async_trait::async_trait]
pub trait AdapterTrait: Send + Sync {
    /// Backend family name for logging
    fn name(&self) -> &'static str;

    fn config(&self) -> &ProviderConfig;

    fn base_url(&self) -> &str {
        self.config().trimmed_base_url()
    }

    fn default_model(&self) -> &str {
        &self.config().default_model
    }

    fn models(&self) -> Vec<String> {
        self.config().models()
    }

    fn has_auth(&self) -> bool {
        self.config().api_key.is_some()
    }

    /// Single-shot exchange. Never retried. A non-2xx status is returned as
    /// a response, only transport failures are errors.
    async fn completion(&self, request: &ChatRequest) -> Result<RawResponse, AdapterError>;

    /// Open an upstream event stream. A non-2xx status is an error here.
    async fn completion_stream(&self, request: &ChatRequest) -> Result<EventSource, AdapterError>;

    fn parse_response(&self, body: &[u8]) -> Result<ParsedCompletion, AdapterError>;

    fn parse_tool_calls(&self, body: &[u8]) -> Vec<ToolCall>;

    /// Text delta and usage carried by one frame payload (prefix removed).
    fn parse_stream_chunk(&self, frame: &str) -> StreamChunk;

    fn parse_stream_tool_call(&self, frame: &str) -> StreamToolUpdate;

    fn stream_frame_prefix(&self) -> &'static str {
        "data:"
    }

    /// Whether the frame payload is the family's explicit end marker.
    fn is_stream_end(&self, frame: &str) -> bool {
        frame.trim() == "[DONE]"
    }

    /// In-band error reported inside an otherwise healthy stream.
    fn parse_stream_error(&self, frame: &str) -> Option<String> {
        if !frame.contains("\"error\"") {
            return None;
        }
        let value: serde_json::Value = serde_json::from_str(frame).ok()?;
        value.get("error").filter(|e| !e.is_null())?;
        Some(
            extract_upstream_message(frame.as_bytes())
                .unwrap_or_else(|| "upstream stream reported an error".to_string()),
        )
    }

    async fn probe(&self) -> ProbeReport;

    async fn discover_models(&self) -> Result<Vec<String>, AdapterError>;

    /// Whether a per-client base URL override can be honored.
    fn supports_base_url_override(&self) -> bool {
        false
    }
}

/// OpenAI-style `{"data": [{"id": ...}]}` model listing.
#[derive(Debug, Deserialize)]
pub(crate) struct ModelListing {
    #[serde(default)]
    pub data: Vec<ModelListingEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ModelListingEntry {
    pub id: String,
}

/// Utility functions for adapters
pub struct AdapterUtils;

impl AdapterUtils {
    /// Send a request and collect the full body, whatever the status.
    pub async fn send_collect(
        adapter: &'static str,
        model: &str,
        builder: RequestBuilder,
    ) -> Result<RawResponse, AdapterError> {
        let started = Instant::now();
        let response = builder.send().await.map_err(|e| {
            debug!(adapter, "upstream request failed: {}", e);
            AdapterError::from(e)
        })?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| {
            debug!(adapter, "failed to read upstream body: {}", e);
            AdapterError::from(e)
        })?;

        Self::log_response(
            adapter,
            model,
            (200..300).contains(&status),
            started.elapsed().as_millis() as u64,
        );
        Ok(RawResponse { status, body })
    }

    /// Send a streaming request and hand back its lines. Non-2xx answers are
    /// drained and reported as [`AdapterError::Status`].
    pub async fn open_event_source(
        adapter: &'static str,
        builder: RequestBuilder,
    ) -> Result<EventSource, AdapterError> {
        let response = builder.send().await.map_err(|e| {
            debug!(adapter, "upstream stream request failed: {}", e);
            AdapterError::from(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            debug!(adapter, status = status.as_u16(), "upstream refused stream");
            return Err(AdapterError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(Self::response_lines(response))
    }

    /// Split a response body into lines as bytes arrive.
    pub fn response_lines(response: reqwest::Response) -> EventSource {
        let body = response.bytes_stream().map_err(std::io::Error::other);
        FramedRead::new(
            StreamReader::new(body),
            LinesCodec::new_with_max_length(MAX_FRAME_BYTES),
        )
        .map_err(|e| match e {
            LinesCodecError::Io(io) => AdapterError::Transport(io.to_string()),
            LinesCodecError::MaxLineLengthExceeded => {
                AdapterError::Malformed("stream frame exceeds maximum length".to_string())
            }
        })
        .boxed()
    }

    /// GET a cheap endpoint and describe what came back.
    pub async fn probe_endpoint(adapter: &'static str, builder: RequestBuilder) -> ProbeReport {
        match builder.send().await {
            Ok(response) if response.status().is_success() => ProbeReport {
                message: format!("{} backend reachable", adapter),
                reachable: true,
                error: None,
            },
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.bytes().await.unwrap_or_default();
                ProbeReport {
                    message: format!("{} backend answered HTTP {}", adapter, status),
                    reachable: true,
                    error: Some(
                        extract_upstream_message(&body)
                            .unwrap_or_else(|| format!("HTTP {}", status)),
                    ),
                }
            }
            Err(e) => ProbeReport {
                message: format!("{} backend unreachable", adapter),
                reachable: false,
                error: Some(AdapterError::from(e).to_string()),
            },
        }
    }

    /// GET a model listing and decode it with `decode`.
    pub async fn fetch_models<F>(builder: RequestBuilder, decode: F) -> Result<Vec<String>, AdapterError>
    where
        F: FnOnce(&[u8]) -> Result<Vec<String>, AdapterError>,
    {
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        if !(200..300).contains(&status) {
            return Err(AdapterError::Status { status, body });
        }
        decode(&body)
    }

    pub fn decode_model_listing(body: &[u8]) -> Result<Vec<String>, AdapterError> {
        let listing: ModelListing = serde_json::from_slice(body)?;
        Ok(listing.data.into_iter().map(|m| m.id).collect())
    }

    pub fn current_timestamp() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_secs() as i64)
            .unwrap_or(0)
    }

    pub fn log_request(adapter_name: &str, model: &str, message_count: usize, stream: bool) {
        debug!(
            adapter = adapter_name,
            model = model,
            message_count = message_count,
            stream = stream,
            "Forwarding chat completion request"
        );
    }

    pub fn log_response(adapter_name: &str, model: &str, success: bool, response_time_ms: u64) {
        debug!(
            adapter = adapter_name,
            model = model,
            success = success,
            response_time_ms = response_time_ms,
            "Upstream chat completion finished"
        );
    }

    /// Model to put on the wire: the request's, or the backend default.
    pub fn effective_model<'a>(request: &'a ChatRequest, config: &'a ProviderConfig) -> &'a str {
        if request.model.is_empty() {
            &config.default_model
        } else {
            &request.model
        }
    }

    /// Tool arguments as a JSON value for wire formats that demand an
    /// object. Unparseable text becomes an empty object.
    pub fn arguments_as_object(arguments: &str) -> serde_json::Value {
        match serde_json::from_str::<serde_json::Value>(arguments) {
            Ok(value @ serde_json::Value::Object(_)) => value,
            _ => serde_json::Value::Object(Default::default()),
        }
    }
}
