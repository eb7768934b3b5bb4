//! OpenAI `chat.completion.chunk` rendering of translator events as SSE.

use super::core::StreamEvent;
use crate::{
    adapters::AdapterUtils,
    schemas::{
        ChatCompletionChunk, StreamChoice, StreamDelta, StreamFunctionCall, StreamToolCall, Usage,
    },
};
use axum::response::sse::Event;
use futures::{stream, Stream, StreamExt};
use std::convert::Infallible;

/// Streaming response wrapper
pub type StreamingResponse = Result<Event, Infallible>;

struct ChunkWriter {
    model: String,
    created: i64,
    role_sent: bool,
}

impl ChunkWriter {
    fn chunk(&self, request_id: &str, delta: StreamDelta, finish_reason: Option<String>, usage: Option<Usage>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: request_id.to_string(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![StreamChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage,
        }
    }

    fn role(&mut self) -> Option<String> {
        if self.role_sent {
            None
        } else {
            self.role_sent = true;
            Some("assistant".to_string())
        }
    }

    fn render(&mut self, event: StreamEvent) -> Vec<Event> {
        match event {
            StreamEvent::Delta { request_id, seq, text } => {
                let delta = StreamDelta {
                    role: self.role(),
                    content: Some(text),
                    tool_calls: None,
                };
                vec![data_event(&self.chunk(&request_id, delta, None, None)).id(seq.to_string())]
            }
            StreamEvent::Finished {
                request_id,
                seq,
                usage,
                finish_reason,
                tool_calls,
            } => {
                let mut events = Vec::with_capacity(3);
                if !tool_calls.is_empty() {
                    let delta = StreamDelta {
                        role: self.role(),
                        content: None,
                        tool_calls: Some(
                            tool_calls
                                .into_iter()
                                .enumerate()
                                .map(|(index, call)| StreamToolCall {
                                    index: index as u32,
                                    id: Some(call.id),
                                    tool_type: Some("function".to_string()),
                                    function: Some(StreamFunctionCall {
                                        name: Some(call.name),
                                        arguments: Some(call.arguments),
                                    }),
                                })
                                .collect(),
                        ),
                    };
                    events.push(data_event(&self.chunk(&request_id, delta, None, None)));
                }
                let last = self.chunk(&request_id, StreamDelta::default(), Some(finish_reason), Some(usage));
                events.push(data_event(&last).id(seq.to_string()));
                events.push(done_event());
                events
            }
            StreamEvent::Error { seq, error, .. } => vec![
                data_event(&error.to_envelope()).id(seq.to_string()),
                done_event(),
            ],
        }
    }
}

fn data_event<T: serde::Serialize>(payload: &T) -> Event {
    Event::default().data(serde_json::to_string(payload).unwrap_or_default())
}

/// Create the final [DONE] event
pub fn done_event() -> Event {
    Event::default().data("[DONE]")
}

/// Render canonical events as OpenAI-compatible SSE frames. The SSE `id`
/// carries the event's sequence index.
pub fn to_sse<S>(events: S, model: impl Into<String>) -> impl Stream<Item = StreamingResponse>
where
    S: Stream<Item = StreamEvent> + Send + 'static,
{
    let mut writer = ChunkWriter {
        model: model.into(),
        created: AdapterUtils::current_timestamp(),
        role_sent: false,
    };
    events
        .map(move |event| stream::iter(writer.render(event).into_iter().map(Ok)))
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{core::canonical::ToolCall, error::GatewayError};

    fn writer() -> ChunkWriter {
        ChunkWriter { model: "m".to_string(), created: 0, role_sent: false }
    }

    #[test]
    fn test_role_only_on_first_chunk() {
        let mut writer = writer();
        assert_eq!(writer.role().as_deref(), Some("assistant"));
        assert_eq!(writer.role(), None);
    }

    #[test]
    fn test_finished_renders_tool_chunk_final_and_done() {
        let mut writer = writer();
        let events = writer.render(StreamEvent::Finished {
            request_id: "chatcmpl-1".to_string(),
            seq: 3,
            usage: Usage::new(1, 2),
            finish_reason: "tool_calls".to_string(),
            tool_calls: vec![ToolCall { id: "c".into(), name: "f".into(), arguments: "{}".into() }],
        });
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn test_error_renders_envelope_and_done() {
        let mut writer = writer();
        let events = writer.render(StreamEvent::Error {
            request_id: "chatcmpl-1".to_string(),
            seq: 0,
            error: GatewayError::UpstreamUnavailable("down".to_string()),
            usage: Usage::default(),
        });
        assert_eq!(events.len(), 2);
    }
}
