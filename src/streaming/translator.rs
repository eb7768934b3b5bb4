//! # Streaming Translator
//!
//! Pulls raw lines from an upstream event source and turns them into
//! canonical [`StreamEvent`]s:
//!
//! - lines without the adapter's frame prefix are skipped
//! - the adapter's end marker stops draining
//! - text deltas are re-emitted as they arrive, usage is kept as last known
//! - tool-call fragments are accumulated and delivered with the terminal event
//!
//! The translator is a plain [`Stream`]. Dropping it before it finishes
//! closes the upstream connection and still reports the partial usage.

use super::core::{
    CompletionHook, StreamEvent, StreamOutcome, StreamPhase, StreamSummary, StreamingState,
};
use crate::{
    adapters::{Adapter, AdapterTrait, EventSource},
    error::GatewayError,
    schemas::Usage,
    tools::ToolCallAccumulator,
};
use futures::{stream, Stream, StreamExt};
use std::{
    collections::VecDeque,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tracing::{debug, warn};

pub struct StreamTranslator {
    adapter: Arc<Adapter>,
    source: EventSource,
    state: StreamingState,
    phase: StreamPhase,
    pending: VecDeque<StreamEvent>,
    tools: ToolCallAccumulator,
    input_tokens: u32,
    output_tokens: u32,
    text_chars: usize,
    finish_reason: Option<String>,
    on_finish: Option<CompletionHook>,
}

impl StreamTranslator {
    pub fn new(adapter: Arc<Adapter>, source: EventSource, model: impl Into<String>) -> Self {
        Self {
            adapter,
            source,
            state: StreamingState::new(model),
            phase: StreamPhase::Opened,
            pending: VecDeque::new(),
            tools: ToolCallAccumulator::new(),
            input_tokens: 0,
            output_tokens: 0,
            text_chars: 0,
            finish_reason: None,
            on_finish: None,
        }
    }

    /// Run `hook` once when the stream completes, fails or is dropped.
    pub fn on_finish<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(StreamSummary) + Send + 'static,
    {
        self.on_finish = Some(Box::new(hook));
        self
    }

    pub fn request_id(&self) -> &str {
        &self.state.request_id
    }

    pub fn model(&self) -> &str {
        &self.state.model
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    fn usage(&self) -> Usage {
        Usage::new(self.input_tokens, self.output_tokens)
    }

    fn handle_line(&mut self, line: &str) {
        self.phase = StreamPhase::Draining;

        let Some(payload) = line.strip_prefix(self.adapter.stream_frame_prefix()) else {
            return;
        };
        let payload = payload.trim();
        if payload.is_empty() {
            return;
        }

        if self.adapter.is_stream_end(payload) {
            self.complete();
            return;
        }

        if let Some(message) = self.adapter.parse_stream_error(payload) {
            warn!(adapter = self.adapter.name(), "upstream reported an error mid-stream");
            self.abort(GatewayError::UpstreamRejected(message));
            return;
        }

        let chunk = self.adapter.parse_stream_chunk(payload);
        // providers report running totals, keep the latest non-zero value
        if chunk.input_tokens > 0 {
            self.input_tokens = chunk.input_tokens;
        }
        if chunk.output_tokens > 0 {
            self.output_tokens = chunk.output_tokens;
        }
        if !chunk.text.is_empty() {
            self.text_chars += chunk.text.chars().count();
            self.pending.push_back(StreamEvent::Delta {
                request_id: self.state.request_id.clone(),
                seq: self.state.next_seq(),
                text: chunk.text,
            });
        }

        let update = self.adapter.parse_stream_tool_call(payload);
        self.tools.extend(update.fragments);
        if update.finish_reason.is_some() {
            self.finish_reason = update.finish_reason;
        }
    }

    fn complete(&mut self) {
        self.close_source();
        self.phase = StreamPhase::Completed;

        let tool_calls = std::mem::take(&mut self.tools).finish();
        let finish_reason = match self.finish_reason.take() {
            Some(reason) if tool_calls.is_empty() || reason != "stop" => reason,
            _ if !tool_calls.is_empty() => "tool_calls".to_string(),
            _ => "stop".to_string(),
        };

        let tool_call_count = tool_calls.len();
        self.pending.push_back(StreamEvent::Finished {
            request_id: self.state.request_id.clone(),
            seq: self.state.next_seq(),
            usage: self.usage(),
            finish_reason,
            tool_calls,
        });
        self.report(StreamOutcome::Completed, tool_call_count);
    }

    fn abort(&mut self, error: GatewayError) {
        self.close_source();
        self.phase = StreamPhase::Aborted;

        self.pending.push_back(StreamEvent::Error {
            request_id: self.state.request_id.clone(),
            seq: self.state.next_seq(),
            error: error.clone(),
            usage: self.usage(),
        });
        let tool_call_count = self.tools.len();
        self.report(StreamOutcome::Failed(error), tool_call_count);
    }

    /// Drop the upstream connection now rather than when the translator goes.
    fn close_source(&mut self) {
        self.source = stream::empty().boxed();
    }

    fn report(&mut self, outcome: StreamOutcome, tool_calls: usize) {
        if let Some(hook) = self.on_finish.take() {
            hook(StreamSummary {
                request_id: self.state.request_id.clone(),
                usage: self.usage(),
                text_chars: self.text_chars,
                tool_calls,
                outcome,
            });
        }
    }
}

impl Stream for StreamTranslator {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        let this = self.get_mut();
        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(event));
            }
            if this.phase.is_terminal() {
                return Poll::Ready(None);
            }

            match this.source.poll_next_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(line))) => this.handle_line(&line),
                Poll::Ready(Some(Err(e))) => {
                    warn!(adapter = this.adapter.name(), "upstream stream failed: {}", e);
                    this.abort(e.into());
                }
                // EOF without an end marker still finalizes normally
                Poll::Ready(None) => this.complete(),
            }
        }
    }
}

impl Drop for StreamTranslator {
    fn drop(&mut self) {
        if !self.phase.is_terminal() {
            debug!(
                request_id = %self.state.request_id,
                adapter = self.adapter.name(),
                "stream dropped before completion, closing upstream"
            );
            let tool_call_count = self.tools.len();
            self.report(StreamOutcome::Cancelled, tool_call_count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::ProviderConfig, error::AdapterError};
    use std::sync::Mutex;

    fn adapter(kind: &str) -> Arc<Adapter> {
        Arc::new(Adapter::from_config(ProviderConfig::new("t", kind, "http://upstream.test", "m")).unwrap())
    }

    fn source(lines: &[&str]) -> EventSource {
        let lines: Vec<Result<String, AdapterError>> = lines.iter().map(|l| Ok(l.to_string())).collect();
        stream::iter(lines).boxed()
    }

    fn collect(translator: StreamTranslator) -> Vec<StreamEvent> {
        futures::executor::block_on(translator.collect())
    }

    #[test]
    fn test_hello_frames() {
        let translator = StreamTranslator::new(
            adapter("openai"),
            source(&[
                r#"data: {"choices":[{"index":0,"delta":{"content":"Hel"}}]}"#,
                "",
                ": keep-alive",
                r#"data: {"choices":[{"index":0,"delta":{"content":"lo"}}]}"#,
                "data: [DONE]",
                r#"data: {"choices":[{"index":0,"delta":{"content":"ignored"}}]}"#,
            ]),
            "m",
        );
        let events = collect(translator);
        assert_eq!(events.len(), 3);
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Delta { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Hello");
        assert!(matches!(&events[2], StreamEvent::Finished { finish_reason, .. } if finish_reason == "stop"));
        let seqs: Vec<u64> = events.iter().map(StreamEvent::seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn test_null_error_field_is_not_an_abort() {
        let mut translator = StreamTranslator::new(
            adapter("vllm"),
            source(&[
                r#"data: {"choices":[{"index":0,"delta":{"content":"Hel"}}],"error":null}"#,
                r#"data: {"choices":[{"index":0,"delta":{"content":"lo"}}]}"#,
                "data: [DONE]",
            ]),
            "m",
        );
        assert_eq!(translator.phase(), StreamPhase::Opened);

        let events = futures::executor::block_on(async {
            let mut events = Vec::new();
            while let Some(event) = translator.next().await {
                events.push(event);
            }
            events
        });
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Delta { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Hello");
        assert!(matches!(events.last(), Some(StreamEvent::Finished { .. })));
        assert_eq!(translator.phase(), StreamPhase::Completed);
    }

    #[test]
    fn test_usage_defaults_to_zero_without_report() {
        let events = collect(StreamTranslator::new(
            adapter("openai"),
            source(&[r#"data: {"choices":[{"index":0,"delta":{"content":"x"}}]}"#]),
            "m",
        ));
        match events.last() {
            Some(StreamEvent::Finished { usage, .. }) => assert_eq!(*usage, Usage::default()),
            other => panic!("unexpected terminal event {:?}", other),
        }
    }

    #[test]
    fn test_tool_fragments_reassembled() {
        let events = collect(StreamTranslator::new(
            adapter("openai"),
            source(&[
                r#"data: {"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"f","arguments":"{\"a\":"}}]}}]}"#,
                r#"data: {"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"1}"}}]}}]}"#,
                r#"data: {"choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}],"usage":{"prompt_tokens":7,"completion_tokens":5,"total_tokens":12}}"#,
                "data: [DONE]",
            ]),
            "m",
        ));
        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::Finished { tool_calls, finish_reason, usage, .. } => {
                assert_eq!(tool_calls.len(), 1);
                assert_eq!(tool_calls[0].arguments, "{\"a\":1}");
                assert_eq!(finish_reason, "tool_calls");
                assert_eq!(*usage, Usage::new(7, 5));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_transport_error_reports_partial_usage() {
        let lines: Vec<Result<String, AdapterError>> = vec![
            Ok(r#"data: {"choices":[{"index":0,"delta":{"content":"par"}}],"usage":{"prompt_tokens":4,"completion_tokens":1,"total_tokens":5}}"#.to_string()),
            Err(AdapterError::Transport("connection reset".to_string())),
        ];
        let summaries = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&summaries);
        let translator = StreamTranslator::new(adapter("openai"), stream::iter(lines).boxed(), "m")
            .on_finish(move |summary| sink.lock().unwrap().push(summary));

        let events = collect(translator);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[1],
            StreamEvent::Error { error: GatewayError::UpstreamUnavailable(_), usage, .. } if *usage == Usage::new(4, 1)
        ));

        let summaries = summaries.lock().unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].usage, Usage::new(4, 1));
        assert_eq!(summaries[0].text_chars, 3);
        assert!(matches!(summaries[0].outcome, StreamOutcome::Failed(_)));
    }

    #[test]
    fn test_dropped_stream_reports_cancellation_once() {
        let summaries = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&summaries);
        let mut translator = StreamTranslator::new(
            adapter("openai"),
            source(&[
                r#"data: {"choices":[{"index":0,"delta":{"content":"a"}}]}"#,
                r#"data: {"choices":[{"index":0,"delta":{"content":"b"}}]}"#,
            ]),
            "m",
        )
        .on_finish(move |summary| sink.lock().unwrap().push(summary));

        let first = futures::executor::block_on(translator.next());
        assert!(matches!(first, Some(StreamEvent::Delta { .. })));
        drop(translator);

        let summaries = summaries.lock().unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].outcome, StreamOutcome::Cancelled);
    }

    #[test]
    fn test_anthropic_event_lines() {
        let events = collect(StreamTranslator::new(
            adapter("anthropic"),
            source(&[
                "event: message_start",
                r#"data: {"type":"message_start","message":{"usage":{"input_tokens":10,"output_tokens":1}}}"#,
                "event: content_block_delta",
                r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
                r#"data: {"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":2}}"#,
                r#"data: {"type":"message_stop"}"#,
            ]),
            "m",
        ));
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[1],
            StreamEvent::Finished { usage, finish_reason, .. } if *usage == Usage::new(10, 2) && finish_reason == "stop"
        ));
    }

    #[test]
    fn test_in_band_error_aborts() {
        let events = collect(StreamTranslator::new(
            adapter("anthropic"),
            source(&[r#"data: {"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#]),
            "m",
        ));
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            StreamEvent::Error { error: GatewayError::UpstreamRejected(msg), .. } if msg == "Overloaded"
        ));
    }
}
