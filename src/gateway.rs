//! # Gateway Orchestrator
//!
//! Client resolution, admission, backend selection, the single upstream
//! attempt and usage reporting, composed per request. Nothing is retried.

use crate::{
    adapters::{Adapter, AdapterTrait, AdapterUtils},
    admission::AdmissionGate,
    clients::{Client, ClientResolver},
    core::canonical::{ChatRequest, ToolCall},
    error::GatewayError,
    registry::ProviderRegistry,
    schemas::{self, ChatCompletionRequest, ChatCompletionResponse, Choice, ResponseMessage, Usage},
    streaming::{StreamOutcome, StreamSummary, StreamTranslator},
    usage::{UsageLogger, UsageRecord, UsageStatus},
};
use std::{sync::Arc, time::Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A request that passed every check and is ready for its backend.
#[derive(Debug)]
struct Prepared {
    adapter: Arc<Adapter>,
    request: ChatRequest,
}

/// Streaming answer: the translated event stream plus its identity.
pub struct CompletionStream {
    pub request_id: String,
    pub model: String,
    pub events: StreamTranslator,
}

/// Pending usage report for one request, consumed exactly once.
struct UsageTicket {
    logger: Arc<dyn UsageLogger>,
    gate: Arc<AdmissionGate>,
    client_id: String,
    backend: String,
    model: String,
    stream: bool,
    started: Instant,
}

impl UsageTicket {
    fn finish(self, status: UsageStatus, usage: Usage, error: Option<&GatewayError>) {
        if usage.prompt_tokens > 0 || usage.completion_tokens > 0 {
            self.gate.record_usage(
                &self.client_id,
                u64::from(usage.prompt_tokens),
                u64::from(usage.completion_tokens),
            );
        }

        let record = UsageRecord {
            client_id: self.client_id,
            backend: self.backend,
            model: self.model,
            status,
            http_status: 200,
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            latency_ms: self.started.elapsed().as_millis() as u64,
            stream: self.stream,
            error: None,
        };
        let record = match error {
            Some(error) => record.with_error(error),
            None => record,
        };
        self.logger.record(record);
    }

    fn success(self, usage: Usage) {
        self.finish(UsageStatus::Success, usage, None);
    }

    fn failure(self, usage: Usage, error: &GatewayError) {
        self.finish(UsageStatus::Error, usage, Some(error));
    }

    fn from_summary(self, summary: StreamSummary) {
        match summary.outcome {
            StreamOutcome::Completed => self.success(summary.usage),
            StreamOutcome::Failed(error) => self.failure(summary.usage, &error),
            StreamOutcome::Cancelled => self.finish(UsageStatus::Cancelled, summary.usage, None),
        }
    }
}

pub struct Gateway {
    resolver: ClientResolver,
    gate: Arc<AdmissionGate>,
    registry: Arc<ProviderRegistry>,
    usage: Arc<dyn UsageLogger>,
    default_backend: Option<String>,
}

impl Gateway {
    pub fn new(
        resolver: ClientResolver,
        gate: Arc<AdmissionGate>,
        registry: Arc<ProviderRegistry>,
        usage: Arc<dyn UsageLogger>,
    ) -> Self {
        Self {
            resolver,
            gate,
            registry,
            usage,
            default_backend: None,
        }
    }

    /// Backend used for clients whose routing names none.
    pub fn with_default_backend(mut self, name: impl Into<String>) -> Self {
        self.default_backend = Some(name.into());
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn resolver(&self) -> &ClientResolver {
        &self.resolver
    }

    /// Drop expired client cache entries and idle rate state.
    pub fn sweep(&self) -> (usize, usize) {
        let clients = self.resolver.evict_expired();
        let states = self.gate.evict_idle();
        if clients + states > 0 {
            debug!(clients, states, "swept idle state");
        }
        (clients, states)
    }

    fn backend_for<'a>(&'a self, client: &'a Client) -> &'a str {
        let routed = client.budget.routing.backend_name.as_str();
        if routed.is_empty() {
            self.default_backend.as_deref().unwrap_or_default()
        } else {
            routed
        }
    }

    fn ticket(&self, client: &Client, model: &str, stream: bool, started: Instant) -> UsageTicket {
        UsageTicket {
            logger: Arc::clone(&self.usage),
            gate: Arc::clone(&self.gate),
            client_id: client.id.clone(),
            backend: self.backend_for(client).to_string(),
            model: model.to_string(),
            stream,
            started,
        }
    }

    fn prepare(&self, client: &Client, inbound: ChatCompletionRequest) -> Result<Prepared, GatewayError> {
        let mut request = ChatRequest::from_openai(inbound)?;
        let routing = &client.budget.routing;

        let adapter = self
            .registry
            .resolve(self.backend_for(client), routing.base_url_override.as_deref())?;

        if request.model.is_empty() {
            request.model = adapter.default_model().to_string();
        } else if !adapter.config().allows_model(&request.model) {
            return Err(GatewayError::InvalidRequest(format!(
                "model '{}' is not available on this backend",
                request.model
            )));
        }

        if let Some(prompt) = routing.system_prompt.as_deref().filter(|p| !p.is_empty()) {
            request.prepend_system_prompt(prompt);
        }

        self.gate.admit(client, &mut request)?;

        Ok(Prepared { adapter, request })
    }

    /// Single-shot completion.
    pub async fn complete(
        &self,
        api_key: &str,
        inbound: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, GatewayError> {
        let client = self.resolver.resolve(api_key).await?;
        let started = Instant::now();
        let mut ticket = self.ticket(&client, inbound.model.as_deref().unwrap_or_default(), false, started);

        let Prepared { adapter, request } = match self.prepare(&client, inbound) {
            Ok(prepared) => prepared,
            Err(error) => {
                debug!(client_id = %client.id, "request refused: {}", error);
                ticket.failure(Usage::default(), &error);
                return Err(error);
            }
        };
        ticket.model = request.model.clone();

        match Self::exchange(&adapter, &request).await {
            Ok(response) => {
                let usage = response.usage.unwrap_or_default();
                info!(
                    client_id = %client.id,
                    backend = %ticket.backend,
                    model = %request.model,
                    input_tokens = usage.prompt_tokens,
                    output_tokens = usage.completion_tokens,
                    "completion served"
                );
                ticket.success(usage);
                Ok(response)
            }
            Err(error) => {
                warn!(client_id = %client.id, backend = %ticket.backend, "completion failed: {}", error);
                ticket.failure(Usage::default(), &error);
                Err(error)
            }
        }
    }

    async fn exchange(adapter: &Adapter, request: &ChatRequest) -> Result<ChatCompletionResponse, GatewayError> {
        let raw = adapter.completion(request).await?;
        if !raw.is_success() {
            return Err(GatewayError::from_upstream(raw.status, &raw.body));
        }

        let parsed = adapter.parse_response(&raw.body)?;
        let tool_calls = adapter.parse_tool_calls(&raw.body);
        Ok(Self::build_response(&request.model, parsed.text, parsed.finish_reason, tool_calls, Usage::new(parsed.input_tokens, parsed.output_tokens)))
    }

    fn build_response(
        model: &str,
        text: String,
        finish_reason: Option<String>,
        tool_calls: Vec<ToolCall>,
        usage: Usage,
    ) -> ChatCompletionResponse {
        let finish_reason = match finish_reason {
            Some(reason) => reason,
            None if !tool_calls.is_empty() => "tool_calls".to_string(),
            None => "stop".to_string(),
        };
        let content = if text.is_empty() && !tool_calls.is_empty() {
            None
        } else {
            Some(text)
        };
        let tool_calls = (!tool_calls.is_empty())
            .then(|| tool_calls.iter().map(schemas::ToolCall::from).collect());

        ChatCompletionResponse {
            id: format!("chatcmpl-{}", Uuid::new_v4().simple()),
            object: "chat.completion".to_string(),
            created: AdapterUtils::current_timestamp(),
            model: model.to_string(),
            choices: vec![Choice {
                index: 0,
                message: ResponseMessage {
                    role: "assistant".to_string(),
                    content,
                    tool_calls,
                },
                finish_reason: Some(finish_reason),
            }],
            usage: Some(usage),
        }
    }

    /// Open a streaming completion. Failures before the upstream stream is
    /// open are returned as errors; later ones arrive as a terminal event.
    pub async fn complete_stream(
        &self,
        api_key: &str,
        inbound: ChatCompletionRequest,
    ) -> Result<CompletionStream, GatewayError> {
        let client = self.resolver.resolve(api_key).await?;
        let started = Instant::now();
        let mut ticket = self.ticket(&client, inbound.model.as_deref().unwrap_or_default(), true, started);

        let Prepared { adapter, mut request } = match self.prepare(&client, inbound) {
            Ok(prepared) => prepared,
            Err(error) => {
                debug!(client_id = %client.id, "stream refused: {}", error);
                ticket.failure(Usage::default(), &error);
                return Err(error);
            }
        };
        request.stream = true;
        ticket.model = request.model.clone();

        let source = match adapter.completion_stream(&request).await {
            Ok(source) => source,
            Err(error) => {
                let error = GatewayError::from(error);
                warn!(client_id = %client.id, backend = %ticket.backend, "stream open failed: {}", error);
                ticket.failure(Usage::default(), &error);
                return Err(error);
            }
        };

        let events = StreamTranslator::new(adapter, source, request.model.clone())
            .on_finish(move |summary| ticket.from_summary(summary));
        debug!(client_id = %client.id, request_id = events.request_id(), "stream opened");

        Ok(CompletionStream {
            request_id: events.request_id().to_string(),
            model: request.model,
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clients::{ClientBudget, InMemoryClientStore, Routing},
        config::ProviderConfig,
        core::clock::ManualClock,
        schemas::Message,
        usage::MemoryUsageLogger,
    };
    use std::time::Duration;

    fn gateway(budget: ClientBudget) -> (Gateway, Arc<MemoryUsageLogger>) {
        let mut store = InMemoryClientStore::new();
        store.insert("", "sk-1", Client { budget, ..Client::new("acme", "local") });
        let clock = Arc::new(ManualClock::new(0));
        let resolver = ClientResolver::new(Arc::new(store), "", Duration::from_secs(300), clock.clone());
        let gate = Arc::new(AdmissionGate::new(clock, Duration::from_secs(86_400)));
        let registry = ProviderRegistry::build(vec![
            ProviderConfig::new("local", "vllm", "http://127.0.0.1:9", "llama").with_allowed_models(["qwen"]),
        ])
        .unwrap();
        let logger = Arc::new(MemoryUsageLogger::new());
        let gateway = Gateway::new(resolver, gate, Arc::new(registry), logger.clone());
        (gateway, logger)
    }

    fn inbound(model: Option<&str>) -> ChatCompletionRequest {
        serde_json::from_value(serde_json::json!({
            "model": model,
            "messages": [Message::user("hi")]
        }))
        .unwrap()
    }

    fn budget_for(backend: &str) -> ClientBudget {
        ClientBudget {
            routing: Routing { backend_name: backend.to_string(), ..Default::default() },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_unknown_key_is_not_recorded() {
        let (gateway, logger) = gateway(budget_for("local"));
        let err = gateway.complete("sk-wrong", inbound(None)).await.unwrap_err();
        assert_eq!(err, GatewayError::invalid_credential());
        assert!(logger.records().is_empty());
    }

    #[tokio::test]
    async fn test_model_outside_allowed_set() {
        let (gateway, logger) = gateway(budget_for("local"));
        let err = gateway.complete("sk-1", inbound(Some("gpt-4o"))).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
        let records = logger.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, UsageStatus::Error);
        assert_eq!(records[0].http_status, 400);
    }

    #[tokio::test]
    async fn test_unconfigured_backend() {
        let (gateway, _) = gateway(budget_for("nowhere"));
        let err = gateway.complete("sk-1", inbound(None)).await.unwrap_err();
        assert_eq!(err, GatewayError::NotConfigured("nowhere".to_string()));
    }

    #[tokio::test]
    async fn test_empty_routing_uses_default_backend() {
        let (gateway, _) = gateway(budget_for(""));
        let gateway = gateway.with_default_backend("missing-too");
        let err = gateway.complete("sk-1", inbound(None)).await.unwrap_err();
        assert_eq!(err, GatewayError::NotConfigured("missing-too".to_string()));
    }

    #[test]
    fn test_build_response_tool_calls_only() {
        let response = Gateway::build_response(
            "m",
            String::new(),
            None,
            vec![ToolCall { id: "c".into(), name: "f".into(), arguments: "{}".into() }],
            Usage::new(1, 1),
        );
        let choice = &response.choices[0];
        assert_eq!(choice.finish_reason.as_deref(), Some("tool_calls"));
        assert!(choice.message.content.is_none());
        assert_eq!(choice.message.tool_calls.as_ref().unwrap()[0].function.name, "f");
    }
}
