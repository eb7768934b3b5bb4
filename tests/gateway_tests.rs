//! # Gateway HTTP Tests
//!
//! The full router driven with `tower::ServiceExt::oneshot` against wiremock
//! upstreams: authentication, admission, routing, JSON and SSE answers.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use nexus_nitro_gateway::{
    admission::AdmissionGate,
    clients::{Client, ClientBudget, ClientResolver, InMemoryClientStore, Routing},
    config::ProviderConfig,
    core::ManualClock,
    create_router,
    usage::{MemoryUsageLogger, UsageStatus},
    AppState, Gateway, ProviderRegistry,
};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tower::ServiceExt;
use wiremock::{
    matchers::{body_partial_json, method, path},
    Mock, MockServer, ResponseTemplate,
};

const SALT: &str = "pepper";

struct TestApp {
    router: Router,
    logger: Arc<MemoryUsageLogger>,
}

fn completion_body(text: &str) -> Value {
    json!({
        "id": "chatcmpl-up",
        "object": "chat.completion",
        "created": 1,
        "model": "llama",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 11, "completion_tokens": 4, "total_tokens": 15}
    })
}

fn routed(backend: &str) -> Routing {
    Routing { backend_name: backend.to_string(), ..Default::default() }
}

fn app(upstream: &MockServer, clients: Vec<(&str, Client)>) -> TestApp {
    let mut store = InMemoryClientStore::new();
    for (key, client) in clients {
        store.insert(SALT, key, client);
    }

    let clock = Arc::new(ManualClock::new(1_700_000_000));
    let resolver = ClientResolver::new(Arc::new(store), SALT, Duration::from_secs(300), clock.clone());
    let gate = Arc::new(AdmissionGate::new(clock, Duration::from_secs(86_400)));
    let registry = ProviderRegistry::build(vec![
        ProviderConfig::new("local", "vllm", upstream.uri(), "llama").with_allowed_models(["qwen"]),
    ])
    .unwrap();

    let logger = Arc::new(MemoryUsageLogger::new());
    let gateway = Gateway::new(resolver, gate, Arc::new(registry), logger.clone())
        .with_default_backend("local");

    TestApp {
        router: create_router(AppState::new(gateway), "*"),
        logger,
    }
}

fn client(budget: ClientBudget) -> Client {
    Client {
        budget: ClientBudget { routing: routed("local"), ..budget },
        ..Client::new("acme", "local")
    }
}

fn chat(key: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(key) = key {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", key));
    }
    builder.body(Body::from(serde_json::to_vec(&body).unwrap())).unwrap()
}

fn hello() -> Value {
    json!({"messages": [{"role": "user", "content": "Hello"}]})
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn text_body(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn mount_completion(server: &MockServer, text: &str) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(text)))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_chat_completion_success() {
    let upstream = MockServer::start().await;
    mount_completion(&upstream, "Hi!").await;
    let app = app(&upstream, vec![("sk-acme", client(ClientBudget::default()))]);

    let response = app.router.oneshot(chat(Some("sk-acme"), hello())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["model"], "llama");
    assert_eq!(body["choices"][0]["message"]["content"], "Hi!");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert_eq!(body["usage"]["total_tokens"], 15);

    let records = app.logger.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, UsageStatus::Success);
    assert_eq!((records[0].input_tokens, records[0].output_tokens), (11, 4));
}

#[tokio::test]
async fn test_x_api_key_header_accepted() {
    let upstream = MockServer::start().await;
    mount_completion(&upstream, "ok").await;
    let app = app(&upstream, vec![("sk-acme", client(ClientBudget::default()))]);

    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-api-key", "sk-acme")
        .body(Body::from(serde_json::to_vec(&hello()).unwrap()))
        .unwrap();

    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_missing_and_unknown_keys_rejected() {
    let upstream = MockServer::start().await;
    let app = app(&upstream, vec![("sk-acme", client(ClientBudget::default()))]);

    let response = app.router.clone().oneshot(chat(None, hello())).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["error"]["type"], "authentication_error");

    let response = app.router.oneshot(chat(Some("sk-nope"), hello())).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"]["code"], "invalid_api_key");
    assert!(app.logger.records().is_empty());
}

#[tokio::test]
async fn test_inactive_client_rejected_like_unknown() {
    let upstream = MockServer::start().await;
    let inactive = Client { active: false, ..client(ClientBudget::default()) };
    let app = app(&upstream, vec![("sk-old", inactive)]);

    let response = app.router.oneshot(chat(Some("sk-old"), hello())).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_minute_rate_limit_sets_retry_after() {
    let upstream = MockServer::start().await;
    mount_completion(&upstream, "ok").await;
    let budget = ClientBudget { rate_limit_per_minute: Some(2), ..Default::default() };
    let app = app(&upstream, vec![("sk-acme", client(budget))]);

    for _ in 0..2 {
        let response = app.router.clone().oneshot(chat(Some("sk-acme"), hello())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app.router.oneshot(chat(Some("sk-acme"), hello())).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    // 1_700_000_000 is 20s into its minute
    assert_eq!(response.headers()[header::RETRY_AFTER], "40");
    let body = json_body(response).await;
    assert_eq!(body["error"]["type"], "rate_limit_error");
    assert_eq!(body["error"]["code"], "rate_limit_minute");

    let records = app.logger.records();
    assert_eq!(records.len(), 3);
    assert_eq!(records[2].http_status, 429);
}

#[tokio::test]
async fn test_output_ceiling_clamps_upstream_request() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"max_tokens": 100})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("short")))
        .expect(1)
        .mount(&upstream)
        .await;
    let budget = ClientBudget { max_output_tokens_per_request: Some(100), ..Default::default() };
    let app = app(&upstream, vec![("sk-acme", client(budget))]);

    let body = json!({"messages": [{"role": "user", "content": "Hello"}], "max_tokens": 4000});
    let response = app.router.oneshot(chat(Some("sk-acme"), body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_system_prompt_prepended() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({
            "messages": [
                {"role": "system", "content": "You are terse."},
                {"role": "user", "content": "Hello"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ok")))
        .expect(1)
        .mount(&upstream)
        .await;
    let budget = ClientBudget {
        routing: Routing { system_prompt: Some("You are terse.".to_string()), ..routed("local") },
        ..Default::default()
    };
    let app = app(&upstream, vec![("sk-acme", Client { budget, ..Client::new("acme", "local") })]);

    let response = app.router.oneshot(chat(Some("sk-acme"), hello())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_base_url_override_routes_to_other_server() {
    let primary = MockServer::start().await;
    let dedicated = MockServer::start().await;
    mount_completion(&dedicated, "from dedicated").await;

    let budget = ClientBudget {
        routing: Routing { base_url_override: Some(dedicated.uri()), ..routed("local") },
        ..Default::default()
    };
    let app = app(&primary, vec![("sk-acme", Client { budget, ..Client::new("acme", "local") })]);

    let response = app.router.oneshot(chat(Some("sk-acme"), hello())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["choices"][0]["message"]["content"], "from dedicated");
}

#[tokio::test]
async fn test_model_not_served_is_bad_request() {
    let upstream = MockServer::start().await;
    let app = app(&upstream, vec![("sk-acme", client(ClientBudget::default()))]);

    let body = json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "Hello"}]});
    let response = app.router.oneshot(chat(Some("sk-acme"), body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_empty_messages_is_bad_request() {
    let upstream = MockServer::start().await;
    let app = app(&upstream, vec![("sk-acme", client(ClientBudget::default()))]);

    let response = app.router.oneshot(chat(Some("sk-acme"), json!({"messages": []}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_body_uses_error_envelope() {
    let upstream = MockServer::start().await;
    let app = app(&upstream, vec![("sk-acme", client(ClientBudget::default()))]);

    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, "Bearer sk-acme")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(response).await;
    assert_eq!(body["error"]["type"], "invalid_request_error");
    assert!(body["error"]["message"].as_str().unwrap().contains("JSON"));
    assert!(app.logger.records().is_empty());
}

#[tokio::test]
async fn test_upstream_failure_normalized() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": {"message": "CUDA out of memory"}})))
        .mount(&upstream)
        .await;
    let app = app(&upstream, vec![("sk-acme", client(ClientBudget::default()))]);

    let response = app.router.oneshot(chat(Some("sk-acme"), hello())).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["error"]["type"], "upstream_unavailable");
    assert_eq!(body["error"]["message"], "CUDA out of memory");

    let records = app.logger.records();
    assert_eq!(records[0].status, UsageStatus::Error);
    assert_eq!(records[0].http_status, 503);
}

#[tokio::test]
async fn test_streaming_response_is_sse() {
    let upstream = MockServer::start().await;
    let sse = concat!(
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":2,\"total_tokens\":5}}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .mount(&upstream)
        .await;
    let app = app(&upstream, vec![("sk-acme", client(ClientBudget::default()))]);

    let body = json!({"messages": [{"role": "user", "content": "Hello"}], "stream": true});
    let response = app.router.oneshot(chat(Some("sk-acme"), body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let text = text_body(response).await;
    let payloads: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .collect();
    assert_eq!(payloads.last(), Some(&"[DONE]"));

    let chunks: Vec<Value> = payloads
        .iter()
        .filter(|p| **p != "[DONE]")
        .map(|p| serde_json::from_str(p).unwrap())
        .collect();
    assert_eq!(chunks[0]["object"], "chat.completion.chunk");
    assert_eq!(chunks[0]["choices"][0]["delta"]["role"], "assistant");
    let content: String = chunks
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert_eq!(content, "Hello");
    let last = chunks.last().unwrap();
    assert_eq!(last["choices"][0]["finish_reason"], "stop");
    assert_eq!(last["usage"]["total_tokens"], 5);

    let records = app.logger.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].stream);
    assert_eq!(records[0].status, UsageStatus::Success);
}

#[tokio::test]
async fn test_list_models() {
    let upstream = MockServer::start().await;
    let app = app(&upstream, vec![]);

    let request = Request::builder().uri("/v1/models").body(Body::empty()).unwrap();
    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["object"], "list");
    let ids: Vec<&str> = body["data"].as_array().unwrap().iter().map(|m| m["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["llama", "qwen"]);
    assert_eq!(body["data"][0]["owned_by"], "local");
}

#[tokio::test]
async fn test_health_endpoints() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&upstream)
        .await;
    let app = app(&upstream, vec![]);

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "healthy");

    let request = Request::builder().uri("/health/providers").body(Body::empty()).unwrap();
    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["providers"]["local"]["reachable"], true);
}

#[tokio::test]
async fn test_provider_health_degraded() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&upstream)
        .await;
    let app = app(&upstream, vec![]);

    let request = Request::builder().uri("/health/providers").body(Body::empty()).unwrap();
    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["status"], "degraded");
}
