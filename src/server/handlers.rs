//! # Server Handlers
//!
//! HTTP route handlers. Each one extracts the caller credential, hands the
//! body to the [`Gateway`](crate::gateway::Gateway) and renders its answer.

use super::AppState;
use crate::{
    error::GatewayError,
    schemas::{ChatCompletionRequest, ModelEntry, ModelList},
    streaming::to_sse,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, StatusCode},
    response::{sse::KeepAlive, IntoResponse, Response, Sse},
    Json,
};
use serde_json::json;

/// Caller key from `Authorization: Bearer <key>` or `x-api-key`. Empty when
/// neither is present, which the resolver rejects as unauthenticated.
pub fn extract_api_key(headers: &HeaderMap) -> String {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .strip_prefix("Bearer ")
                .or_else(|| value.strip_prefix("bearer "))
        })
        .map(str::trim);

    bearer
        .or_else(|| {
            headers
                .get("x-api-key")
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
        })
        .unwrap_or_default()
        .to_string()
}

/// `POST /v1/chat/completions`
pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let Json(req) =
        payload.map_err(|rejection| GatewayError::InvalidRequest(rejection.body_text()))?;
    let api_key = extract_api_key(&headers);

    if req.is_streaming() {
        let stream = state.gateway().complete_stream(&api_key, req).await?;
        let sse = Sse::new(to_sse(stream.events, stream.model)).keep_alive(KeepAlive::default());
        Ok(sse.into_response())
    } else {
        let response = state.gateway().complete(&api_key, req).await?;
        Ok(Json(response).into_response())
    }
}

/// `GET /v1/models`: every model any backend serves, owned by its backend.
pub async fn list_models(State(state): State<AppState>) -> Json<ModelList> {
    let data = state
        .gateway()
        .registry()
        .all_models()
        .into_iter()
        .map(|(id, backend)| ModelEntry {
            id,
            object: "model".to_string(),
            owned_by: backend,
        })
        .collect();

    Json(ModelList {
        object: "list".to_string(),
        data,
    })
}

/// Health check handler
pub async fn health_check() -> impl IntoResponse {
    let health_status = json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": "nexus-nitro-gateway",
        "version": env!("CARGO_PKG_VERSION")
    });

    (StatusCode::OK, Json(health_status))
}

/// `GET /health/providers`: probe every backend. Answers 503 when any
/// backend is unreachable or refuses the probe.
pub async fn provider_health(State(state): State<AppState>) -> impl IntoResponse {
    let reports = state.gateway().registry().probe_all().await;
    let healthy = reports
        .iter()
        .all(|(_, report)| report.reachable && report.error.is_none());

    let providers: serde_json::Map<String, serde_json::Value> = reports
        .into_iter()
        .map(|(name, report)| (name, json!(report)))
        .collect();

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "providers": providers,
    });

    (status, Json(body))
}
