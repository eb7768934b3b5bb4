//! # Server Module
//!
//! Router, handlers and middleware of the OpenAI-compatible HTTP surface.

pub mod handlers;
pub mod state;

pub use handlers::{chat_completions, extract_api_key, health_check, list_models, provider_health};
pub use state::AppState;

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    trace::{self, TraceLayer},
};
use tracing::{warn, Level};

/// CORS policy for `origin`: `*` is permissive, anything else is an exact
/// origin. An unparsable origin falls back to permissive with a warning.
pub fn cors_layer(origin: &str) -> CorsLayer {
    if origin == "*" {
        return CorsLayer::permissive();
    }
    match HeaderValue::from_str(origin) {
        Ok(value) => CorsLayer::new()
            .allow_origin(AllowOrigin::exact(value))
            .allow_methods(Any)
            .allow_headers(Any),
        Err(_) => {
            warn!(origin, "invalid CORS origin, allowing any");
            CorsLayer::permissive()
        }
    }
}

/// Create router with all routes and middleware
pub fn create_router(state: AppState, cors_origin: &str) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .route("/health", get(health_check))
        .route("/health/providers", get(provider_health))
        .layer(
            ServiceBuilder::new()
                .layer(CompressionLayer::new())
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                        .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(cors_layer(cors_origin)),
        )
        .with_state(state)
}
