//! # Error Types
//!
//! Two layers of errors live here. [`AdapterError`] is what a provider
//! adapter reports about one upstream exchange. [`GatewayError`] is the
//! caller-facing taxonomy every failure is folded into before it leaves the
//! gateway, always rendered as the OpenAI-style envelope
//! `{"error": {"message", "type", "code"}}`.

#[cfg(feature = "server")]
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::schemas::{ErrorDetails, ErrorEnvelope};

/// Rate-limit window that denied a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateWindow {
    Minute,
    Hour,
    Day,
}

impl RateWindow {
    pub fn seconds(self) -> u64 {
        match self {
            RateWindow::Minute => 60,
            RateWindow::Hour => 3_600,
            RateWindow::Day => 86_400,
        }
    }
}

impl fmt::Display for RateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RateWindow::Minute => "minute",
            RateWindow::Hour => "hour",
            RateWindow::Day => "day",
        })
    }
}

/// Quota dimension that denied a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaDimension {
    RequestsPerDay,
    InputTokensPerDay,
    OutputTokensPerDay,
    InputTokensPerRequest,
}

impl fmt::Display for QuotaDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QuotaDimension::RequestsPerDay => "daily request",
            QuotaDimension::InputTokensPerDay => "daily input token",
            QuotaDimension::OutputTokensPerDay => "daily output token",
            QuotaDimension::InputTokensPerRequest => "per-request input token",
        })
    }
}

/// Caller-facing error taxonomy.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Unauthenticated(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("rate limit exceeded for the current {window} window")]
    RateLimited {
        window: RateWindow,
        retry_after_secs: u64,
    },
    /// The upstream provider throttled the gateway.
    #[error("{0}")]
    UpstreamRateLimited(String),
    #[error("{dimension} quota exceeded")]
    QuotaExceeded { dimension: QuotaDimension },
    #[error("{0}")]
    InvalidRequest(String),
    #[error("{0}")]
    UpstreamUnavailable(String),
    #[error("{0}")]
    UpstreamRejected(String),
    #[error("backend '{0}' is not configured")]
    NotConfigured(String),
    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    pub fn invalid_credential() -> Self {
        GatewayError::Unauthenticated("invalid API key".to_string())
    }

    /// Fold a non-2xx upstream answer into the taxonomy. The provider status
    /// itself is never passed through.
    pub fn from_upstream(status: u16, body: &[u8]) -> Self {
        let message = extract_upstream_message(body)
            .unwrap_or_else(|| format!("upstream provider returned HTTP {}", status));
        match status {
            429 => GatewayError::UpstreamRateLimited(message),
            403 => GatewayError::Forbidden(message),
            401 => GatewayError::Unauthenticated(message),
            500..=599 => GatewayError::UpstreamUnavailable(message),
            _ => GatewayError::UpstreamRejected(message),
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Unauthenticated(_) => 401,
            GatewayError::Forbidden(_) => 403,
            GatewayError::RateLimited { .. }
            | GatewayError::UpstreamRateLimited(_)
            | GatewayError::QuotaExceeded { .. } => 429,
            GatewayError::InvalidRequest(_) => 400,
            GatewayError::UpstreamUnavailable(_) => 503,
            GatewayError::UpstreamRejected(_) => 502,
            GatewayError::NotConfigured(_) | GatewayError::Internal(_) => 500,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::Unauthenticated(_) => "authentication_error",
            GatewayError::Forbidden(_) => "permission_error",
            GatewayError::RateLimited { .. } | GatewayError::UpstreamRateLimited(_) => {
                "rate_limit_error"
            }
            GatewayError::QuotaExceeded { .. } => "insufficient_quota",
            GatewayError::InvalidRequest(_) => "invalid_request_error",
            GatewayError::UpstreamUnavailable(_) => "upstream_unavailable",
            GatewayError::UpstreamRejected(_) => "upstream_error",
            GatewayError::NotConfigured(_) => "configuration_error",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    pub fn code(&self) -> Option<String> {
        match self {
            GatewayError::Unauthenticated(_) => Some("invalid_api_key".to_string()),
            GatewayError::RateLimited { window, .. } => Some(format!("rate_limit_{}", window)),
            GatewayError::QuotaExceeded { dimension } => Some(
                serde_json::to_value(dimension)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_else(|| "quota_exceeded".to_string()),
            ),
            _ => None,
        }
    }

    pub fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error: ErrorDetails {
                message: self.to_string(),
                r#type: self.error_type().to_string(),
                code: self.code(),
            },
        }
    }
}

#[cfg(feature = "server")]
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Json(self.to_envelope())).into_response();

        if let GatewayError::RateLimited {
            retry_after_secs, ..
        } = &self
        {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

/// Pull a human-readable message out of an upstream error body.
///
/// Recognized shapes, in order:
/// - `{"error": {"message": "..."}}` (OpenAI, Azure, Gemini)
/// - `{"type": "error", "error": {"message": "..."}}` (Anthropic)
/// - `{"message": "..."}`
/// - `{"error": "..."}`
pub fn extract_upstream_message(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let text = |v: Option<&serde_json::Value>| {
        v.and_then(serde_json::Value::as_str)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
    };
    text(value.get("error").and_then(|e| e.get("message")))
        .or_else(|| text(value.get("message")))
        .or_else(|| text(value.get("error")))
}

/// Failure of a single upstream exchange, as reported by an adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The request never produced an HTTP answer (DNS, connect, timeout, reset).
    #[error("transport failure: {0}")]
    Transport(String),
    /// The upstream answered with a non-2xx status.
    #[error("upstream returned HTTP {status}")]
    Status { status: u16, body: bytes::Bytes },
    #[error("malformed upstream response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AdapterError::Transport("request timeout - backend did not respond in time".to_string())
        } else if err.is_connect() {
            AdapterError::Transport("connection failed - unable to reach backend".to_string())
        } else if err.is_decode() {
            AdapterError::Malformed(err.to_string())
        } else {
            AdapterError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AdapterError {
    fn from(err: serde_json::Error) -> Self {
        AdapterError::Malformed(err.to_string())
    }
}

impl From<AdapterError> for GatewayError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Transport(msg) => GatewayError::UpstreamUnavailable(msg),
            AdapterError::Status { status, body } => GatewayError::from_upstream(status, &body),
            AdapterError::Malformed(_) => GatewayError::UpstreamRejected(
                "upstream provider returned a malformed response".to_string(),
            ),
        }
    }
}
