//! # Usage Reporting
//!
//! One [`UsageRecord`] per finished request, streaming or not, including
//! failed and cancelled ones, handed to a [`UsageLogger`].

use crate::error::GatewayError;
use serde::Serialize;
use std::sync::Mutex;
use tracing::info;

/// Terminal status of a request, as reported to the usage logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageStatus {
    Success,
    Error,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageRecord {
    pub client_id: String,
    pub backend: String,
    pub model: String,
    pub status: UsageStatus,
    /// Caller-facing HTTP status
    pub http_status: u16,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub latency_ms: u64,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UsageRecord {
    pub fn with_error(mut self, error: &GatewayError) -> Self {
        self.status = UsageStatus::Error;
        self.http_status = error.status_code();
        self.error = Some(error.to_string());
        self
    }
}

/// Sink for usage records. Called from request tasks and from drop paths,
/// so implementations must not block; hand slow work to a background task.
pub trait UsageLogger: Send + Sync {
    fn record(&self, record: UsageRecord);
}

/// Emits each record as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingUsageLogger;

impl UsageLogger for TracingUsageLogger {
    fn record(&self, record: UsageRecord) {
        info!(
            target: "nngw::usage",
            client_id = %record.client_id,
            backend = %record.backend,
            model = %record.model,
            status = ?record.status,
            http_status = record.http_status,
            input_tokens = record.input_tokens,
            output_tokens = record.output_tokens,
            latency_ms = record.latency_ms,
            stream = record.stream,
            error = record.error.as_deref().unwrap_or(""),
            "request finished"
        );
    }
}

/// Keeps records in memory; useful for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryUsageLogger {
    records: Mutex<Vec<UsageRecord>>,
}

impl MemoryUsageLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<UsageRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl UsageLogger for MemoryUsageLogger {
    fn record(&self, record: UsageRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }
}
