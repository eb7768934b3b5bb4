//! # Admission Gate
//!
//! Every request passes here before any adapter is called:
//!
//! 1. per-request input ceiling, estimated from the request text
//! 2. daily request, input-token and output-token quotas
//! 3. minute, hour and day fixed-window rate limits
//! 4. `max_output_tokens` clamped down to the per-request ceiling
//!
//! Steps 2 and 3 run under the client's map-entry lock and charge nothing
//! unless every check passes. Rate state is a cache: it is created on first
//! sight of a client and evicted after a period of inactivity.

pub mod bucket;

use crate::{
    clients::{Client, ClientBudget},
    core::{canonical::ChatRequest, clock::Clock},
    error::{GatewayError, QuotaDimension, RateWindow},
};
use bucket::{DailyUsage, FixedWindowBucket};
use dashmap::DashMap;
use std::{sync::Arc, time::Duration};
use tracing::debug;

const WINDOWS: [RateWindow; 3] = [RateWindow::Minute, RateWindow::Hour, RateWindow::Day];

/// Mutable per-client accounting.
#[derive(Debug, Clone)]
pub struct RateState {
    buckets: [FixedWindowBucket; 3],
    daily: DailyUsage,
    last_seen: u64,
}

impl RateState {
    fn new(now: u64) -> Self {
        Self {
            buckets: WINDOWS.map(|window| FixedWindowBucket::new(window, now)),
            daily: DailyUsage::new(now),
            last_seen: now,
        }
    }

    fn refresh(&mut self, now: u64) {
        for bucket in &mut self.buckets {
            bucket.refresh(now);
        }
        self.daily.refresh(now);
        self.last_seen = now;
    }

    /// All three windows or nothing.
    fn try_consume(&mut self, budget: &ClientBudget, now: u64) -> Result<(), GatewayError> {
        for bucket in &self.buckets {
            if let Some(capacity) = budget.rate_limit(bucket.window()) {
                if !bucket.has_capacity(capacity) {
                    return Err(GatewayError::RateLimited {
                        window: bucket.window(),
                        retry_after_secs: bucket.retry_after(now),
                    });
                }
            }
        }
        for bucket in &mut self.buckets {
            bucket.consume();
        }
        Ok(())
    }

    fn check_quota(&self, budget: &ClientBudget, estimated_input: u64) -> Result<(), GatewayError> {
        let exceeded = |dimension| Err(GatewayError::QuotaExceeded { dimension });

        if let Some(limit) = budget.daily_request_quota() {
            if self.daily.requests >= limit {
                return exceeded(QuotaDimension::RequestsPerDay);
            }
        }
        if let Some(limit) = budget.daily_input_quota() {
            if self.daily.input_tokens.saturating_add(estimated_input) > limit {
                return exceeded(QuotaDimension::InputTokensPerDay);
            }
        }
        if let Some(limit) = budget.daily_output_quota() {
            if self.daily.output_tokens >= limit {
                return exceeded(QuotaDimension::OutputTokensPerDay);
            }
        }
        Ok(())
    }

    pub fn daily(&self) -> DailyUsage {
        self.daily
    }
}

/// Owned, injectable gate over every client's [`RateState`].
pub struct AdmissionGate {
    states: DashMap<String, RateState>,
    clock: Arc<dyn Clock>,
    idle_ttl_secs: u64,
}

impl AdmissionGate {
    pub fn new(clock: Arc<dyn Clock>, idle_ttl: Duration) -> Self {
        Self {
            states: DashMap::new(),
            clock,
            idle_ttl_secs: idle_ttl.as_secs(),
        }
    }

    /// Admit `request` for `client`, clamping its output ceiling in place.
    pub fn admit(&self, client: &Client, request: &mut ChatRequest) -> Result<(), GatewayError> {
        let budget = &client.budget;
        let estimated_input = request.estimated_input_tokens();

        if let Some(ceiling) = budget.input_ceiling() {
            if estimated_input > ceiling {
                debug!(client_id = %client.id, estimated_input, ceiling, "request input over ceiling");
                return Err(GatewayError::QuotaExceeded {
                    dimension: QuotaDimension::InputTokensPerRequest,
                });
            }
        }

        let now = self.clock.now_secs();
        {
            let mut state = self
                .states
                .entry(client.id.clone())
                .or_insert_with(|| RateState::new(now));
            state.refresh(now);
            state.check_quota(budget, estimated_input)?;
            state.try_consume(budget, now)?;
            state.daily.requests += 1;
        }

        if let Some(ceiling) = budget.output_ceiling() {
            let clamped = request.max_output_tokens.map_or(ceiling, |asked| asked.min(ceiling));
            if request.max_output_tokens != Some(clamped) {
                debug!(
                    client_id = %client.id,
                    requested = ?request.max_output_tokens,
                    clamped,
                    "max output tokens clamped"
                );
            }
            request.max_output_tokens = Some(clamped);
        }

        Ok(())
    }

    /// Rate windows only, without quota checks.
    pub fn try_consume(&self, client_id: &str, budget: &ClientBudget) -> Result<(), GatewayError> {
        let now = self.clock.now_secs();
        let mut state = self
            .states
            .entry(client_id.to_string())
            .or_insert_with(|| RateState::new(now));
        state.refresh(now);
        state.try_consume(budget, now)
    }

    /// Add tokens actually used to the client's daily tally.
    pub fn record_usage(&self, client_id: &str, input_tokens: u64, output_tokens: u64) {
        let now = self.clock.now_secs();
        if let Some(mut state) = self.states.get_mut(client_id) {
            state.refresh(now);
            state.daily.input_tokens = state.daily.input_tokens.saturating_add(input_tokens);
            state.daily.output_tokens = state.daily.output_tokens.saturating_add(output_tokens);
        }
    }

    pub fn daily_usage(&self, client_id: &str) -> Option<DailyUsage> {
        let now = self.clock.now_secs();
        self.states.get_mut(client_id).map(|mut state| {
            state.daily.refresh(now);
            state.daily
        })
    }

    /// Drop state for clients idle longer than the horizon.
    pub fn evict_idle(&self) -> usize {
        let now = self.clock.now_secs();
        let before = self.states.len();
        self.states
            .retain(|_, state| now.saturating_sub(state.last_seen) < self.idle_ttl_secs);
        before - self.states.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.states.len()
    }
}
