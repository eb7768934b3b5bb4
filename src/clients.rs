//! # Clients and Credential Resolution
//!
//! A client is an API-key holder with a resource budget and routing rules.
//! The [`ClientStore`] trait is the seam to whatever owns client records;
//! [`ClientResolver`] fronts it with a short-lived cache keyed by the salted
//! key hash, so plaintext keys are never stored or used as lookup keys.

use crate::{
    core::clock::Clock,
    error::{GatewayError, RateWindow},
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{collections::HashMap, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, warn};

/// Where a client's traffic goes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routing {
    pub backend_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url_override: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

/// Per-client limits. An absent or zero limit means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientBudget {
    pub rate_limit_per_minute: Option<u32>,
    pub rate_limit_per_hour: Option<u32>,
    pub rate_limit_per_day: Option<u32>,
    pub quota_input_tokens_per_day: Option<u64>,
    pub quota_output_tokens_per_day: Option<u64>,
    pub quota_requests_per_day: Option<u64>,
    pub max_input_tokens_per_request: Option<u64>,
    pub max_output_tokens_per_request: Option<u32>,
    pub routing: Routing,
}

fn limit<T: Copy + Default + PartialEq>(value: Option<T>) -> Option<T> {
    value.filter(|v| *v != T::default())
}

impl ClientBudget {
    pub fn rate_limit(&self, window: RateWindow) -> Option<u32> {
        limit(match window {
            RateWindow::Minute => self.rate_limit_per_minute,
            RateWindow::Hour => self.rate_limit_per_hour,
            RateWindow::Day => self.rate_limit_per_day,
        })
    }

    pub fn daily_input_quota(&self) -> Option<u64> {
        limit(self.quota_input_tokens_per_day)
    }

    pub fn daily_output_quota(&self) -> Option<u64> {
        limit(self.quota_output_tokens_per_day)
    }

    pub fn daily_request_quota(&self) -> Option<u64> {
        limit(self.quota_requests_per_day)
    }

    pub fn input_ceiling(&self) -> Option<u64> {
        limit(self.max_input_tokens_per_request)
    }

    pub fn output_ceiling(&self) -> Option<u32> {
        limit(self.max_output_tokens_per_request)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub budget: ClientBudget,
}

fn default_active() -> bool {
    true
}

impl Client {
    pub fn new(id: impl Into<String>, backend_name: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            active: true,
            budget: ClientBudget {
                routing: Routing {
                    backend_name: backend_name.into(),
                    ..Default::default()
                },
                ..Default::default()
            },
        }
    }
}

/// Client entry as stored in a clients file. Either the precomputed
/// `key_hash` or a plaintext `api_key` (hashed on load) must be present.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientRecord {
    #[serde(flatten)]
    pub client: Client,
    #[serde(default)]
    pub key_hash: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("client store unavailable: {0}")]
    Unavailable(String),
    #[error("client record '{0}' has neither key_hash nor api_key")]
    MissingKey(String),
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        GatewayError::Internal(err.to_string())
    }
}

/// Salted SHA-256 of an API key, lowercase hex.
pub fn hash_api_key(salt: &str, key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// External source of truth for clients.
#[async_trait::async_trait]
pub trait ClientStore: Send + Sync {
    async fn get_by_key_hash(&self, key_hash: &str) -> Result<Option<Client>, StoreError>;

    async fn get_by_id(&self, id: &str) -> Result<Option<Client>, StoreError>;
}

/// Client store held in memory, loadable from a clients file.
#[derive(Debug, Default)]
pub struct InMemoryClientStore {
    by_hash: HashMap<String, Client>,
    hash_by_id: HashMap<String, String>,
}

impl InMemoryClientStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<ClientRecord>, salt: &str) -> Result<Self, StoreError> {
        let mut store = Self::new();
        for record in records {
            let hash = match (record.key_hash, record.api_key) {
                (Some(hash), _) => hash.to_ascii_lowercase(),
                (None, Some(key)) => hash_api_key(salt, &key),
                (None, None) => return Err(StoreError::MissingKey(record.client.id)),
            };
            store.insert_hashed(hash, record.client);
        }
        Ok(store)
    }

    pub fn insert(&mut self, salt: &str, key: &str, client: Client) {
        self.insert_hashed(hash_api_key(salt, key), client);
    }

    pub fn insert_hashed(&mut self, key_hash: String, client: Client) {
        if let Some(previous) = self.hash_by_id.insert(client.id.clone(), key_hash.clone()) {
            warn!(client_id = %client.id, "client defined twice, replacing earlier key");
            self.by_hash.remove(&previous);
        }
        self.by_hash.insert(key_hash, client);
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}

#[async_trait::async_trait]
impl ClientStore for InMemoryClientStore {
    async fn get_by_key_hash(&self, key_hash: &str) -> Result<Option<Client>, StoreError> {
        Ok(self.by_hash.get(key_hash).cloned())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Client>, StoreError> {
        Ok(self
            .hash_by_id
            .get(id)
            .and_then(|hash| self.by_hash.get(hash))
            .cloned())
    }
}

#[derive(Debug, Clone)]
struct CachedClient {
    client: Client,
    expires_at: u64,
}

/// Maps presented keys to clients, caching store hits for a fixed horizon.
pub struct ClientResolver {
    store: Arc<dyn ClientStore>,
    cache: DashMap<String, CachedClient>,
    ttl_secs: u64,
    salt: String,
    clock: Arc<dyn Clock>,
}

impl ClientResolver {
    pub fn new(
        store: Arc<dyn ClientStore>,
        salt: impl Into<String>,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            cache: DashMap::new(),
            ttl_secs: ttl.as_secs(),
            salt: salt.into(),
            clock,
        }
    }

    /// Unknown and inactive keys both yield the same invalid-credential error.
    pub async fn resolve(&self, presented_key: &str) -> Result<Client, GatewayError> {
        let presented_key = presented_key.trim();
        if presented_key.is_empty() {
            return Err(GatewayError::Unauthenticated("missing API key".to_string()));
        }

        let key_hash = hash_api_key(&self.salt, presented_key);
        let now = self.clock.now_secs();

        let cached = self
            .cache
            .get(&key_hash)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.client.clone());
        if let Some(client) = cached {
            return Ok(client);
        }

        let client = self.store.get_by_key_hash(&key_hash).await?;
        match client {
            Some(client) if client.active => {
                debug!(client_id = %client.id, "client resolved from store");
                self.cache.insert(
                    key_hash,
                    CachedClient {
                        client: client.clone(),
                        expires_at: now.saturating_add(self.ttl_secs),
                    },
                );
                Ok(client)
            }
            Some(client) => {
                debug!(client_id = %client.id, "inactive client presented a key");
                self.cache.remove(&key_hash);
                Err(GatewayError::invalid_credential())
            }
            None => {
                self.cache.remove(&key_hash);
                Err(GatewayError::invalid_credential())
            }
        }
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<Client>, GatewayError> {
        Ok(self.store.get_by_id(id).await?)
    }

    /// Drop expired cache entries, returning how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now_secs();
        let before = self.cache.len();
        self.cache.retain(|_, entry| entry.expires_at > now);
        before - self.cache.len()
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}
