//! # Provider Registry
//!
//! One shared adapter per configured backend name, built once at startup and
//! read without locks afterwards.

use crate::{
    adapters::{Adapter, AdapterTrait, ProbeReport},
    config::ProviderConfig,
    core::http_client::HttpClientError,
    error::GatewayError,
};
use futures::future::join_all;
use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<String, Arc<Adapter>>,
}

impl ProviderRegistry {
    pub fn build<I>(configs: I) -> Result<Self, HttpClientError>
    where
        I: IntoIterator<Item = ProviderConfig>,
    {
        let mut adapters = HashMap::new();
        for config in configs {
            let name = config.name.clone();
            let adapter = Adapter::from_config(config)?;
            info!(backend = %name, family = %adapter.kind(), base_url = adapter.base_url(), "registered backend");
            if adapters.insert(name.clone(), Arc::new(adapter)).is_some() {
                warn!(backend = %name, "duplicate backend name, keeping the last definition");
            }
        }
        Ok(Self { adapters })
    }

    /// Shared adapter for `name`, or a request-local copy pointed at
    /// `base_url_override` when the family supports it.
    pub fn resolve(
        &self,
        name: &str,
        base_url_override: Option<&str>,
    ) -> Result<Arc<Adapter>, GatewayError> {
        let shared = self
            .get(name)
            .ok_or_else(|| GatewayError::NotConfigured(name.to_string()))?;

        let Some(base_url) = base_url_override.filter(|url| !url.trim().is_empty()) else {
            return Ok(Arc::clone(shared));
        };

        match shared.with_base_url(base_url) {
            Some(derived) => Ok(Arc::new(derived)),
            None => {
                warn!(
                    backend = name,
                    family = %shared.kind(),
                    "base URL override not supported for this family, ignoring"
                );
                Ok(Arc::clone(shared))
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Adapter>> {
        self.adapters.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// `(model, backend)` pairs across all backends, sorted and deduplicated.
    pub fn all_models(&self) -> Vec<(String, String)> {
        let mut models = BTreeSet::new();
        for (name, adapter) in &self.adapters {
            for model in adapter.models() {
                models.insert((model, name.clone()));
            }
        }
        models.into_iter().collect()
    }

    /// Probe every backend concurrently.
    pub async fn probe_all(&self) -> Vec<(String, ProbeReport)> {
        let names = self.names();
        let reports = join_all(names.iter().map(|name| self.adapters[*name].probe())).await;
        names
            .into_iter()
            .map(str::to_string)
            .zip(reports)
            .collect()
    }
}
