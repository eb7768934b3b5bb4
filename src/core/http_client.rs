//! # HTTP Client Factory
//!
//! Centralized construction of the outbound `reqwest` clients, one per
//! configured backend, so every adapter gets the same pooling and
//! compression behavior.
//!
//! The client itself carries no total request timeout: a streamed completion
//! may legitimately run for minutes. Single-shot calls apply the backend
//! timeout per request, and streams rely on the idle read timeout.

use crate::config::ProviderConfig;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

/// HTTP client configuration errors
#[derive(Debug, Error)]
pub enum HttpClientError {
    #[error("Failed to build HTTP client: {0}")]
    BuildError(#[from] reqwest::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// HTTP client pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_idle_per_host: usize,
    pub idle_timeout: Duration,
    pub keepalive: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 10,
            idle_timeout: Duration::from_secs(90),
            keepalive: Some(Duration::from_secs(60)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub connect_timeout: Duration,
    /// Maximum silence between two reads of a response body
    pub read_timeout: Duration,
    pub pool: PoolConfig,
    pub compression: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
            pool: PoolConfig::default(),
            compression: true,
        }
    }
}

impl From<&ProviderConfig> for HttpClientConfig {
    fn from(config: &ProviderConfig) -> Self {
        let timeout = config.timeout();
        Self {
            connect_timeout: timeout.min(Duration::from_secs(10)),
            read_timeout: timeout,
            pool: PoolConfig {
                max_idle_per_host: 20,
                idle_timeout: Duration::from_secs(120),
                keepalive: Some(Duration::from_secs(60)),
            },
            compression: true,
        }
    }
}

/// HTTP client builder with configurable options
pub struct HttpClientBuilder {
    config: HttpClientConfig,
}

impl HttpClientBuilder {
    pub fn new() -> Self {
        Self {
            config: HttpClientConfig::default(),
        }
    }

    /// Builder tuned for one configured backend.
    pub fn for_provider(config: &ProviderConfig) -> Self {
        Self {
            config: HttpClientConfig::from(config),
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn pool_config(mut self, pool: PoolConfig) -> Self {
        self.config.pool = pool;
        self
    }

    pub fn compression(mut self, enabled: bool) -> Self {
        self.config.compression = enabled;
        self
    }

    pub fn build(self) -> Result<Client, HttpClientError> {
        if self.config.read_timeout.is_zero() {
            return Err(HttpClientError::InvalidConfig(
                "read timeout must be greater than zero".to_string(),
            ));
        }

        let mut builder = Client::builder()
            .connect_timeout(self.config.connect_timeout)
            .read_timeout(self.config.read_timeout)
            .pool_max_idle_per_host(self.config.pool.max_idle_per_host)
            .pool_idle_timeout(self.config.pool.idle_timeout);

        if let Some(keepalive) = self.config.pool.keepalive {
            builder = builder.tcp_keepalive(keepalive);
        }

        if self.config.compression {
            builder = builder.gzip(true).brotli(true);
        }

        builder.build().map_err(HttpClientError::from)
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_client_builder() {
        let client = HttpClientBuilder::new().build().unwrap();
        assert!(client.get("http://localhost:8000/v1/models").build().is_ok());
    }

    #[test]
    fn test_provider_timeouts_carry_over() {
        let mut provider = ProviderConfig::new("local", "vllm", "http://localhost:8000", "llama");
        provider.timeout_secs = 5;
        let config = HttpClientConfig::from(&provider);
        assert_eq!(config.read_timeout, Duration::from_secs(5));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert!(HttpClientBuilder::for_provider(&provider).build().is_ok());
    }

    #[test]
    fn test_zero_read_timeout_rejected() {
        let result = HttpClientBuilder::new()
            .read_timeout(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(HttpClientError::InvalidConfig(_))));
    }
}
