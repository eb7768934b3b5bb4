#[cfg(feature = "cli")]
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::clients::ClientRecord;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// # Provider Configuration
///
/// One configured upstream backend. Loaded once at startup and immutable
/// afterwards; a per-request base URL override produces a new value through
/// [`ProviderConfig::with_base_url`].
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Name clients route to
    pub name: String,
    /// Backend family: gemini, anthropic, openai, azure, vllm (unknown values
    /// are treated as OpenAI-compatible)
    #[serde(rename = "type", default = "default_provider_type")]
    pub provider_type: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub default_model: String,
    /// Models callers may request; empty means only the default model
    #[serde(default)]
    pub allowed_models: BTreeSet<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Azure `api-version` or Anthropic `anthropic-version` override
    #[serde(default)]
    pub api_version: Option<String>,
}

fn default_provider_type() -> String {
    "openai".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

impl ProviderConfig {
    pub fn new(
        name: impl Into<String>,
        provider_type: impl Into<String>,
        base_url: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            provider_type: provider_type.into(),
            base_url: base_url.into(),
            api_key: None,
            default_model: default_model.into(),
            allowed_models: BTreeSet::new(),
            timeout_secs: default_timeout_secs(),
            api_version: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_allowed_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_models = models.into_iter().map(Into::into).collect();
        self
    }

    /// Copy of this configuration pointing at another endpoint.
    pub fn with_base_url(&self, base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..self.clone()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Base URL without a trailing slash, ready for path joining.
    pub fn trimmed_base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Default model first, then the allowed set, without duplicates.
    pub fn models(&self) -> Vec<String> {
        let mut models = vec![self.default_model.clone()];
        models.extend(
            self.allowed_models
                .iter()
                .filter(|m| **m != self.default_model)
                .cloned(),
        );
        models
    }

    pub fn allows_model(&self, model: &str) -> bool {
        model == self.default_model || self.allowed_models.contains(model)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Invalid("provider name cannot be empty".to_string()));
        }
        if self.default_model.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "provider '{}' needs a default_model",
                self.name
            )));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid(format!(
                "provider '{}' timeout must be greater than 0 seconds",
                self.name
            )));
        }
        let url = Url::parse(&self.base_url).map_err(|e| {
            ConfigError::Invalid(format!(
                "provider '{}' has an invalid base_url '{}': {}",
                self.name, self.base_url, e
            ))
        })?;
        if !["http", "https"].contains(&url.scheme()) {
            return Err(ConfigError::Invalid(format!(
                "provider '{}' base_url must use http or https",
                self.name
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("provider_type", &self.provider_type)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("default_model", &self.default_model)
            .field("allowed_models", &self.allowed_models)
            .field("timeout_secs", &self.timeout_secs)
            .field("api_version", &self.api_version)
            .finish()
    }
}

/// Read a JSON array of [`ProviderConfig`] from disk.
pub fn load_provider_configs(path: impl AsRef<Path>) -> Result<Vec<ProviderConfig>, ConfigError> {
    let configs: Vec<ProviderConfig> = read_json(path.as_ref())?;
    for config in &configs {
        config.validate()?;
    }
    Ok(configs)
}

/// Read a JSON array of client records from disk.
pub fn load_client_records(path: impl AsRef<Path>) -> Result<Vec<ClientRecord>, ConfigError> {
    read_json(path.as_ref())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: display.clone(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: display,
        source,
    })
}

/// # NexusNitro Gateway Configuration
///
/// Process-level settings from command-line arguments, environment variables
/// and `.env`. Backends come from `--providers-file`, or from the
/// single-backend flags when no file is given.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "cli", derive(Parser))]
#[cfg_attr(feature = "cli", command(name = "nexus-nitro-gateway"))]
#[cfg_attr(
    feature = "cli",
    command(about = "Multi-backend LLM gateway with an OpenAI-compatible chat completions API")
)]
#[cfg_attr(feature = "cli", command(version))]
pub struct Config {
    // =============================================================================
    // CORE SERVER CONFIGURATION
    // =============================================================================
    /// Server port to listen on
    #[cfg_attr(feature = "cli", arg(short, long, env = "PORT", default_value = "8080"))]
    pub port: u16,

    /// Server host to bind to
    #[cfg_attr(feature = "cli", arg(long, env = "HOST", default_value = "0.0.0.0"))]
    pub host: String,

    // =============================================================================
    // BACKENDS
    // =============================================================================
    /// JSON file with the list of provider configurations
    #[cfg_attr(feature = "cli", arg(long, env = "NNGW_PROVIDERS_FILE"))]
    pub providers_file: Option<String>,

    /// Name of the single backend built from the flags below
    #[cfg_attr(feature = "cli", arg(long, env = "NNGW_BACKEND_NAME", default_value = "default"))]
    pub backend_name: String,

    /// Backend URL used when no providers file is given
    #[cfg_attr(feature = "cli", arg(long, env = "NNGW_BACKEND_URL", default_value = "http://localhost:8000"))]
    pub backend_url: String,

    /// Backend family (gemini, anthropic, openai, azure, vllm)
    #[cfg_attr(feature = "cli", arg(long, env = "NNGW_BACKEND_TYPE", default_value = "vllm"))]
    pub backend_type: String,

    /// Default model of the single backend
    #[cfg_attr(feature = "cli", arg(long, env = "NNGW_MODEL", default_value = "llama"))]
    pub model_id: String,

    /// Credential of the single backend
    #[cfg_attr(feature = "cli", arg(long, env = "NNGW_BACKEND_TOKEN"))]
    pub backend_token: Option<String>,

    /// HTTP client timeout in seconds for the single backend
    #[cfg_attr(feature = "cli", arg(long, env = "HTTP_CLIENT_TIMEOUT", default_value = "60"))]
    pub http_client_timeout: u64,

    // =============================================================================
    // CLIENTS
    // =============================================================================
    /// JSON file with client records
    #[cfg_attr(feature = "cli", arg(long, env = "NNGW_CLIENTS_FILE"))]
    pub clients_file: Option<String>,

    /// Key of an unrestricted bootstrap client routed to the single backend
    #[cfg_attr(feature = "cli", arg(long, env = "NNGW_API_KEY"))]
    pub api_key: Option<String>,

    /// Salt mixed into stored key hashes
    #[cfg_attr(feature = "cli", arg(long, env = "NNGW_KEY_SALT", default_value = ""))]
    pub key_salt: String,

    /// How long a resolved client stays cached, in seconds
    #[cfg_attr(feature = "cli", arg(long, env = "CLIENT_CACHE_TTL_SECONDS", default_value = "300"))]
    pub client_cache_ttl_seconds: u64,

    /// Idle time after which per-client rate state is dropped, in seconds
    #[cfg_attr(feature = "cli", arg(long, env = "RATE_STATE_TTL_SECONDS", default_value = "86400"))]
    pub rate_state_ttl_seconds: u64,

    // =============================================================================
    // LOGGING AND SECURITY
    // =============================================================================
    /// Log level (error, warn, info, debug, trace)
    #[cfg_attr(feature = "cli", arg(long, env = "RUST_LOG", default_value = "info"))]
    pub log_level: String,

    /// Environment (development, staging, production)
    #[cfg_attr(feature = "cli", arg(long, env = "ENVIRONMENT", default_value = "development"))]
    pub environment: String,

    /// CORS origin (use * for development only)
    #[cfg_attr(feature = "cli", arg(long, env = "CORS_ORIGIN", default_value = "*"))]
    pub cors_origin: String,
}

impl Config {
    /// Load `.env`, parse arguments, install logging and validate.
    #[cfg(feature = "cli")]
    pub fn parse_args() -> Self {
        let _ = dotenv::dotenv();

        let config = Self::parse();
        config.setup_logging();

        if let Err(err) = config.validate() {
            eprintln!("Configuration validation failed: {}", err);
            std::process::exit(1);
        }

        config
    }

    pub fn for_test() -> Self {
        Self {
            port: 8080,
            host: "127.0.0.1".to_string(),
            providers_file: None,
            backend_name: "default".to_string(),
            backend_url: "http://localhost:8000".to_string(),
            backend_type: "vllm".to_string(),
            model_id: "llama".to_string(),
            backend_token: None,
            http_client_timeout: 60,
            clients_file: None,
            api_key: None,
            key_salt: String::new(),
            client_cache_ttl_seconds: 300,
            rate_state_ttl_seconds: 86_400,
            log_level: "info".to_string(),
            environment: "development".to_string(),
            cors_origin: "*".to_string(),
        }
    }

    #[cfg(feature = "cli")]
    fn setup_logging(&self) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(&self.log_level)
            .with_target(false)
            .try_init();
    }

    /// The backends this process serves.
    pub fn provider_configs(&self) -> Result<Vec<ProviderConfig>, ConfigError> {
        if let Some(path) = &self.providers_file {
            return load_provider_configs(path);
        }

        let mut single = ProviderConfig::new(
            self.backend_name.clone(),
            self.backend_type.clone(),
            self.backend_url.clone(),
            self.model_id.clone(),
        );
        single.api_key = self.backend_token.clone();
        single.timeout_secs = self.http_client_timeout;
        single.validate()?;
        Ok(vec![single])
    }

    pub fn client_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.client_cache_ttl_seconds)
    }

    pub fn rate_state_ttl(&self) -> Duration {
        Duration::from_secs(self.rate_state_ttl_seconds)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("Port cannot be 0. Please specify a valid port number (1-65535).".to_string());
        }

        if self.host.is_empty() {
            return Err("Host cannot be empty. Please specify a valid host (e.g., '0.0.0.0').".to_string());
        }

        if self.providers_file.is_none() {
            match Url::parse(&self.backend_url) {
                Ok(url) if ["http", "https"].contains(&url.scheme()) => {
                    if self.environment == "production" && url.scheme() == "http" {
                        eprintln!(
                            "⚠️  Warning: Using HTTP in production is not recommended. \
                            Consider using HTTPS for better security."
                        );
                    }
                }
                Ok(url) => {
                    return Err(format!(
                        "Invalid URL scheme '{}'. Only 'http' and 'https' are supported.",
                        url.scheme()
                    ))
                }
                Err(err) => {
                    return Err(format!(
                        "Invalid backend URL '{}': {}. Please provide a valid URL (e.g., 'http://localhost:8000').",
                        self.backend_url, err
                    ))
                }
            }

            if self.model_id.is_empty() {
                return Err("Model ID cannot be empty. Please specify a valid model identifier.".to_string());
            }
        }

        if self.clients_file.is_none() && self.api_key.is_none() {
            eprintln!(
                "⚠️  Warning: Neither NNGW_CLIENTS_FILE nor NNGW_API_KEY is set. \
                Every request will be rejected as unauthenticated."
            );
        }

        if self.http_client_timeout == 0 {
            return Err("HTTP client timeout must be greater than 0 seconds.".to_string());
        }

        if self.client_cache_ttl_seconds == 0 {
            eprintln!("⚠️  Warning: Client cache TTL of 0 seconds sends every request to the client store.");
        }

        if self.rate_state_ttl_seconds < 86_400 {
            return Err("Rate state TTL must cover at least one day window (86400 seconds).".to_string());
        }

        let valid_environments = ["development", "staging", "production"];
        if !valid_environments.contains(&self.environment.as_str()) {
            return Err(format!(
                "Invalid environment '{}'. Valid options are: {}",
                self.environment,
                valid_environments.join(", ")
            ));
        }

        if self.environment == "production" && self.key_salt.is_empty() {
            eprintln!("⚠️  Warning: NNGW_KEY_SALT is empty. Key hashes are unsalted.");
        }

        if self.environment == "production" && self.cors_origin == "*" {
            eprintln!(
                "⚠️  Warning: Using CORS origin '*' in production is not recommended. \
                Consider specifying specific origins for better security."
            );
        }

        Ok(())
    }
}
