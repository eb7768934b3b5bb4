//! # NexusNitro Gateway (nnGW) server
//!
//! Loads configuration, builds the backend registry and client store, and
//! serves the OpenAI-compatible API until SIGINT/SIGTERM.

use nexus_nitro_gateway::{
    admission::AdmissionGate,
    clients::{Client, ClientResolver, InMemoryClientStore},
    config::load_client_records,
    core::SystemClock,
    create_router,
    usage::TracingUsageLogger,
    AppState, Config, Gateway, GracefulShutdown, ProviderRegistry,
};
use std::{error::Error, net::SocketAddr, sync::Arc, time::Duration};
use tracing::{info, warn};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

fn client_store(config: &Config) -> Result<InMemoryClientStore, Box<dyn Error>> {
    let mut store = match &config.clients_file {
        Some(path) => InMemoryClientStore::from_records(load_client_records(path)?, &config.key_salt)?,
        None => InMemoryClientStore::new(),
    };

    if let Some(key) = config.api_key.as_deref().filter(|k| !k.is_empty()) {
        store.insert(&config.key_salt, key, Client::new("bootstrap", config.backend_name.clone()));
    }

    if store.is_empty() {
        warn!("no clients configured, every request will be rejected");
    }
    Ok(store)
}

fn build_gateway(config: &Config) -> Result<Gateway, Box<dyn Error>> {
    let registry = ProviderRegistry::build(config.provider_configs()?)?;
    let store = client_store(config)?;
    info!(backends = registry.len(), clients = store.len(), "gateway configured");

    let clock = Arc::new(SystemClock);
    let resolver = ClientResolver::new(
        Arc::new(store),
        config.key_salt.clone(),
        config.client_cache_ttl(),
        clock.clone(),
    );
    let gate = Arc::new(AdmissionGate::new(clock, config.rate_state_ttl()));

    Ok(Gateway::new(resolver, gate, Arc::new(registry), Arc::new(TracingUsageLogger))
        .with_default_backend(config.backend_name.clone()))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = Config::parse_args();

    let gateway = Arc::new(build_gateway(&config)?);
    let app = create_router(AppState::from_shared(gateway.clone()), &config.cors_origin);

    let shutdown = GracefulShutdown::new();
    shutdown.listen_for_signals();
    let janitor = shutdown.spawn_periodic(SWEEP_INTERVAL, move || {
        gateway.sweep();
    });

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("🚀 NexusNitro Gateway starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.signalled())
        .await?;

    janitor.await?;
    info!("✅ Server stopped");
    Ok(())
}
