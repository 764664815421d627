//! tokengate: OAuth token lifecycle and credential-injecting proxy for a
//! multi-tenant CRM API.
//!
//! Library crate shared by the `tokengate` binary and the integration tests
//! in `tests/`.

pub mod api;
pub mod cli;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod models;
pub mod oauth;
pub mod proxy;
pub mod registry;
pub mod store;

use std::sync::Arc;

use anyhow::Context;

use config::Config;
use oauth::{TokenClient, TokenManager};
use proxy::{Gateway, UpstreamClient};
use registry::EndpointRegistry;
use store::{InstallationStore, JsonFileStore, MemoryStore};

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub gateway: Gateway,
    pub admin_key: Option<String>,
}

impl AppState {
    pub fn new(gateway: Gateway, admin_key: Option<String>) -> Self {
        Self { gateway, admin_key }
    }
}

/// Open the configured installation store: the JSON file when one is set,
/// memory otherwise.
pub async fn open_store(cfg: &Config) -> anyhow::Result<Arc<dyn InstallationStore>> {
    match &cfg.installations_file {
        Some(path) => {
            let store = JsonFileStore::open(path)
                .await
                .with_context(|| format!("opening installations file {}", path.display()))?;
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("TOKENGATE_INSTALLATIONS_FILE not set; installations live in memory only");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Built-in endpoints plus the optional YAML extension file.
pub async fn load_registry(cfg: &Config) -> anyhow::Result<EndpointRegistry> {
    let registry = EndpointRegistry::builtin();
    let Some(path) = &cfg.endpoints_file else {
        return Ok(registry);
    };
    let yaml = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading endpoints file {}", path.display()))?;
    let registry = registry
        .extend_from_yaml(&yaml)
        .with_context(|| format!("loading endpoints from {}", path.display()))?;
    tracing::info!(endpoints = registry.len(), "endpoint registry loaded");
    Ok(registry)
}

pub fn token_manager(cfg: &Config, store: Arc<dyn InstallationStore>) -> anyhow::Result<TokenManager> {
    let client = TokenClient::new(cfg.credentials(), cfg.http_timeout())
        .context("building token endpoint client")?;
    Ok(TokenManager::with_padding(store, client, cfg.refresh_padding()))
}

/// Wire store, token manager, registry and upstream client from config.
pub async fn build_gateway(cfg: &Config) -> anyhow::Result<Gateway> {
    let store = open_store(cfg).await?;
    let tokens = token_manager(cfg, store)?;
    let registry = load_registry(cfg).await?;
    let upstream = UpstreamClient::new(&cfg.api_base_url, &cfg.api_version, cfg.http_timeout())
        .context("building upstream client")?;

    Ok(Gateway::new(Arc::new(registry), tokens, upstream)
        .with_signatures(&cfg.invalid_token_signatures))
}
