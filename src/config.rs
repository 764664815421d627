use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::jobs::sweeper::DEFAULT_SWEEP_CONCURRENCY;
use crate::oauth::manager::DEFAULT_REFRESH_PADDING_SECS;
use crate::oauth::OAuthCredentials;
use crate::proxy::gateway::DEFAULT_INVALID_TOKEN_SIGNATURES;

pub const DEFAULT_TOKEN_URL: &str = "https://services.leadconnectorhq.com/oauth/token";
pub const DEFAULT_API_BASE_URL: &str = "https://services.leadconnectorhq.com";
pub const DEFAULT_API_VERSION: &str = "2021-07-28";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: Option<String>,
    pub token_url: String,
    pub api_base_url: String,
    /// Sent as the `Version` header on every resource call.
    pub api_version: String,
    pub http_timeout_secs: u64,
    pub refresh_padding_secs: i64,
    pub sweep_interval_secs: u64,
    pub sweep_horizon_secs: i64,
    pub sweep_concurrency: usize,
    /// JSON file backing the installation store. Unset = in-memory only.
    pub installations_file: Option<PathBuf>,
    /// YAML file with extra endpoint descriptors.
    pub endpoints_file: Option<PathBuf>,
    pub admin_key: Option<String>,
    /// Lowercased body fragments treated like a 401.
    pub invalid_token_signatures: Vec<String>,
    pub log_json: bool,
}

impl Config {
    pub fn credentials(&self) -> OAuthCredentials {
        OAuthCredentials {
            token_url: self.token_url.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            redirect_uri: self.redirect_uri.clone(),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn refresh_padding(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_padding_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn sweep_horizon(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.sweep_horizon_secs)
    }

    pub fn has_client_credentials(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

/// Load from the process environment, honouring a `.env` file.
pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    from_vars(|key| std::env::var(key).ok())
}

/// Build a config from an arbitrary variable lookup.
pub fn from_vars<F>(var: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let text = |key: &str| var(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    let parsed = |key: &str, default: u64| -> anyhow::Result<u64> {
        match text(key) {
            Some(v) => v
                .parse()
                .map_err(|e| anyhow::anyhow!("{key} must be a non-negative integer: {e}")),
            None => Ok(default),
        }
    };

    let sweep_concurrency = parsed("TOKENGATE_SWEEP_CONCURRENCY", DEFAULT_SWEEP_CONCURRENCY as u64)?;
    if sweep_concurrency == 0 {
        anyhow::bail!("TOKENGATE_SWEEP_CONCURRENCY must be at least 1");
    }

    let port = parsed("TOKENGATE_PORT", 8080)?;
    let port = u16::try_from(port).map_err(|_| anyhow::anyhow!("TOKENGATE_PORT out of range: {port}"))?;

    let invalid_token_signatures = match text("TOKENGATE_INVALID_TOKEN_SIGNATURES") {
        Some(list) => list
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect(),
        None => DEFAULT_INVALID_TOKEN_SIGNATURES
            .iter()
            .map(|s| s.to_string())
            .collect(),
    };

    Ok(Config {
        port,
        client_id: text("TOKENGATE_CLIENT_ID").unwrap_or_default(),
        client_secret: text("TOKENGATE_CLIENT_SECRET").unwrap_or_default(),
        redirect_uri: text("TOKENGATE_REDIRECT_URI"),
        token_url: text("TOKENGATE_TOKEN_URL").unwrap_or_else(|| DEFAULT_TOKEN_URL.into()),
        api_base_url: text("TOKENGATE_API_BASE_URL").unwrap_or_else(|| DEFAULT_API_BASE_URL.into()),
        api_version: text("TOKENGATE_API_VERSION").unwrap_or_else(|| DEFAULT_API_VERSION.into()),
        http_timeout_secs: parsed("TOKENGATE_HTTP_TIMEOUT_SECS", 15)?,
        refresh_padding_secs: parsed(
            "TOKENGATE_REFRESH_PADDING_SECS",
            DEFAULT_REFRESH_PADDING_SECS as u64,
        )? as i64,
        sweep_interval_secs: parsed("TOKENGATE_SWEEP_INTERVAL_SECS", 600)?.max(1),
        sweep_horizon_secs: parsed("TOKENGATE_SWEEP_HORIZON_SECS", 600)? as i64,
        sweep_concurrency: sweep_concurrency as usize,
        installations_file: text("TOKENGATE_INSTALLATIONS_FILE").map(PathBuf::from),
        endpoints_file: text("TOKENGATE_ENDPOINTS_FILE").map(PathBuf::from),
        admin_key: text("TOKENGATE_ADMIN_KEY"),
        invalid_token_signatures,
        log_json: matches!(
            text("TOKENGATE_LOG_JSON").as_deref(),
            Some("1" | "true" | "yes")
        ),
    })
}
