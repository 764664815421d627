use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tokengate::cli::{Cli, Commands};
use tokengate::config::{self, Config};
use tokengate::models::installation::InstallationSummary;
use tokengate::oauth::jwt;
use tokengate::{api, jobs, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load()?;
    init_tracing(cfg.log_json);

    if !cfg.has_client_credentials() {
        tracing::warn!(
            "TOKENGATE_CLIENT_ID / TOKENGATE_CLIENT_SECRET not set; token exchanges will be rejected upstream"
        );
    }

    let args = Cli::parse();
    let result = match args.command {
        Some(Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
        Some(Commands::Installations) => list_installations(&cfg).await,
        Some(Commands::Refresh { installation_id }) => refresh(&cfg, &installation_id).await,
        Some(Commands::Endpoints) => list_endpoints(&cfg).await,
        Some(Commands::ExchangeCode { code }) => exchange_code(&cfg, &code).await,
        Some(Commands::DecodeJwt { token }) => decode_jwt(&token),
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "tokengate=debug,tower_http=debug".into()),
    );
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    let gateway = tokengate::build_gateway(&cfg).await?;
    tracing::info!(
        endpoints = gateway.registry().len(),
        api_base_url = %cfg.api_base_url,
        "gateway initialized"
    );

    let shutdown = CancellationToken::new();
    let sweeper = jobs::sweeper::spawn(
        gateway.tokens().clone(),
        cfg.sweep_interval(),
        cfg.sweep_horizon(),
        cfg.sweep_concurrency,
        shutdown.clone(),
    );
    tracing::info!(
        interval_secs = cfg.sweep_interval_secs,
        horizon_secs = cfg.sweep_horizon_secs,
        "background token sweeper started"
    );

    let state = Arc::new(AppState::new(gateway, cfg.admin_key.clone()));
    if state.admin_key.is_none() {
        tracing::warn!("TOKENGATE_ADMIN_KEY not set; API is unauthenticated");
    }
    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!("tokengate listening on {}", addr);

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
            }
            shutdown.cancel();
        });
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    shutdown.cancel();
    let _ = sweeper.await;
    Ok(())
}

async fn list_installations(cfg: &Config) -> anyhow::Result<()> {
    let store = tokengate::open_store(cfg).await?;
    let mut installations = store.list().await?;
    if installations.is_empty() {
        println!("No installations found.");
        return Ok(());
    }
    installations.sort_by(|a, b| a.id.cmp(&b.id));

    println!(
        "{:<40} {:<26} {:<14} {:<26}",
        "ID", "LOCATION", "STATUS", "EXPIRES AT"
    );
    for inst in installations.iter().map(InstallationSummary::from) {
        println!(
            "{:<40} {:<26} {:<14} {:<26}",
            inst.id,
            inst.location_id.as_deref().unwrap_or("-"),
            inst.token_status,
            inst.expires_at.to_rfc3339()
        );
    }
    Ok(())
}

async fn refresh(cfg: &Config, installation_id: &str) -> anyhow::Result<()> {
    let store = tokengate::open_store(cfg).await?;
    let tokens = tokengate::token_manager(cfg, store)?;
    let inst = tokens.refresh(installation_id).await?;
    println!(
        "Token refreshed:\n  Installation: {}\n  Location:     {}\n  Expires at:   {}",
        inst.id,
        inst.location_id.as_deref().unwrap_or("-"),
        inst.expires_at.to_rfc3339()
    );
    Ok(())
}

async fn list_endpoints(cfg: &Config) -> anyhow::Result<()> {
    let registry = tokengate::load_registry(cfg).await?;
    println!(
        "{:<24} {:<8} {:<44} {:<10} {}",
        "NAME", "METHOD", "PATH", "LOCATION", "SCOPE"
    );
    for ep in registry.descriptors() {
        let injection = serde_json::to_value(ep.location_injection)?;
        println!(
            "{:<24} {:<8} {:<44} {:<10} {}",
            ep.name,
            ep.method.as_str(),
            ep.path_template,
            injection.as_str().unwrap_or("-"),
            ep.required_scope.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

async fn exchange_code(cfg: &Config, code: &str) -> anyhow::Result<()> {
    let store = tokengate::open_store(cfg).await?;
    let tokens = tokengate::token_manager(cfg, store)?;
    let inst = tokens.exchange_code(code).await?;
    println!(
        "Installation created:\n  ID:       {}\n  Location: {}\n  Scopes:   {}",
        inst.id,
        inst.location_id.as_deref().unwrap_or("-"),
        inst.scopes.join(" ")
    );
    if cfg.installations_file.is_none() {
        println!("\nWarning: TOKENGATE_INSTALLATIONS_FILE is not set, so this installation was not persisted.");
    }
    Ok(())
}

fn decode_jwt(token: &str) -> anyhow::Result<()> {
    let claims = jwt::decode_claims(token.trim())?;
    println!("{}", serde_json::to_string_pretty(&claims)?);
    Ok(())
}
