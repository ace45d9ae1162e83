//! vscribe-server — asynchronous video transcription service
//!
//! Boot order matters: configuration first, then logging (the log directory
//! is configurable), then directory preparation and endpoint vetting, then
//! the registry (which sweeps stale tasks from a previous run) and the
//! pipeline, and finally the listener.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use vscribe_common::config::AppConfig;
use vscribe_common::urlguard::{is_safe_base_url, UrlPolicy};
use vscribe_server::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::var("VSCRIBE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.yaml"));
    let config = Arc::new(AppConfig::load(&config_path)?);

    std::fs::create_dir_all(&config.system.log_dir)
        .with_context(|| format!("create log dir {}", config.system.log_dir.display()))?;
    let file_appender = tracing_appender::rolling::never(&config.system.log_dir, "app.log");
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();

    info!("Starting vscribe-server");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(config = %config.redacted(), "Configuration loaded");

    std::fs::create_dir_all(&config.system.temp_dir)
        .with_context(|| format!("create temp dir {}", config.system.temp_dir.display()))?;
    std::fs::create_dir_all(&config.system.output_dir)
        .with_context(|| format!("create output dir {}", config.system.output_dir.display()))?;

    vet_configured_endpoints(&config)
        .await
        .context("configured vendor endpoint failed the URL policy")?;

    let state = AppState::initialize(config.clone()).context("initialize application state")?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("bind {}", config.server.bind_addr))?;
    info!("Listening on http://{}", config.server.bind_addr);
    info!("Health check: http://{}/api/health", config.server.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Every configured vendor base URL must pass the same guard used for
/// submitted URLs. Misconfiguration fails the boot, not the first task.
async fn vet_configured_endpoints(config: &AppConfig) -> Result<()> {
    let policy = UrlPolicy::from_security(&config.security);
    for (name, endpoint) in [
        ("siliconflow", &config.apis.siliconflow),
        ("openai", &config.apis.openai),
        ("gemini", &config.apis.gemini),
    ] {
        if endpoint.base_url.trim().is_empty() {
            continue;
        }
        is_safe_base_url(&endpoint.base_url, &policy)
            .await
            .with_context(|| format!("apis.{}.base_url", name))?;
    }
    Ok(())
}
