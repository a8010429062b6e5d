//! Snatcher - episode search and snatch daemon

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use snatcher::api::{self, AppState};
use snatcher::app::{App, Collaborators};
use snatcher::config::Config;
use snatcher::db::{EpisodeStore, MemoryStore};
use snatcher::indexer::{NewznabConfig, NewznabProvider, Searchable};
use snatcher::services::logging::init_tracing;
use snatcher::services::notifications::LogNotifier;
use snatcher::services::queues::LogMaintainer;
use snatcher::services::snatch::BlackholeClient;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    init_tracing(&config.logging)?;

    tracing::info!("Starting Snatcher");

    let store: Arc<dyn EpisodeStore> = match &config.library_file {
        Some(path) => Arc::new(MemoryStore::load_json(path)?),
        None => Arc::new(MemoryStore::new()),
    };

    let providers = match &config.providers_file {
        Some(path) => load_providers(path)?,
        None => Vec::new(),
    };
    tracing::info!(providers = providers.len(), "Providers loaded");

    let blackhole = BlackholeClient::new(
        config.nzb_blackhole_dir.clone(),
        config.torrent_blackhole_dir.clone(),
    )?;

    let app = Arc::new(App::new(
        config.search.clone(),
        Collaborators {
            store,
            providers,
            download_clients: vec![Arc::new(blackhole)],
            notifiers: vec![Arc::new(LogNotifier)],
            maintainer: Arc::new(LogMaintainer),
        },
    ));
    app.start();

    let router = api::build_router(AppState { app: app.clone() });

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid HOST/PORT")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    app.halt().await;
    Ok(())
}

fn load_providers(path: &Path) -> Result<Vec<Arc<dyn Searchable>>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read providers file {}", path.display()))?;
    let configs: Vec<NewznabConfig> =
        serde_json::from_str(&raw).context("Invalid providers file")?;

    let mut providers: Vec<Arc<dyn Searchable>> = Vec::with_capacity(configs.len());
    for config in configs {
        let id = config.id.clone();
        let provider =
            NewznabProvider::new(config).with_context(|| format!("Failed to create provider {}", id))?;
        providers.push(Arc::new(provider));
    }
    Ok(providers)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}
