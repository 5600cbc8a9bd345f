//! App-shell gateway
//!
//! Sits in front of the server hosting a compiled Flutter web build and
//! applies the app-shell caching policy to every request: network-first for
//! the bootstrap files, cache-first for static assets, network-only for API
//! calls, with stale cache generations cleared on each new build.

mod config;
mod error;
mod runtime_config;
mod server;
mod types;

use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::server::{start_server, ServerState, SharedState};
use appshell_cache::{CacheStorage, FileCacheStorage, MemoryCacheStorage};
use appshell_worker::{Fetch, HttpFetcher, Lifecycle};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive("appshell_proxy=info".parse()?)
        .add_directive("appshell_worker=info".parse()?)
        .add_directive("appshell_cache=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting app-shell gateway...");

    let config = ProxyConfig::from_env()?;
    info!("Port: {}", config.port);
    info!("Origin: {}", config.origin);
    info!("Core cache: {}", config.cache_names.core);
    info!("Runtime cache: {}", config.cache_names.runtime);
    info!("Routing profile: {}", config.profile);

    let storage: Arc<dyn CacheStorage> = match &config.cache_dir {
        Some(dir) => {
            info!("Cache dir: {:?}", dir);
            let storage = FileCacheStorage::new(dir.clone());
            storage.init().await?;
            Arc::new(storage)
        }
        None => {
            info!("Cache dir not set, caching in memory");
            Arc::new(MemoryCacheStorage::new())
        }
    };

    let fetcher: Arc<dyn Fetch> = Arc::new(HttpFetcher::new(Duration::from_secs(
        config.request_timeout_secs,
    ))?);

    // Install and activate before taking traffic
    let lifecycle = Arc::new(Lifecycle::new(
        config.worker_config(),
        storage,
        Arc::clone(&fetcher),
    ));
    lifecycle.start().await?;

    let state: SharedState = Arc::new(ServerState::new(lifecycle, fetcher, &config.runtime));

    // Start HTTP server (blocking)
    start_server(state, config.port)
        .await
        .map_err(|e| ProxyError::Config(format!("Server error: {}", e)))?;

    Ok(())
}
