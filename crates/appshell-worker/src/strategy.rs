//! Fetch strategies: network-first, cache-first, network-only
//!
//! Cache writes never delay the response. They run on a detached task and a
//! failed write is logged and dropped. The handle is returned in [`Served`]
//! for callers that want to wait on it; dropping it leaves the write running.
//!
//! The runtime cache is shared by every client of the gateway, so a response
//! is only written when it is complete, was fetched without credentials, is
//! not marked `no-store` or `private`, and does not vary on request headers.

use std::sync::Arc;

use appshell_cache::CacheStorage;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::classify::is_cacheable;
use crate::error::Result;
use crate::fetch::{Fetch, FetchRequest, FetchResponse};
use crate::router::Strategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    Network,
    Cache,
}

#[derive(Debug)]
pub struct Served {
    pub response: FetchResponse,
    pub source: ResponseSource,
    /// Pending runtime-cache write, if one was started
    pub cache_write: Option<JoinHandle<()>>,
}

impl Served {
    fn network(response: FetchResponse, cache_write: Option<JoinHandle<()>>) -> Self {
        Self {
            response,
            source: ResponseSource::Network,
            cache_write,
        }
    }

    fn cache(response: FetchResponse) -> Self {
        Self {
            response,
            source: ResponseSource::Cache,
            cache_write: None,
        }
    }
}

/// Runs strategies against a cache storage and a network
#[derive(Clone)]
pub struct StrategyRunner {
    cache: Arc<dyn CacheStorage>,
    network: Arc<dyn Fetch>,
    runtime_cache: String,
}

impl StrategyRunner {
    pub fn new(cache: Arc<dyn CacheStorage>, network: Arc<dyn Fetch>, runtime_cache: String) -> Self {
        Self {
            cache,
            network,
            runtime_cache,
        }
    }

    pub async fn serve(&self, strategy: Strategy, request: &FetchRequest) -> Result<Served> {
        match strategy {
            Strategy::NetworkFirst => self.network_first(request).await,
            Strategy::CacheFirst => self.cache_first(request).await,
            Strategy::NetworkOnly => self.network_only(request).await,
        }
    }

    /// Network, falling back to any cached copy when the network is unreachable
    pub async fn network_first(&self, request: &FetchRequest) -> Result<Served> {
        let upstream = request.identity_encoded();
        match self.network.fetch(&upstream).await {
            Ok(response) => {
                let write = (is_cacheable(request.cache_key())
                    && should_store(request, &response))
                .then(|| self.store_in_background(request.cache_key(), &response));
                Ok(Served::network(response, write))
            }
            Err(err) => {
                debug!(url = %request.url, error = %err, "Network failed, trying cache");
                match self.lookup(request).await {
                    Some(cached) => Ok(Served::cache(cached)),
                    None => Err(err),
                }
            }
        }
    }

    /// Cache, going to the network only on a miss
    pub async fn cache_first(&self, request: &FetchRequest) -> Result<Served> {
        if let Some(cached) = self.lookup(request).await {
            return Ok(Served::cache(cached));
        }

        let response = self.network.fetch(&request.identity_encoded()).await?;
        let write = should_store(request, &response)
            .then(|| self.store_in_background(request.cache_key(), &response));
        Ok(Served::network(response, write))
    }

    /// Network with no cache involvement at all
    pub async fn network_only(&self, request: &FetchRequest) -> Result<Served> {
        let response = self.network.fetch(request).await?;
        Ok(Served::network(response, None))
    }

    /// Look up every cache generation. Storage errors count as a miss.
    async fn lookup(&self, request: &FetchRequest) -> Option<FetchResponse> {
        match self.cache.match_any(request.cache_key()).await {
            Ok(Some(cached)) => {
                debug!(url = %request.url, "Cache hit");
                Some(cached.into())
            }
            Ok(None) => {
                debug!(url = %request.url, "Cache miss");
                None
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Cache lookup failed");
                None
            }
        }
    }

    fn store_in_background(&self, url: &str, response: &FetchResponse) -> JoinHandle<()> {
        let cache = Arc::clone(&self.cache);
        let name = self.runtime_cache.clone();
        let url = url.to_string();
        let cached = response.to_cached();

        tokio::spawn(async move {
            if let Err(e) = cache.put(&name, &url, cached).await {
                warn!(cache = %name, url = %url, error = %e, "Failed to cache response");
            }
        })
    }
}

/// Whether a network response may go into the shared runtime cache
fn should_store(request: &FetchRequest, response: &FetchResponse) -> bool {
    if !response.storable() {
        return false;
    }
    if request.has_credentials() || response.forbids_shared_cache() {
        debug!(url = %request.url, "Not caching per-user response");
        return false;
    }
    if !response.varies_by_url_only() {
        debug!(url = %request.url, "Not caching response that varies on request headers");
        return false;
    }
    true
}
