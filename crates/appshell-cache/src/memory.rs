//! In-memory cache storage backed by moka

use async_trait::async_trait;
use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{validate_name, Result};
use crate::storage::CacheStorage;
use crate::types::{CacheStats, CachedResponse};

/// Cache storage that lives for the lifetime of the process.
///
/// Stores carry no capacity bound: entries stay until their store is deleted.
pub struct MemoryCacheStorage {
    /// Stores in creation order
    stores: RwLock<Vec<(String, Cache<String, CachedResponse>)>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self {
            stores: RwLock::new(Vec::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    async fn store(&self, name: &str) -> Option<Cache<String, CachedResponse>> {
        let stores = self.stores.read().await;
        stores
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, cache)| cache.clone())
    }

    async fn store_or_create(&self, name: &str) -> Result<Cache<String, CachedResponse>> {
        validate_name(name)?;
        if let Some(cache) = self.store(name).await {
            return Ok(cache);
        }

        let mut stores = self.stores.write().await;
        // Another task may have created it between the two locks
        if let Some((_, cache)) = stores.iter().find(|(n, _)| n == name) {
            return Ok(cache.clone());
        }
        let cache = Cache::builder().build();
        stores.push((name.to_string(), cache.clone()));
        debug!(cache = %name, "Opened cache store");
        Ok(cache)
    }

    fn record(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Default for MemoryCacheStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        self.store_or_create(name).await.map(|_| ())
    }

    async fn put(&self, name: &str, url: &str, response: CachedResponse) -> Result<()> {
        let cache = self.store_or_create(name).await?;
        let size = response.body.len();
        cache.insert(url.to_string(), response).await;
        debug!(cache = %name, url, size, "Cached response");
        Ok(())
    }

    async fn match_in(&self, name: &str, url: &str) -> Result<Option<CachedResponse>> {
        let found = match self.store(name).await {
            Some(cache) => cache.get(url).await,
            None => None,
        };
        self.record(found.is_some());
        Ok(found)
    }

    async fn match_any(&self, url: &str) -> Result<Option<CachedResponse>> {
        let stores: Vec<_> = {
            let stores = self.stores.read().await;
            stores.iter().map(|(_, cache)| cache.clone()).collect()
        };

        for cache in stores {
            if let Some(response) = cache.get(url).await {
                self.record(true);
                return Ok(Some(response));
            }
        }

        self.record(false);
        Ok(None)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let removed = {
            let mut stores = self.stores.write().await;
            stores
                .iter()
                .position(|(n, _)| n == name)
                .map(|idx| stores.remove(idx))
        };

        match removed {
            Some((_, cache)) => {
                cache.invalidate_all();
                debug!(cache = %name, "Deleted cache store");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let stores = self.stores.read().await;
        Ok(stores.iter().map(|(n, _)| n.clone()).collect())
    }

    async fn stats(&self) -> CacheStats {
        let stores = self.stores.read().await;
        let mut entries = 0;
        let mut total_size = 0u64;
        for (_, cache) in stores.iter() {
            for (_, response) in cache.iter() {
                entries += 1;
                total_size += response.body.len() as u64;
            }
        }

        CacheStats {
            stores: stores.len(),
            entries,
            total_size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
