use async_trait::async_trait;

use crate::error::Result;
use crate::types::{CacheStats, CachedResponse};

/// A set of named response stores.
///
/// Each store holds at most one response per URL; a `put` for a URL already
/// present replaces the earlier entry. Store names are reported in creation
/// order, and `match_any` searches the stores in that same order.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Create the named store if it does not exist yet
    async fn open(&self, name: &str) -> Result<()>;

    /// Store a response under `url`, creating the store if needed
    async fn put(&self, name: &str, url: &str, response: CachedResponse) -> Result<()>;

    /// Look up `url` in a single store
    async fn match_in(&self, name: &str, url: &str) -> Result<Option<CachedResponse>>;

    /// Look up `url` across every store, first hit wins
    async fn match_any(&self, url: &str) -> Result<Option<CachedResponse>>;

    /// Delete a whole store. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Names of all stores
    async fn keys(&self) -> Result<Vec<String>>;

    async fn stats(&self) -> CacheStats;
}
