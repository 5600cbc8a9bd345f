//! Cache types

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A response as held by a cache store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl CachedResponse {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// First header value with the given name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Metadata for a cached entry, persisted next to the body by the file backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMeta {
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub size: u64,
    pub stored_at: DateTime<Utc>,
}

/// Statistics about the cache storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub stores: usize,
    pub entries: usize,
    pub total_size: u64,
    pub hits: u64,
    pub misses: u64,
}
