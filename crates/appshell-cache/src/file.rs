//! File-backed cache storage with an in-memory index
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<hex(store name)>/store.json       store name and creation time
//! <root>/<hex(store name)>/<sha256(url)>.json  entry metadata
//! <root>/<hex(store name)>/<sha256(url)>.body  response body
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{validate_name, Result};
use crate::storage::CacheStorage;
use crate::types::{CacheStats, CachedResponse, EntryMeta};

const STORE_FILE: &str = "store.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreHeader {
    name: String,
    created_at: DateTime<Utc>,
}

struct StoreIndex {
    header: StoreHeader,
    dir: PathBuf,
    /// Entry metadata keyed by hashed URL
    entries: HashMap<String, EntryMeta>,
}

/// Cache storage persisted to disk, surviving process restarts
pub struct FileCacheStorage {
    root: PathBuf,
    /// Stores in creation order
    stores: RwLock<Vec<StoreIndex>>,
    current_size: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    /// Suffix source for temp files so concurrent writers never share one
    write_seq: AtomicU64,
}

impl FileCacheStorage {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            stores: RwLock::new(Vec::new()),
            current_size: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            write_seq: AtomicU64::new(0),
        }
    }

    /// Ensure the root directory exists and load any stores already on disk
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;

        let mut loaded = Vec::new();
        let mut dirs = fs::read_dir(&self.root).await?;
        while let Some(dir) = dirs.next_entry().await? {
            if !dir.file_type().await?.is_dir() {
                continue;
            }
            match load_store(&dir.path()).await {
                Ok(Some(store)) => loaded.push(store),
                Ok(None) => {}
                Err(e) => warn!(dir = ?dir.path(), error = %e, "Skipping unreadable cache store"),
            }
        }
        loaded.sort_by_key(|s| s.header.created_at);

        let size: u64 = loaded
            .iter()
            .flat_map(|s| s.entries.values())
            .map(|e| e.size)
            .sum();
        let count = loaded.len();

        *self.stores.write().await = loaded;
        self.current_size.store(size, Ordering::Relaxed);
        info!(root = ?self.root, stores = count, total_size = size, "Cache storage initialized");
        Ok(())
    }

    /// Generate the on-disk key for a URL
    pub fn entry_key(url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn store_dir(&self, name: &str) -> PathBuf {
        self.root.join(hex::encode(name.as_bytes()))
    }

    async fn store_dir_or_create(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        {
            let stores = self.stores.read().await;
            if let Some(store) = stores.iter().find(|s| s.header.name == name) {
                return Ok(store.dir.clone());
            }
        }

        let mut stores = self.stores.write().await;
        if let Some(store) = stores.iter().find(|s| s.header.name == name) {
            return Ok(store.dir.clone());
        }

        let dir = self.store_dir(name);
        fs::create_dir_all(&dir).await?;
        let header = StoreHeader {
            name: name.to_string(),
            created_at: Utc::now(),
        };
        fs::write(dir.join(STORE_FILE), serde_json::to_vec(&header)?).await?;

        stores.push(StoreIndex {
            header,
            dir: dir.clone(),
            entries: HashMap::new(),
        });
        debug!(cache = %name, "Opened cache store");
        Ok(dir)
    }

    /// Write to a temp file and rename, so readers never see a partial file
    async fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("{}.tmp", seq));
        fs::write(&tmp, data).await?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Read an entry's body, dropping the entry from the index if it is gone
    async fn read_entry(&self, name: &str, key: &str) -> Option<CachedResponse> {
        let (dir, meta) = {
            let stores = self.stores.read().await;
            let store = stores.iter().find(|s| s.header.name == name)?;
            (store.dir.clone(), store.entries.get(key).cloned()?)
        };

        match fs::read(dir.join(format!("{}.body", key))).await {
            Ok(body) => Some(CachedResponse {
                status: meta.status,
                headers: meta.headers,
                body: Bytes::from(body),
            }),
            Err(e) => {
                warn!(url = %meta.url, error = %e, "Failed to read cached body, removing entry");
                let mut stores = self.stores.write().await;
                if let Some(store) = stores.iter_mut().find(|s| s.dir == dir) {
                    if let Some(removed) = store.entries.remove(key) {
                        self.current_size.fetch_sub(removed.size, Ordering::Relaxed);
                    }
                }
                None
            }
        }
    }

    fn record(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

async fn load_store(dir: &Path) -> Result<Option<StoreIndex>> {
    let header: StoreHeader = match fs::read(dir.join(STORE_FILE)).await {
        Ok(raw) => serde_json::from_slice(&raw)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut entries = HashMap::new();
    let mut files = fs::read_dir(dir).await?;
    while let Some(file) = files.next_entry().await? {
        let path = file.path();
        if path.extension().is_some_and(|ext| ext == "tmp") {
            // Left behind by a write interrupted before its rename
            if let Err(e) = fs::remove_file(&path).await {
                warn!(path = ?path, error = %e, "Failed to remove stale temp file");
            }
            continue;
        }
        let is_meta = path.extension().is_some_and(|ext| ext == "json")
            && path.file_name().is_some_and(|n| n != STORE_FILE);
        if !is_meta {
            continue;
        }
        let Some(key) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };
        match fs::read(&path).await {
            Ok(raw) => match serde_json::from_slice::<EntryMeta>(&raw) {
                Ok(meta) => {
                    entries.insert(key, meta);
                }
                Err(e) => warn!(path = ?path, error = %e, "Skipping corrupt entry metadata"),
            },
            Err(e) => warn!(path = ?path, error = %e, "Skipping unreadable entry metadata"),
        }
    }

    Ok(Some(StoreIndex {
        header,
        dir: dir.to_path_buf(),
        entries,
    }))
}

#[async_trait]
impl CacheStorage for FileCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        self.store_dir_or_create(name).await.map(|_| ())
    }

    async fn put(&self, name: &str, url: &str, response: CachedResponse) -> Result<()> {
        let dir = self.store_dir_or_create(name).await?;
        let key = Self::entry_key(url);
        let size = response.body.len() as u64;

        let meta = EntryMeta {
            url: url.to_string(),
            status: response.status,
            headers: response.headers,
            size,
            stored_at: Utc::now(),
        };

        self.write_atomic(&dir.join(format!("{}.body", key)), &response.body)
            .await?;
        self.write_atomic(&dir.join(format!("{}.json", key)), &serde_json::to_vec(&meta)?)
            .await?;

        let mut stores = self.stores.write().await;
        match stores.iter_mut().find(|s| s.header.name == name) {
            Some(store) => {
                if let Some(previous) = store.entries.insert(key.clone(), meta) {
                    self.current_size.fetch_sub(previous.size, Ordering::Relaxed);
                }
                self.current_size.fetch_add(size, Ordering::Relaxed);
                debug!(cache = %name, url, size, "Cached response");
            }
            // Store was deleted while the files were being written
            None => debug!(cache = %name, url, "Dropped write to deleted cache store"),
        }

        Ok(())
    }

    async fn match_in(&self, name: &str, url: &str) -> Result<Option<CachedResponse>> {
        let found = self.read_entry(name, &Self::entry_key(url)).await;
        self.record(found.is_some());
        Ok(found)
    }

    async fn match_any(&self, url: &str) -> Result<Option<CachedResponse>> {
        let key = Self::entry_key(url);
        let candidates: Vec<String> = {
            let stores = self.stores.read().await;
            stores
                .iter()
                .filter(|s| s.entries.contains_key(&key))
                .map(|s| s.header.name.clone())
                .collect()
        };

        for name in candidates {
            if let Some(response) = self.read_entry(&name, &key).await {
                self.record(true);
                return Ok(Some(response));
            }
        }

        self.record(false);
        Ok(None)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        // Held until the directory is gone so a concurrent open of the same
        // name cannot recreate it first
        let mut stores = self.stores.write().await;
        let Some(idx) = stores.iter().position(|s| s.header.name == name) else {
            return Ok(false);
        };
        let store = stores.remove(idx);

        let size: u64 = store.entries.values().map(|e| e.size).sum();
        self.current_size.fetch_sub(size, Ordering::Relaxed);

        if let Err(e) = fs::remove_dir_all(&store.dir).await {
            warn!(cache = %name, error = %e, "Failed to remove cache store directory");
        }
        debug!(cache = %name, "Deleted cache store");
        Ok(true)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let stores = self.stores.read().await;
        Ok(stores.iter().map(|s| s.header.name.clone()).collect())
    }

    async fn stats(&self) -> CacheStats {
        let stores = self.stores.read().await;
        CacheStats {
            stores: stores.len(),
            entries: stores.iter().map(|s| s.entries.len()).sum(),
            total_size: self.current_size.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
