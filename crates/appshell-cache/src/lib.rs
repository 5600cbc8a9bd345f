//! Named response cache stores
//!
//! Mirrors the browser Cache Storage API: a set of named stores, each mapping a
//! request URL to at most one cached response. Two backends are provided, an
//! in-memory one backed by moka and a file-backed one that keeps an in-memory
//! index over bodies stored on disk.

mod error;
mod file;
mod memory;
mod storage;
mod types;

pub use error::{CacheError, Result};
pub use file::FileCacheStorage;
pub use memory::MemoryCacheStorage;
pub use storage::CacheStorage;
pub use types::{CacheStats, CachedResponse, EntryMeta};
