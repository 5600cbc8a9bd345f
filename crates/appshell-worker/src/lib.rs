//! App-shell worker
//!
//! Request routing and caching policy for a compiled Flutter web build:
//! which requests are served network-first, cache-first or network-only,
//! how the core cache is pre-populated at install time, and how stale cache
//! generations are cleared at activation. All I/O goes through the [`Fetch`]
//! and [`CacheStorage`] seams so the policy runs without a browser.

pub mod classify;
pub mod config;
pub mod error;
pub mod fetch;
pub mod lifecycle;
pub mod message;
pub mod router;
pub mod strategy;

#[cfg(test)]
pub(crate) mod test_support;

pub use appshell_cache::{CacheStorage, CachedResponse};
pub use classify::{classify, is_cacheable, RouteClass};
pub use config::{CacheNames, RoutingProfile, WorkerConfig, BUILD_VERSION_PLACEHOLDER};
pub use error::{Result, WorkerError};
pub use fetch::{Fetch, FetchRequest, FetchResponse, HttpFetcher};
pub use lifecycle::{InstallReport, Lifecycle, MessageOutcome, WorkerState};
pub use message::{VersionReply, WorkerMessage};
pub use router::{route, Route, Strategy};
pub use strategy::{ResponseSource, Served, StrategyRunner};
