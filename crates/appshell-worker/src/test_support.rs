//! In-process fakes for the network and cache seams

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use appshell_cache::{CacheError, CacheStats, CacheStorage, CachedResponse, MemoryCacheStorage};
use async_trait::async_trait;
use reqwest::header::HeaderValue;
use reqwest::StatusCode;

use crate::error::{Result, WorkerError};
use crate::fetch::{Fetch, FetchRequest, FetchResponse};

/// Network fake: serves canned responses by URL, records every request, and
/// can be switched offline or told to fail specific URLs.
#[derive(Default)]
pub struct FakeNetwork {
    responses: Mutex<HashMap<String, FetchResponse>>,
    failing: Mutex<HashSet<String>>,
    offline: Mutex<bool>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, status: StatusCode, body: &str) {
        self.serve_with_headers(url, status, body, &[]);
    }

    pub fn serve_with_headers(
        &self,
        url: &str,
        status: StatusCode,
        body: &str,
        headers: &[(&'static str, &'static str)],
    ) {
        let mut response = FetchResponse::new(status, body.to_string());
        for (name, value) in headers {
            response
                .headers
                .append(*name, HeaderValue::from_static(*value));
        }
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    pub fn fail(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap() = offline;
    }

    pub fn calls(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.url.to_string())
            .collect()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls().iter().filter(|u| *u == url).count()
    }

    /// Most recent request sent to the network
    pub fn last_request(&self) -> Option<FetchRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Fetch for FakeNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        let url = request.url.to_string();
        self.requests.lock().unwrap().push(request.clone());

        if *self.offline.lock().unwrap() || self.failing.lock().unwrap().contains(&url) {
            return Err(WorkerError::Network(format!("failed to fetch {}", url)));
        }

        let canned = self.responses.lock().unwrap().get(&url).cloned();
        Ok(canned.unwrap_or_else(|| FetchResponse::new(StatusCode::NOT_FOUND, "not found")))
    }
}

/// Memory storage whose `put` can be made to fail
#[derive(Default)]
pub struct FlakyStorage {
    inner: MemoryCacheStorage,
    fail_puts: Mutex<bool>,
    puts: Mutex<usize>,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_puts(&self, fail: bool) {
        *self.fail_puts.lock().unwrap() = fail;
    }

    pub fn put_count(&self) -> usize {
        *self.puts.lock().unwrap()
    }
}

#[async_trait]
impl CacheStorage for FlakyStorage {
    async fn open(&self, name: &str) -> appshell_cache::Result<()> {
        self.inner.open(name).await
    }

    async fn put(
        &self,
        name: &str,
        url: &str,
        response: CachedResponse,
    ) -> appshell_cache::Result<()> {
        *self.puts.lock().unwrap() += 1;
        if *self.fail_puts.lock().unwrap() {
            return Err(CacheError::Io(Box::new(std::io::Error::new(
                std::io::ErrorKind::Other,
                "quota exceeded",
            ))));
        }
        self.inner.put(name, url, response).await
    }

    async fn match_in(
        &self,
        name: &str,
        url: &str,
    ) -> appshell_cache::Result<Option<CachedResponse>> {
        self.inner.match_in(name, url).await
    }

    async fn match_any(&self, url: &str) -> appshell_cache::Result<Option<CachedResponse>> {
        self.inner.match_any(url).await
    }

    async fn delete(&self, name: &str) -> appshell_cache::Result<bool> {
        self.inner.delete(name).await
    }

    async fn keys(&self) -> appshell_cache::Result<Vec<String>> {
        self.inner.keys().await
    }

    async fn stats(&self) -> CacheStats {
        self.inner.stats().await
    }
}
