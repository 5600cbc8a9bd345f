//! The network seam: request/response values and the HTTP fetcher

use std::time::Duration;

use appshell_cache::CachedResponse;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT_ENCODING, CACHE_CONTROL, VARY,
};
use reqwest::{Client, Method, StatusCode};
use tracing::debug;
use url::Url;

use crate::error::Result;

/// Headers that describe one connection and must not be forwarded or cached
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// Request headers that make a response specific to one user
const CREDENTIAL_HEADERS: &[&str] = &["authorization", "cookie"];

/// Remove connection-scoped headers in place
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FetchRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Cache key: the full request URL
    pub fn cache_key(&self) -> &str {
        self.url.as_str()
    }

    /// Whether the request carries a cookie or authorization header
    pub fn has_credentials(&self) -> bool {
        CREDENTIAL_HEADERS
            .iter()
            .any(|name| self.headers.contains_key(*name))
    }

    /// Copy of this request asking for an unencoded body, so one cached
    /// entry suits every client regardless of its `Accept-Encoding`
    pub fn identity_encoded(&self) -> Self {
        let mut request = self.clone();
        request
            .headers
            .insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        request
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FetchResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// A complete 2xx response. Partial content is never written to a cache.
    pub fn storable(&self) -> bool {
        self.status.is_success() && self.status != StatusCode::PARTIAL_CONTENT
    }

    /// `Cache-Control` forbids keeping the response in a cache shared by
    /// every client (`no-store` or `private`)
    pub fn forbids_shared_cache(&self) -> bool {
        self.headers
            .get_all(CACHE_CONTROL)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(|directive| directive.trim().to_ascii_lowercase())
            .any(|directive| directive == "no-store" || directive.starts_with("private"))
    }

    /// Whether the body depends on nothing but the URL. Entries are keyed by
    /// URL alone, so a `Vary` naming any request header other than
    /// `Accept-Encoding` (which strategies pin to `identity`) rules caching out.
    pub fn varies_by_url_only(&self) -> bool {
        self.headers
            .get_all(VARY)
            .iter()
            .map(|value| value.to_str().unwrap_or("*"))
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .all(|name| name.eq_ignore_ascii_case("accept-encoding"))
    }

    pub fn to_cached(&self) -> CachedResponse {
        let headers = self
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        CachedResponse::new(self.status.as_u16(), headers, self.body.clone())
    }
}

impl From<CachedResponse> for FetchResponse {
    fn from(cached: CachedResponse) -> Self {
        let mut headers = HeaderMap::new();
        for (name, value) in &cached.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }
        Self {
            status: StatusCode::from_u16(cached.status).unwrap_or(StatusCode::OK),
            headers,
            body: cached.body,
        }
    }
}

/// Something that can perform a network request.
///
/// An `Err` means the request never produced a response (connection refused,
/// DNS failure, timeout). HTTP error statuses are successful fetches.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse>;
}

/// Fetcher backed by a reqwest client
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Redirects are handed back to the caller rather than followed
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        let mut headers = request.headers.clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(reqwest::header::HOST);

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(headers);
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        debug!(method = %request.method, url = %request.url, "Fetching from network");
        let response = builder.send().await?;

        let status = response.status();
        let mut headers = response.headers().clone();
        strip_hop_by_hop(&mut headers);
        let body = response.bytes().await?;

        debug!(url = %request.url, status = %status, size = body.len(), "Network response");
        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }
}
