//! Maps (method, url) to the strategy that serves it

use reqwest::Method;
use serde::Serialize;
use url::Url;

use crate::classify::{classify, RouteClass};
use crate::config::RoutingProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    NetworkFirst,
    CacheFirst,
    NetworkOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Not intercepted: the request goes out exactly as it came in
    Passthrough,
    Handle(Strategy),
}

/// Decide how a request is served. Only same-origin GETs are intercepted.
pub fn route(method: &Method, url: &Url, origin: &Url, profile: RoutingProfile) -> Route {
    if *method != Method::GET || url.origin() != origin.origin() {
        return Route::Passthrough;
    }

    if profile == RoutingProfile::Development {
        return Route::Handle(Strategy::NetworkFirst);
    }

    let strategy = match classify(url.path()) {
        RouteClass::AppShell => Strategy::NetworkFirst,
        RouteClass::StaticAsset => Strategy::CacheFirst,
        RouteClass::Api => Strategy::NetworkOnly,
        RouteClass::Other => Strategy::NetworkFirst,
    };
    Route::Handle(strategy)
}
