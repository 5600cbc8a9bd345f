//! Request path classification

use serde::Serialize;

/// What kind of resource a request path refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteClass {
    /// Bootstrap files of the compiled UI runtime (markup, script, wasm)
    AppShell,
    StaticAsset,
    Api,
    Other,
}

const FRAMEWORK_MARKER: &str = "flutter";
const APP_SHELL_SUFFIXES: &[&str] = &[".js", ".wasm", ".html"];
const STATIC_DIRS: &[&str] = &["/icons/", "/css/"];
const STATIC_SUFFIXES: &[&str] = &[".png", ".svg", ".ico", ".css"];
const API_SEGMENTS: &[&str] = &["/api/", "/oauth/"];
const CACHEABLE_MARKERS: &[&str] = &[".css", ".js", ".png", ".svg", "manifest.json"];

/// Classify a request path. Rules are tried app-shell, static, api in that
/// order and the first match wins.
pub fn classify(path: &str) -> RouteClass {
    if is_app_shell(path) {
        RouteClass::AppShell
    } else if is_static_asset(path) {
        RouteClass::StaticAsset
    } else if is_api_call(path) {
        RouteClass::Api
    } else {
        RouteClass::Other
    }
}

fn is_app_shell(path: &str) -> bool {
    path == "/"
        || path.contains(FRAMEWORK_MARKER)
        || APP_SHELL_SUFFIXES.iter().any(|s| path.ends_with(s))
}

fn is_static_asset(path: &str) -> bool {
    STATIC_DIRS.iter().any(|d| path.contains(d))
        || STATIC_SUFFIXES.iter().any(|s| path.ends_with(s))
}

fn is_api_call(path: &str) -> bool {
    API_SEGMENTS.iter().any(|s| path.contains(s))
}

/// Whether a network-first response for this URL may be written to the
/// runtime cache. Substring match, so `.json` passes through `.js`.
pub fn is_cacheable(url: &str) -> bool {
    CACHEABLE_MARKERS.iter().any(|m| url.contains(m))
}
