//! Worker configuration: cache generation names, critical resources, routing profile

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use url::Url;

use crate::error::{Result, WorkerError};

/// Token in a cache name template that the deployment replaces with its build id
pub const BUILD_VERSION_PLACEHOLDER: &str = "__BUILD_VERSION__";

pub const DEFAULT_CACHE_PREFIX: &str = "appshell";

pub const DEFAULT_CRITICAL_RESOURCES: &[&str] = &["/manifest.json", "/favicon.png"];

/// Names of the two cache generations owned by the current build
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheNames {
    /// Populated at install time, immutable afterwards
    pub core: String,
    /// Filled opportunistically while serving
    pub runtime: String,
}

impl CacheNames {
    /// Build names from templates, substituting the build version when known.
    /// Without one the placeholder is kept verbatim.
    pub fn from_templates(core: &str, runtime: &str, build_version: Option<&str>) -> Self {
        let fill = |template: &str| match build_version {
            Some(version) => template.replace(BUILD_VERSION_PLACEHOLDER, version),
            None => template.to_string(),
        };
        Self {
            core: fill(core),
            runtime: fill(runtime),
        }
    }

    /// `<prefix>-v<build>` and `<prefix>-runtime-v<build>`
    pub fn for_prefix(prefix: &str, build_version: Option<&str>) -> Self {
        Self::from_templates(
            &format!("{}-v{}", prefix, BUILD_VERSION_PLACEHOLDER),
            &format!("{}-runtime-v{}", prefix, BUILD_VERSION_PLACEHOLDER),
            build_version,
        )
    }

    pub fn is_current(&self, name: &str) -> bool {
        name == self.core || name == self.runtime
    }
}

impl Default for CacheNames {
    fn default() -> Self {
        Self::for_prefix(DEFAULT_CACHE_PREFIX, None)
    }
}

/// How same-origin GET requests are mapped to strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingProfile {
    /// Per-class strategies: app-shell network-first, static cache-first,
    /// api network-only
    #[default]
    Standard,
    /// Everything network-first, for builds under active development
    Development,
}

impl FromStr for RoutingProfile {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" | "production" => Ok(RoutingProfile::Standard),
            "development" | "dev" => Ok(RoutingProfile::Development),
            other => Err(WorkerError::Config(format!(
                "Unknown routing profile: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for RoutingProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingProfile::Standard => write!(f, "standard"),
            RoutingProfile::Development => write!(f, "development"),
        }
    }
}

/// Everything the worker needs, injected at startup
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Origin the app is served from; other origins are never intercepted
    pub origin: Url,
    pub cache_names: CacheNames,
    /// Root-relative paths pre-cached at install, in order
    pub critical_resources: Vec<String>,
    pub profile: RoutingProfile,
}

impl WorkerConfig {
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            cache_names: CacheNames::default(),
            critical_resources: DEFAULT_CRITICAL_RESOURCES
                .iter()
                .map(|p| p.to_string())
                .collect(),
            profile: RoutingProfile::default(),
        }
    }

    pub fn with_cache_names(mut self, cache_names: CacheNames) -> Self {
        self.cache_names = cache_names;
        self
    }

    pub fn with_critical_resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.critical_resources = resources.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_profile(mut self, profile: RoutingProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Absolute URLs of the critical resources, resolved against the origin
    pub fn critical_urls(&self) -> Result<Vec<Url>> {
        self.critical_resources
            .iter()
            .map(|path| self.origin.join(path).map_err(WorkerError::from))
            .collect()
    }
}
