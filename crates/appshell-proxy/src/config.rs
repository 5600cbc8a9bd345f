use std::env;
use std::path::PathBuf;

use appshell_worker::config::{DEFAULT_CACHE_PREFIX, DEFAULT_CRITICAL_RESOURCES};
use appshell_worker::{CacheNames, RoutingProfile, WorkerConfig};
use url::Url;

use crate::error::{ProxyError, Result};
use crate::runtime_config::RuntimeConfig;

/// Gateway configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub port: u16,
    /// Origin serving the compiled web build
    pub origin: Url,
    /// File-backed cache storage root; in-memory when unset
    pub cache_dir: Option<PathBuf>,
    pub cache_names: CacheNames,
    pub critical_resources: Vec<String>,
    pub profile: RoutingProfile,
    pub request_timeout_secs: u64,
    pub runtime: RuntimeConfig,
}

impl ProxyConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Parse from any variable source
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = var("PORT")
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(3005);

        let origin_raw = var("ORIGIN_URL").unwrap_or_else(|| "http://localhost:8080".to_string());
        let origin = Url::parse(&origin_raw)
            .map_err(|e| ProxyError::Config(format!("ORIGIN_URL {:?}: {}", origin_raw, e)))?;

        let cache_dir = var("CACHE_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let prefix = var("CACHE_PREFIX").unwrap_or_else(|| DEFAULT_CACHE_PREFIX.to_string());
        let build_version = var("BUILD_VERSION").filter(|s| !s.trim().is_empty());
        let cache_names = CacheNames::for_prefix(&prefix, build_version.as_deref());

        let critical_resources = var("CRITICAL_RESOURCES")
            .map(|s| {
                s.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| {
                DEFAULT_CRITICAL_RESOURCES
                    .iter()
                    .map(|p| p.to_string())
                    .collect()
            });

        let profile = match var("ROUTING_PROFILE") {
            Some(raw) => raw.parse::<RoutingProfile>()?,
            None => RoutingProfile::default(),
        };

        let request_timeout_secs = var("REQUEST_TIMEOUT_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(30);

        let runtime = runtime_from_vars(&var)?;
        let errors = runtime.validate();
        if !errors.is_empty() {
            return Err(ProxyError::Config(format!(
                "invalid runtime configuration: {}",
                errors.join("; ")
            )));
        }

        Ok(Self {
            port,
            origin,
            cache_dir,
            cache_names,
            critical_resources,
            profile,
            request_timeout_secs,
            runtime,
        })
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::new(self.origin.clone())
            .with_cache_names(self.cache_names.clone())
            .with_critical_resources(self.critical_resources.clone())
            .with_profile(self.profile)
    }
}

fn runtime_from_vars<F>(var: &F) -> Result<RuntimeConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = RuntimeConfig::default();
    let flag = |key: &str, default: bool| {
        var(key)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(default)
    };

    // Signed so validation can reject non-positive values
    let timeout_duration = match var("TIMEOUT_DURATION") {
        Some(raw) => raw.trim().parse::<i64>().map_err(|e| {
            ProxyError::Config(format!("TIMEOUT_DURATION {:?}: {}", raw, e))
        })?,
        None => defaults.timeout_duration,
    };

    Ok(RuntimeConfig {
        api_base_url: var("API_BASE_URL").unwrap_or(defaults.api_base_url),
        environment: var("APP_ENVIRONMENT").unwrap_or(defaults.environment),
        enable_logging: flag("ENABLE_LOGGING", defaults.enable_logging),
        enable_mock_data: flag("ENABLE_MOCK_DATA", defaults.enable_mock_data),
        timeout_duration,
        app_name: var("APP_NAME").unwrap_or(defaults.app_name),
        app_version: var("APP_VERSION").unwrap_or(defaults.app_version),
    })
}
