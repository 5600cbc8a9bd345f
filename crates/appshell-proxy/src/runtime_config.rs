//! Runtime client configuration served as `/config.js`
//!
//! Lets a deployment point the compiled app at its API and toggle logging
//! without rebuilding. The page loads the script before bootstrapping and
//! reads `window.appConfig`.

use serde::Serialize;
use url::Url;

pub const ENVIRONMENTS: &[&str] = &["development", "production"];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    pub api_base_url: String,
    pub environment: String,
    pub enable_logging: bool,
    pub enable_mock_data: bool,
    /// Request timeout in seconds
    pub timeout_duration: i64,
    pub app_name: String,
    pub app_version: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080".to_string(),
            environment: "production".to_string(),
            enable_logging: false,
            enable_mock_data: false,
            timeout_duration: 30,
            app_name: "App".to_string(),
            app_version: "1.0.0".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Every problem with the configuration, empty when valid
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.api_base_url.trim().is_empty() {
            errors.push("apiBaseUrl must be a valid string".to_string());
        } else if Url::parse(&self.api_base_url).is_err() {
            errors.push("apiBaseUrl must be a valid URL".to_string());
        }

        if !ENVIRONMENTS.contains(&self.environment.as_str()) {
            errors.push(
                "environment must be either \"development\" or \"production\"".to_string(),
            );
        }

        if self.timeout_duration <= 0 {
            errors.push("timeoutDuration must be a positive number".to_string());
        }

        errors
    }

    /// The `/config.js` body
    pub fn render(&self) -> String {
        let json = serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string());
        format!("window.appConfig = {};\n", json)
    }
}
