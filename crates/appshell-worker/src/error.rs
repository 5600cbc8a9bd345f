//! Error types for the app-shell worker

use std::fmt;

use crate::lifecycle::WorkerState;

#[derive(Debug)]
pub enum WorkerError {
    Http(Box<reqwest::Error>),
    /// Transport failure reported by a non-reqwest fetcher
    Network(String),
    Cache(appshell_cache::CacheError),
    Config(String),
    InvalidTransition {
        from: WorkerState,
        to: WorkerState,
    },
}

impl WorkerError {
    /// Whether this is a failure to reach the network at all, as opposed to
    /// a local problem
    pub fn is_network_failure(&self) -> bool {
        matches!(self, WorkerError::Http(_) | WorkerError::Network(_))
    }
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::Http(err) => write!(f, "HTTP error: {}", err),
            WorkerError::Network(msg) => write!(f, "Network error: {}", msg),
            WorkerError::Cache(err) => write!(f, "Cache error: {}", err),
            WorkerError::Config(msg) => write!(f, "Configuration error: {}", msg),
            WorkerError::InvalidTransition { from, to } => {
                write!(f, "Invalid lifecycle transition from {} to {}", from, to)
            }
        }
    }
}

impl std::error::Error for WorkerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WorkerError::Http(err) => Some(err.as_ref()),
            WorkerError::Cache(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for WorkerError {
    fn from(err: reqwest::Error) -> Self {
        WorkerError::Http(Box::new(err))
    }
}

impl From<appshell_cache::CacheError> for WorkerError {
    fn from(err: appshell_cache::CacheError) -> Self {
        WorkerError::Cache(err)
    }
}

impl From<url::ParseError> for WorkerError {
    fn from(err: url::ParseError) -> Self {
        WorkerError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WorkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_error_display() {
        let err = WorkerError::Network("connection refused".to_string());
        assert_eq!(format!("{}", err), "Network error: connection refused");
        assert!(err.is_network_failure());
    }

    #[test]
    fn test_cache_error_is_not_network_failure() {
        let err = WorkerError::Cache(appshell_cache::CacheError::InvalidName(String::new()));
        assert!(!err.is_network_failure());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = WorkerError::InvalidTransition {
            from: WorkerState::Active,
            to: WorkerState::Installing,
        };
        assert_eq!(
            format!("{}", err),
            "Invalid lifecycle transition from active to installing"
        );
    }

    #[test]
    fn test_url_parse_error_is_config() {
        let err: WorkerError = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, WorkerError::Config(_)));
    }
}
