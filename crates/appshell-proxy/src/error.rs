//! Error types for the app-shell gateway

use std::fmt;

#[derive(Debug)]
pub enum ProxyError {
    Worker(appshell_worker::WorkerError),
    Cache(appshell_cache::CacheError),
    Io(Box<std::io::Error>),
    Config(String),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::Worker(err) => write!(f, "Worker error: {}", err),
            ProxyError::Cache(err) => write!(f, "Cache error: {}", err),
            ProxyError::Io(err) => write!(f, "IO error: {}", err),
            ProxyError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProxyError::Worker(err) => Some(err),
            ProxyError::Cache(err) => Some(err),
            ProxyError::Io(err) => Some(err.as_ref()),
            ProxyError::Config(_) => None,
        }
    }
}

impl From<appshell_worker::WorkerError> for ProxyError {
    fn from(err: appshell_worker::WorkerError) -> Self {
        ProxyError::Worker(err)
    }
}

impl From<appshell_cache::CacheError> for ProxyError {
    fn from(err: appshell_cache::CacheError) -> Self {
        ProxyError::Cache(err)
    }
}

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        ProxyError::Io(Box::new(err))
    }
}

impl From<tracing_subscriber::filter::ParseError> for ProxyError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        ProxyError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
