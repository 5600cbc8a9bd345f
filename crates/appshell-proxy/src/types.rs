//! Response bodies for the gateway's own endpoints

use appshell_cache::CacheStats;
use appshell_worker::{RoutingProfile, WorkerState};
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub state: WorkerState,
    pub profile: RoutingProfile,
    pub core_cache: String,
    pub runtime_cache: String,
    pub cache: CacheStats,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
