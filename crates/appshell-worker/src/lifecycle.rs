//! Worker lifecycle: install, activate, and control messages
//!
//! ```text
//! Uninstalled --install()--> Installing --> Waiting --activate()--> Active
//! ```
//!
//! Install pre-caches the critical resources into the core cache on a
//! best-effort basis and always asks to skip waiting. Activation deletes
//! every cache generation other than the two current ones and claims the
//! open clients, after which requests are routed through the strategies.

use std::fmt;
use std::sync::Arc;

use appshell_cache::CacheStorage;
use serde::Serialize;
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::error::{Result, WorkerError};
use crate::fetch::{Fetch, FetchRequest};
use crate::message::{VersionReply, WorkerMessage};
use crate::strategy::StrategyRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Uninstalled,
    Installing,
    Waiting,
    Active,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Uninstalled => "uninstalled",
            WorkerState::Installing => "installing",
            WorkerState::Waiting => "waiting",
            WorkerState::Active => "active",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy)]
struct Status {
    state: WorkerState,
    skip_waiting: bool,
    clients_claimed: bool,
}

/// Result of the install step
#[derive(Debug, Clone, Default, Serialize)]
pub struct InstallReport {
    pub cache: String,
    /// Critical resource URLs now in the core cache
    pub cached: Vec<String>,
    /// Critical resource URLs that could not be cached
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    SkipWaiting { activated: bool },
    VersionSent,
    Ignored,
}

pub struct Lifecycle {
    config: Arc<WorkerConfig>,
    cache: Arc<dyn CacheStorage>,
    network: Arc<dyn Fetch>,
    status: RwLock<Status>,
    /// Serialises install and activation
    transition: Mutex<()>,
}

impl Lifecycle {
    pub fn new(config: WorkerConfig, cache: Arc<dyn CacheStorage>, network: Arc<dyn Fetch>) -> Self {
        Self {
            config: Arc::new(config),
            cache,
            network,
            status: RwLock::new(Status {
                state: WorkerState::Uninstalled,
                skip_waiting: false,
                clients_claimed: false,
            }),
            transition: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<dyn CacheStorage> {
        &self.cache
    }

    /// Strategy runner writing into this worker's runtime cache
    pub fn runner(&self) -> StrategyRunner {
        StrategyRunner::new(
            Arc::clone(&self.cache),
            Arc::clone(&self.network),
            self.config.cache_names.runtime.clone(),
        )
    }

    pub async fn state(&self) -> WorkerState {
        self.status.read().await.state
    }

    pub async fn skip_waiting_requested(&self) -> bool {
        self.status.read().await.skip_waiting
    }

    /// Whether requests should be routed through the strategies
    pub async fn is_controlling(&self) -> bool {
        let status = self.status.read().await;
        status.state == WorkerState::Active && status.clients_claimed
    }

    async fn set_state(&self, state: WorkerState) {
        let mut status = self.status.write().await;
        debug!(from = %status.state, to = %state, "Worker state change");
        status.state = state;
    }

    async fn expect_state(&self, expected: WorkerState, to: WorkerState) -> Result<()> {
        let current = self.state().await;
        if current != expected {
            return Err(WorkerError::InvalidTransition { from: current, to });
        }
        Ok(())
    }

    /// Install, then activate straight away if skip-waiting was requested
    pub async fn start(&self) -> Result<()> {
        self.install().await?;
        if self.skip_waiting_requested().await {
            self.activate_if_waiting().await?;
        }
        Ok(())
    }

    /// Open the core cache and pre-cache the critical resources.
    ///
    /// A resource that fails to fetch or store is logged and skipped; only a
    /// failure to open the core cache aborts the install.
    pub async fn install(&self) -> Result<InstallReport> {
        let _guard = self.transition.lock().await;
        self.expect_state(WorkerState::Uninstalled, WorkerState::Installing)
            .await?;
        self.set_state(WorkerState::Installing).await;

        let core = self.config.cache_names.core.clone();
        info!(cache = %core, "Worker installing");

        let urls = match self.config.critical_urls() {
            Ok(urls) => urls,
            Err(e) => {
                self.set_state(WorkerState::Uninstalled).await;
                return Err(e);
            }
        };
        if let Err(e) = self.cache.open(&core).await {
            self.set_state(WorkerState::Uninstalled).await;
            return Err(e.into());
        }

        let mut report = InstallReport {
            cache: core.clone(),
            ..Default::default()
        };

        for url in urls {
            let request = FetchRequest::get(url);
            let key = request.cache_key().to_string();

            let stored = match self.network.fetch(&request).await {
                Ok(response) if response.storable() => self
                    .cache
                    .put(&core, &key, response.to_cached())
                    .await
                    .map_err(|e| e.to_string()),
                Ok(response) => Err(format!("status {}", response.status)),
                Err(e) => Err(e.to_string()),
            };

            match stored {
                Ok(()) => report.cached.push(key),
                Err(reason) => {
                    warn!(url = %key, reason = %reason, "Failed to cache critical resource, continuing");
                    report.failed.push(key);
                }
            }
        }

        {
            let mut status = self.status.write().await;
            status.skip_waiting = true;
            status.state = WorkerState::Waiting;
        }
        info!(
            cached = report.cached.len(),
            failed = report.failed.len(),
            "Worker installed"
        );
        Ok(report)
    }

    /// Delete stale cache generations and claim clients. Returns the names
    /// of the deleted caches.
    pub async fn activate(&self) -> Result<Vec<String>> {
        let _guard = self.transition.lock().await;
        self.activate_locked().await
    }

    async fn activate_if_waiting(&self) -> Result<bool> {
        let _guard = self.transition.lock().await;
        if self.state().await != WorkerState::Waiting {
            return Ok(false);
        }
        self.activate_locked().await?;
        Ok(true)
    }

    async fn activate_locked(&self) -> Result<Vec<String>> {
        self.expect_state(WorkerState::Waiting, WorkerState::Active)
            .await?;
        info!("Worker activating");

        let names = &self.config.cache_names;
        let mut deleted = Vec::new();
        for name in self.cache.keys().await? {
            if !names.is_current(&name) {
                info!(cache = %name, "Deleting old cache");
                self.cache.delete(&name).await?;
                deleted.push(name);
            }
        }
        self.cache.open(&names.core).await?;
        self.cache.open(&names.runtime).await?;

        {
            let mut status = self.status.write().await;
            status.state = WorkerState::Active;
            status.clients_claimed = true;
        }
        info!(deleted = deleted.len(), "Worker active, clients claimed");
        Ok(deleted)
    }

    /// Request immediate activation. Returns whether this call activated
    /// the worker.
    pub async fn skip_waiting(&self) -> Result<bool> {
        self.status.write().await.skip_waiting = true;
        self.activate_if_waiting().await
    }

    /// Handle a message posted by a page. `port` is the reply channel.
    pub async fn handle_message(
        &self,
        message: &serde_json::Value,
        port: Option<oneshot::Sender<VersionReply>>,
    ) -> Result<MessageOutcome> {
        match WorkerMessage::parse(message) {
            Some(WorkerMessage::SkipWaiting) => {
                let activated = self.skip_waiting().await?;
                Ok(MessageOutcome::SkipWaiting { activated })
            }
            Some(WorkerMessage::GetVersion) => {
                let Some(port) = port else {
                    warn!("GET_VERSION message without a reply port");
                    return Ok(MessageOutcome::Ignored);
                };
                let reply = VersionReply {
                    version: self.config.cache_names.core.clone(),
                };
                if port.send(reply).is_err() {
                    debug!("GET_VERSION requester went away before the reply");
                }
                Ok(MessageOutcome::VersionSent)
            }
            None => {
                debug!(message = %message, "Ignoring unrecognised message");
                Ok(MessageOutcome::Ignored)
            }
        }
    }
}
