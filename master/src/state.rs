use std::sync::Arc;

use chrono::Utc;
use shared_types::{ApiReply, Heartbeat, MasterHealth, WorkerRegistration};
use tokio::{sync::Mutex, time::Instant};
use tracing::{info, warn};

use crate::{
    config::Config,
    error::MasterError,
    forward::WorkerClient,
    registry::{Registry, Removal},
};

/// Shared state behind every master route and background task.
///
/// The registry is only reachable through these methods; each one takes the
/// lock for a single short critical section.
pub struct MasterState {
    pub(crate) registry: Mutex<Registry>,
    pub(crate) client: WorkerClient,
}

impl MasterState {
    pub fn new(config: &Config) -> anyhow::Result<Arc<Self>> {
        let client = WorkerClient::new(config.probe_timeout, config.forward_timeout)?;
        let registry = Registry::with_tools(config.health_timeout, &config.tools);
        if !config.tools.is_empty() {
            info!(tools = ?config.tools, "pre-configured tool routes");
        }
        Ok(Arc::new(Self {
            registry: Mutex::new(registry),
            client,
        }))
    }

    /// Probe the worker, then upsert it into the registry.
    pub async fn register(&self, registration: WorkerRegistration) -> Result<ApiReply, MasterError> {
        if registration.worker_id.trim().is_empty() {
            return Err(MasterError::BadRequest("worker_id is required".to_string()));
        }

        if let Err(e) = self.client.probe(&registration.worker_url).await {
            warn!(
                worker_id = %registration.worker_id,
                worker_url = %registration.worker_url,
                error = %e,
                "rejected worker registration"
            );
            return Err(e);
        }

        let worker_id = registration.worker_id.clone();
        let worker_url = registration.worker_url.clone();
        let tools = registration.tools.clone();
        let host_info = registration.host_info.clone();

        let outcome = {
            let mut registry = self.registry.lock().await;
            registry.register(registration, Instant::now())
        };

        info!(%worker_id, %worker_url, ?tools, ?host_info, "worker registered");
        if !outcome.discovered.is_empty() {
            info!(tools = ?outcome.discovered, "discovered new tools");
        }
        for instance_id in &outcome.purged_instances {
            warn!(%worker_id, %instance_id, "dropped instance mapping for a tool the worker no longer hosts");
        }

        Ok(ApiReply::with_message(format!(
            "Worker {worker_id} registered successfully"
        )))
    }

    pub async fn heartbeat(&self, heartbeat: Heartbeat) -> Result<ApiReply, MasterError> {
        let mut registry = self.registry.lock().await;
        registry.heartbeat(&heartbeat.worker_id, heartbeat.instance_count, Instant::now())?;
        Ok(ApiReply::ok())
    }

    pub async fn unregister(&self, worker_id: &str) -> Result<ApiReply, MasterError> {
        let removal = {
            let mut registry = self.registry.lock().await;
            registry.unregister(worker_id)?
        };
        log_removal(&removal, "worker unregistered");
        Ok(ApiReply::with_message(format!(
            "Worker {worker_id} unregistered"
        )))
    }

    /// Remove every worker whose heartbeat is stale. Returns how many went.
    pub async fn sweep(&self) -> usize {
        let removals = {
            let mut registry = self.registry.lock().await;
            registry.sweep(Instant::now())
        };
        for removal in &removals {
            log_removal(removal, "swept worker with stale heartbeat");
        }
        removals.len()
    }

    pub async fn health(&self) -> MasterHealth {
        let registry = self.registry.lock().await;
        registry.snapshot(Instant::now(), Utc::now())
    }
}

fn log_removal(removal: &Removal, what: &str) {
    info!(
        worker_id = %removal.worker_id,
        purged_instances = removal.purged_instances.len(),
        "{what}"
    );
    for instance_id in &removal.purged_instances {
        info!(worker_id = %removal.worker_id, %instance_id, "dropped instance mapping");
    }
    for tool in &removal.orphaned_tools {
        warn!(%tool, "no worker hosts this tool any more");
    }
}
