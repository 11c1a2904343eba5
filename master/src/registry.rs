//! In-memory worker registry.
//!
//! Everything the master knows lives in one [`Registry`]: worker records,
//! the tool directory, the routing-surface table and the instance bindings.
//! The registry is synchronous and takes `now` explicitly; [`MasterState`]
//! owns it behind a single mutex and never holds that lock across a network
//! call.
//!
//! [`MasterState`]: crate::state::MasterState

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::seq::IndexedRandom;
use rand::Rng;
use serde_json::Value;
use shared_types::{Liveness, MasterHealth, WorkerRegistration, WorkerSummary};
use tokio::time::Instant;

use crate::error::MasterError;

pub struct WorkerRecord {
    pub worker_id: String,
    pub url: String,
    pub tools: Vec<String>,
    pub host_info: Option<Value>,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: Instant,
    /// Instance count from the worker's last heartbeat (diagnostic only).
    pub reported_instances: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub worker_id: String,
    pub tool: String,
}

/// A worker chosen for a new session, reserved until the create forward
/// finishes. Hand it back through [`Registry::complete_placement`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub instance_id: String,
    pub tool: String,
    pub worker_id: String,
    pub url: String,
}

/// Where calls for an existing instance go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub worker_id: String,
    pub url: String,
}

/// Outcome of a registration.
#[derive(Debug, Default)]
pub struct Registered {
    /// Tool names seen for the first time.
    pub discovered: Vec<String>,
    /// Bindings dropped because the worker no longer lists their tool.
    pub purged_instances: Vec<String>,
}

/// What an unregistration or sweep removed.
#[derive(Debug, Default)]
pub struct Removal {
    pub worker_id: String,
    pub purged_instances: Vec<String>,
    /// Tools left without any hosting worker.
    pub orphaned_tools: Vec<String>,
}

pub struct Registry {
    health_timeout: Duration,
    workers: HashMap<String, WorkerRecord>,
    /// tool name → workers hosting it
    directory: HashMap<String, BTreeSet<String>>,
    /// Routing surfaces in discovery order. Never shrinks.
    known_tools: Vec<String>,
    /// instance_id → owning worker
    bindings: HashMap<String, Binding>,
    /// worker_id → create forwards in flight
    reservations: HashMap<String, usize>,
    /// instance_id → worker a create is in flight on
    pending: HashMap<String, String>,
}

impl Registry {
    pub fn new(health_timeout: Duration) -> Self {
        Self {
            health_timeout,
            workers: HashMap::new(),
            directory: HashMap::new(),
            known_tools: Vec::new(),
            bindings: HashMap::new(),
            reservations: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// Registry whose routing surfaces for `tools` exist before any worker
    /// registers.
    pub fn with_tools<I, S>(health_timeout: Duration, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut registry = Self::new(health_timeout);
        for tool in tools {
            registry.discover_tool(tool.as_ref());
        }
        registry
    }

    pub fn health_timeout(&self) -> Duration {
        self.health_timeout
    }

    /// Create the routing surface for `tool` unless it already exists.
    /// Returns `true` only the first time a name is seen.
    pub fn discover_tool(&mut self, tool: &str) -> bool {
        if self.is_known_tool(tool) {
            return false;
        }
        self.known_tools.push(tool.to_string());
        true
    }

    pub fn is_known_tool(&self, tool: &str) -> bool {
        self.known_tools.iter().any(|t| t == tool)
    }

    pub fn known_tools(&self) -> &[String] {
        &self.known_tools
    }

    pub fn worker(&self, worker_id: &str) -> Option<&WorkerRecord> {
        self.workers.get(worker_id)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn binding(&self, instance_id: &str) -> Option<&Binding> {
        self.bindings.get(instance_id)
    }

    pub fn binding_total(&self) -> usize {
        self.bindings.len()
    }

    /// Workers currently listed for `tool`, healthy or not.
    pub fn hosts_of(&self, tool: &str) -> Vec<String> {
        self.directory
            .get(tool)
            .map(|hosts| hosts.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// `now − last_heartbeat < health_timeout`. Unknown workers are unhealthy.
    pub fn is_healthy(&self, worker_id: &str, now: Instant) -> bool {
        self.workers
            .get(worker_id)
            .map(|record| now.saturating_duration_since(record.last_heartbeat) < self.health_timeout)
            .unwrap_or(false)
    }

    /// Upsert a worker that already passed its reachability probe.
    pub fn register(&mut self, registration: WorkerRegistration, now: Instant) -> Registered {
        let WorkerRegistration {
            worker_id,
            worker_url,
            tools,
            host_info,
        } = registration;

        let mut unique_tools: Vec<String> = Vec::with_capacity(tools.len());
        for tool in tools {
            if !unique_tools.contains(&tool) {
                unique_tools.push(tool);
            }
        }

        // Re-registration replaces the tool list. Bindings survive only for
        // tools the worker still hosts.
        let mut purged_instances = Vec::new();
        if let Some(previous) = self.workers.remove(&worker_id) {
            self.drop_from_directory(&worker_id, &previous.tools);
            purged_instances = self.purge_bindings(|binding| {
                binding.worker_id == worker_id && !unique_tools.contains(&binding.tool)
            });
        }

        let mut discovered = Vec::new();
        for tool in &unique_tools {
            self.directory
                .entry(tool.clone())
                .or_default()
                .insert(worker_id.clone());
            if self.discover_tool(tool) {
                discovered.push(tool.clone());
            }
        }

        self.workers.insert(
            worker_id.clone(),
            WorkerRecord {
                worker_id,
                url: worker_url,
                tools: unique_tools,
                host_info,
                registered_at: Utc::now(),
                last_heartbeat: now,
                reported_instances: None,
            },
        );
        Registered {
            discovered,
            purged_instances,
        }
    }

    /// Refresh a registered worker's heartbeat.
    pub fn heartbeat(
        &mut self,
        worker_id: &str,
        reported_instances: Option<usize>,
        now: Instant,
    ) -> Result<(), MasterError> {
        let record = self
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| MasterError::UnknownWorker(worker_id.to_string()))?;
        record.last_heartbeat = now;
        if reported_instances.is_some() {
            record.reported_instances = reported_instances;
        }
        Ok(())
    }

    /// Remove a worker, its directory entries, its reservations and every
    /// binding pointing at it, all in one step.
    pub fn unregister(&mut self, worker_id: &str) -> Result<Removal, MasterError> {
        let record = self
            .workers
            .remove(worker_id)
            .ok_or_else(|| MasterError::UnknownWorker(worker_id.to_string()))?;

        let orphaned_tools = self.drop_from_directory(worker_id, &record.tools);
        self.reservations.remove(worker_id);

        let purged_instances = self.purge_bindings(|binding| binding.worker_id == worker_id);

        Ok(Removal {
            worker_id: worker_id.to_string(),
            purged_instances,
            orphaned_tools,
        })
    }

    pub fn stale_workers(&self, now: Instant) -> Vec<String> {
        let mut stale: Vec<String> = self
            .workers
            .keys()
            .filter(|worker_id| !self.is_healthy(worker_id, now))
            .cloned()
            .collect();
        stale.sort();
        stale
    }

    /// Unregister every worker failing the health predicate.
    pub fn sweep(&mut self, now: Instant) -> Vec<Removal> {
        self.stale_workers(now)
            .into_iter()
            .filter_map(|worker_id| self.unregister(&worker_id).ok())
            .collect()
    }

    /// Bindings routed to `worker_id`.
    pub fn binding_count(&self, worker_id: &str) -> usize {
        self.bindings
            .values()
            .filter(|binding| binding.worker_id == worker_id)
            .count()
    }

    /// Load used for placement: bindings plus creates still in flight.
    pub fn load_of(&self, worker_id: &str) -> usize {
        self.binding_count(worker_id) + self.reservations.get(worker_id).copied().unwrap_or(0)
    }

    /// Least-connections placement with a random tie-break among the
    /// least-loaded healthy hosts of `tool`. Reserves the chosen worker.
    pub fn place<R>(
        &mut self,
        tool: &str,
        instance_id: &str,
        now: Instant,
        rng: &mut R,
    ) -> Result<Placement, MasterError>
    where
        R: Rng + ?Sized,
    {
        if !self.is_known_tool(tool) {
            return Err(MasterError::UnknownTool(tool.to_string()));
        }
        let claimed_by = self
            .bindings
            .get(instance_id)
            .map(|binding| &binding.worker_id)
            .or_else(|| self.pending.get(instance_id));
        if let Some(worker_id) = claimed_by {
            return Err(MasterError::InstanceAlreadyBound {
                instance_id: instance_id.to_string(),
                worker_id: worker_id.clone(),
            });
        }

        let candidates: Vec<(usize, &String)> = self
            .directory
            .get(tool)
            .into_iter()
            .flatten()
            .filter(|worker_id| self.is_healthy(worker_id, now))
            .map(|worker_id| (self.load_of(worker_id), worker_id))
            .collect();

        let Some(min_load) = candidates.iter().map(|(load, _)| *load).min() else {
            return Err(MasterError::NoHealthyWorker(tool.to_string()));
        };
        let least_loaded: Vec<&String> = candidates
            .iter()
            .filter(|(load, _)| *load == min_load)
            .map(|(_, worker_id)| *worker_id)
            .collect();
        let worker_id = least_loaded
            .choose(rng)
            .map(|worker_id| (*worker_id).clone())
            .ok_or_else(|| MasterError::NoHealthyWorker(tool.to_string()))?;

        let url = self
            .workers
            .get(&worker_id)
            .map(|record| record.url.clone())
            .ok_or_else(|| MasterError::NoHealthyWorker(tool.to_string()))?;

        *self.reservations.entry(worker_id.clone()).or_insert(0) += 1;
        self.pending.insert(instance_id.to_string(), worker_id.clone());

        Ok(Placement {
            instance_id: instance_id.to_string(),
            tool: tool.to_string(),
            worker_id,
            url,
        })
    }

    /// Drop the reservation taken by [`Registry::place`] and, when the create
    /// forward succeeded and the worker is still registered, record the
    /// binding. Returns whether a binding was recorded.
    pub fn complete_placement(&mut self, placement: &Placement, created: bool) -> bool {
        if let Some(pending) = self.reservations.get_mut(&placement.worker_id) {
            *pending = pending.saturating_sub(1);
            if *pending == 0 {
                self.reservations.remove(&placement.worker_id);
            }
        }
        if self.pending.get(&placement.instance_id) == Some(&placement.worker_id) {
            self.pending.remove(&placement.instance_id);
        }

        if !created || !self.workers.contains_key(&placement.worker_id) {
            return false;
        }
        if self.bindings.contains_key(&placement.instance_id) {
            return false;
        }
        self.bindings.insert(
            placement.instance_id.clone(),
            Binding {
                worker_id: placement.worker_id.clone(),
                tool: placement.tool.clone(),
            },
        );
        true
    }

    /// Route for `execute`/`calc_reward`: the bound worker, which must be
    /// healthy.
    pub fn route(&self, tool: &str, instance_id: &str, now: Instant) -> Result<Route, MasterError> {
        let route = self.bound_route(tool, instance_id)?;
        if !self.is_healthy(&route.worker_id, now) {
            return Err(MasterError::WorkerUnavailable(route.worker_id));
        }
        Ok(route)
    }

    /// Route for `release`: the bound worker whatever its health.
    pub fn release_route(&self, tool: &str, instance_id: &str) -> Result<Route, MasterError> {
        self.bound_route(tool, instance_id)
    }

    /// Drop the binding of `instance_id` if it belongs to `tool`.
    pub fn remove_binding(&mut self, tool: &str, instance_id: &str) -> Option<Binding> {
        if self.bindings.get(instance_id)?.tool != tool {
            return None;
        }
        self.bindings.remove(instance_id)
    }

    /// Health report. `wall_now` anchors monotonic heartbeats to wall time.
    pub fn snapshot(&self, now: Instant, wall_now: DateTime<Utc>) -> MasterHealth {
        let workers: BTreeMap<String, WorkerSummary> = self
            .workers
            .values()
            .map(|record| {
                let age = now.saturating_duration_since(record.last_heartbeat);
                let last_heartbeat = chrono::Duration::from_std(age)
                    .map(|age| wall_now - age)
                    .unwrap_or(wall_now);
                let status = if self.is_healthy(&record.worker_id, now) {
                    Liveness::Alive
                } else {
                    Liveness::Dead
                };
                (
                    record.worker_id.clone(),
                    WorkerSummary {
                        url: record.url.clone(),
                        tools: record.tools.clone(),
                        last_heartbeat,
                        status,
                        instance_count: self.binding_count(&record.worker_id),
                        reported_instances: record.reported_instances,
                        registered_at: record.registered_at,
                        host_info: record.host_info.clone(),
                    },
                )
            })
            .collect();

        MasterHealth {
            status: "ok".to_string(),
            tools: self.known_tools.clone(),
            registered_workers: self.workers.len(),
            workers,
            instance_mappings: self.bindings.len(),
        }
    }

    fn bound_route(&self, tool: &str, instance_id: &str) -> Result<Route, MasterError> {
        let binding = self
            .bindings
            .get(instance_id)
            .filter(|binding| binding.tool == tool)
            .ok_or_else(|| MasterError::UnknownInstance(instance_id.to_string()))?;
        let record = self
            .workers
            .get(&binding.worker_id)
            .ok_or_else(|| MasterError::UnknownInstance(instance_id.to_string()))?;
        Ok(Route {
            worker_id: record.worker_id.clone(),
            url: record.url.clone(),
        })
    }

    /// Remove every binding matching `doomed`. Returns the instance ids, sorted.
    fn purge_bindings<F>(&mut self, doomed: F) -> Vec<String>
    where
        F: Fn(&Binding) -> bool,
    {
        let mut purged: Vec<String> = self
            .bindings
            .iter()
            .filter(|(_, binding)| doomed(binding))
            .map(|(instance_id, _)| instance_id.clone())
            .collect();
        purged.sort();
        for instance_id in &purged {
            self.bindings.remove(instance_id);
        }
        purged
    }

    /// Returns the tools that no longer have any host.
    fn drop_from_directory(&mut self, worker_id: &str, tools: &[String]) -> Vec<String> {
        let mut orphaned = Vec::new();
        for tool in tools {
            if let Some(hosts) = self.directory.get_mut(tool) {
                hosts.remove(worker_id);
                if hosts.is_empty() {
                    self.directory.remove(tool);
                    orphaned.push(tool.clone());
                }
            }
        }
        orphaned
    }
}
