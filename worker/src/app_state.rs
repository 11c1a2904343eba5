use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use serde_json::Value;
use shared_types::{Heartbeat, WorkerHealth, WorkerRegistration};

use crate::{master_client::MasterClient, tools::ToolTable};

/// Timing of the registration and heartbeat loops.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub heartbeat_interval: Duration,
    pub register_backoff: Duration,
    /// `0` retries forever.
    pub register_max_attempts: u32,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            register_backoff: Duration::from_secs(1),
            register_max_attempts: 0,
        }
    }
}

#[derive(Clone)]
pub struct WorkerState {
    inner: Arc<WorkerStateInner>,
}

struct WorkerStateInner {
    worker_id: String,
    worker_url: String,
    host_info: Option<Value>,
    tools: ToolTable,
    master: Option<MasterClient>,
    settings: LifecycleSettings,
    registered: AtomicBool,
    registering: AtomicBool,
    heartbeat_running: AtomicBool,
    /// `(tool, instance_id)` pairs created here and not yet released.
    live_instances: Mutex<HashSet<(String, String)>>,
}

impl WorkerState {
    pub fn new(
        worker_id: impl Into<String>,
        worker_url: impl Into<String>,
        tools: ToolTable,
        master: Option<MasterClient>,
    ) -> Self {
        Self {
            inner: Arc::new(WorkerStateInner {
                worker_id: worker_id.into(),
                worker_url: worker_url.into(),
                host_info: None,
                tools,
                master,
                settings: LifecycleSettings::default(),
                registered: AtomicBool::new(false),
                registering: AtomicBool::new(false),
                heartbeat_running: AtomicBool::new(false),
                live_instances: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Only valid before the state is shared.
    pub fn with_settings(self, settings: LifecycleSettings) -> Self {
        self.map_inner(|inner| inner.settings = settings)
    }

    pub fn with_host_info(self, host_info: Value) -> Self {
        self.map_inner(|inner| inner.host_info = Some(host_info))
    }

    fn map_inner(mut self, f: impl FnOnce(&mut WorkerStateInner)) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            f(inner);
        } else {
            tracing::warn!("worker state already shared; builder call ignored");
        }
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.inner.worker_id
    }

    pub fn worker_url(&self) -> &str {
        &self.inner.worker_url
    }

    pub fn tools(&self) -> &ToolTable {
        &self.inner.tools
    }

    pub fn master(&self) -> Option<&MasterClient> {
        self.inner.master.as_ref()
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.inner.settings
    }

    pub fn is_registered(&self) -> bool {
        self.inner.registered.load(Ordering::SeqCst)
    }

    pub fn set_registered(&self, registered: bool) {
        self.inner.registered.store(registered, Ordering::SeqCst);
    }

    /// Claim the registration loop. False if one is already running.
    pub(crate) fn try_begin_registering(&self) -> bool {
        self.inner
            .registering
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn end_registering(&self) {
        self.inner.registering.store(false, Ordering::SeqCst);
    }

    pub(crate) fn try_begin_heartbeat(&self) -> bool {
        self.inner
            .heartbeat_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn end_heartbeat(&self) {
        self.inner.heartbeat_running.store(false, Ordering::SeqCst);
    }

    pub fn heartbeat_running(&self) -> bool {
        self.inner.heartbeat_running.load(Ordering::SeqCst)
    }

    pub fn track_created(&self, tool: &str, instance_id: &str) {
        if let Ok(mut live) = self.inner.live_instances.lock() {
            live.insert((tool.to_string(), instance_id.to_string()));
        }
    }

    pub fn track_released(&self, tool: &str, instance_id: &str) {
        if let Ok(mut live) = self.inner.live_instances.lock() {
            live.remove(&(tool.to_string(), instance_id.to_string()));
        }
    }

    pub fn instance_count(&self) -> usize {
        self.inner
            .live_instances
            .lock()
            .map(|live| live.len())
            .unwrap_or(0)
    }

    pub fn registration(&self) -> WorkerRegistration {
        WorkerRegistration {
            worker_id: self.inner.worker_id.clone(),
            worker_url: self.inner.worker_url.clone(),
            tools: self.inner.tools.names(),
            host_info: self.inner.host_info.clone(),
        }
    }

    pub fn heartbeat(&self) -> Heartbeat {
        Heartbeat {
            worker_id: self.inner.worker_id.clone(),
            status: Some("alive".to_string()),
            instance_count: Some(self.instance_count()),
        }
    }

    pub fn health(&self) -> WorkerHealth {
        WorkerHealth {
            status: "ok".to_string(),
            worker_id: self.inner.worker_id.clone(),
            tools: self.inner.tools.names(),
            is_registered: self.is_registered(),
            master_url: self.master().map(|m| m.base_url().to_string()),
            instance_count: self.instance_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_tracking() {
        let state = WorkerState::new("w", "http://127.0.0.1:1", ToolTable::builtin(), None);
        state.track_created("ArithmeticTool", "a");
        state.track_created("ArithmeticTool", "a");
        state.track_created("EchoTool", "a");
        assert_eq!(state.instance_count(), 2);

        state.track_released("ArithmeticTool", "a");
        state.track_released("ArithmeticTool", "missing");
        assert_eq!(state.instance_count(), 1);
        assert_eq!(state.heartbeat().instance_count, Some(1));
    }

    #[test]
    fn test_registration_payload() {
        let state = WorkerState::new("w", "http://10.0.0.1:8001", ToolTable::builtin(), None)
            .with_host_info(serde_json::json!({"hostname": "box"}));
        let registration = state.registration();
        assert_eq!(registration.worker_url, "http://10.0.0.1:8001");
        assert_eq!(registration.tools, vec!["ArithmeticTool", "EchoTool"]);
        assert_eq!(registration.host_info.unwrap()["hostname"], "box");

        let health = state.health();
        assert!(!health.is_registered);
        assert!(health.master_url.is_none());
    }

    #[test]
    fn test_loop_claims_are_exclusive() {
        let state = WorkerState::new("w", "u", ToolTable::new(), None);
        assert!(state.try_begin_heartbeat());
        assert!(!state.try_begin_heartbeat());
        state.end_heartbeat();
        assert!(state.try_begin_heartbeat());

        assert!(state.try_begin_registering());
        assert!(!state.try_begin_registering());
        state.end_registering();
        assert!(state.try_begin_registering());
        assert!(state.heartbeat_running());
    }
}
