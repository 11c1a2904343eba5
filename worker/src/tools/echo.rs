use std::{
    collections::{hash_map::Entry, HashMap},
    sync::Mutex,
};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use shared_types::ExecuteOutput;

use super::{AdapterError, ToolAdapter};

/// Echoes execute parameters back. Zero reward; counts calls per instance.
#[derive(Default)]
pub struct EchoTool {
    calls: Mutex<HashMap<String, u64>>,
}

impl EchoTool {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ToolAdapter for EchoTool {
    fn name(&self) -> &str {
        "EchoTool"
    }

    async fn create(&self, instance_id: &str, identity: Option<Value>) -> Result<Value, AdapterError> {
        let mut calls = self
            .calls
            .lock()
            .map_err(|_| AdapterError::Internal("call table poisoned".to_string()))?;
        match calls.entry(instance_id.to_string()) {
            Entry::Occupied(_) => Err(AdapterError::InstanceExists(instance_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(0);
                Ok(json!({ "instance_id": instance_id, "identity": identity }))
            }
        }
    }

    async fn execute(
        &self,
        instance_id: &str,
        parameters: Map<String, Value>,
    ) -> Result<ExecuteOutput, AdapterError> {
        let mut calls = self
            .calls
            .lock()
            .map_err(|_| AdapterError::Internal("call table poisoned".to_string()))?;
        let count = calls
            .get_mut(instance_id)
            .ok_or_else(|| AdapterError::UnknownInstance(instance_id.to_string()))?;
        *count += 1;

        let text = Value::Object(parameters).to_string();
        let mut metrics = Map::new();
        metrics.insert("calls".to_string(), json!(*count));
        Ok(ExecuteOutput::new(text, 0.0, metrics))
    }

    async fn release(&self, instance_id: &str) -> Result<bool, AdapterError> {
        let mut calls = self
            .calls
            .lock()
            .map_err(|_| AdapterError::Internal("call table poisoned".to_string()))?;
        Ok(calls.remove(instance_id).is_some())
    }

    async fn calc_reward(&self, _instance_id: &str) -> Result<f64, AdapterError> {
        Ok(0.0)
    }
}
