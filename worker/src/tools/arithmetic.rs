use std::{
    collections::{hash_map::Entry, HashMap},
    sync::Mutex,
};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use shared_types::ExecuteOutput;

use super::{AdapterError, ToolAdapter};

/// Four-function calculator with per-instance history.
///
/// Each valid operation earns `step_reward`; malformed input earns
/// `penalty`. The cumulative reward decays by 0.1 per operation after the
/// first, floored at zero.
pub struct ArithmeticTool {
    step_reward: f64,
    penalty: f64,
    instances: Mutex<HashMap<String, Session>>,
}

#[derive(Debug, Default)]
struct Session {
    identity: Option<Value>,
    history: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl Operation {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "add" => Some(Self::Add),
            "subtract" => Some(Self::Subtract),
            "multiply" => Some(Self::Multiply),
            "divide" => Some(Self::Divide),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Subtract => "subtract",
            Self::Multiply => "multiply",
            Self::Divide => "divide",
        }
    }

    fn apply(self, a: f64, b: f64) -> Result<f64, String> {
        match self {
            Self::Add => Ok(a + b),
            Self::Subtract => Ok(a - b),
            Self::Multiply => Ok(a * b),
            Self::Divide if b == 0.0 => Err("Division by zero".to_string()),
            Self::Divide => Ok(a / b),
        }
    }
}

impl Default for ArithmeticTool {
    fn default() -> Self {
        Self {
            step_reward: 0.1,
            penalty: -0.1,
            instances: Mutex::new(HashMap::new()),
        }
    }
}

impl ArithmeticTool {
    /// Accepts `{ step_reward?, penalty? }`; anything else keeps defaults.
    pub fn from_config(config: &Value) -> Result<Self, AdapterError> {
        let mut tool = Self::default();
        if let Some(value) = config.get("step_reward") {
            tool.step_reward = value.as_f64().ok_or_else(|| {
                AdapterError::InvalidParameters("step_reward must be a number".to_string())
            })?;
        }
        if let Some(value) = config.get("penalty") {
            tool.penalty = value.as_f64().ok_or_else(|| {
                AdapterError::InvalidParameters("penalty must be a number".to_string())
            })?;
        }
        Ok(tool)
    }

    fn sessions(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Session>>, AdapterError> {
        self.instances
            .lock()
            .map_err(|_| AdapterError::Internal("instance table poisoned".to_string()))
    }

    fn rejected(&self, message: String) -> ExecuteOutput {
        let mut metrics = Map::new();
        metrics.insert("error".to_string(), Value::String(message.clone()));
        ExecuteOutput::new(format!("Error: {message}"), self.penalty, metrics)
    }
}

fn operand(parameters: &Map<String, Value>, key: &str) -> Result<f64, String> {
    match parameters.get(key) {
        None | Some(Value::Null) => Ok(0.0),
        Some(value) => value
            .as_f64()
            .ok_or_else(|| format!("{key} must be a number")),
    }
}

#[async_trait]
impl ToolAdapter for ArithmeticTool {
    fn name(&self) -> &str {
        "ArithmeticTool"
    }

    async fn create(&self, instance_id: &str, identity: Option<Value>) -> Result<Value, AdapterError> {
        let mut sessions = self.sessions()?;
        match sessions.entry(instance_id.to_string()) {
            Entry::Occupied(_) => Err(AdapterError::InstanceExists(instance_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Session {
                    identity,
                    history: Vec::new(),
                });
                Ok(Value::String(instance_id.to_string()))
            }
        }
    }

    async fn execute(
        &self,
        instance_id: &str,
        parameters: Map<String, Value>,
    ) -> Result<ExecuteOutput, AdapterError> {
        let mut sessions = self.sessions()?;
        let session = sessions
            .get_mut(instance_id)
            .ok_or_else(|| AdapterError::UnknownInstance(instance_id.to_string()))?;

        let raw_op = parameters
            .get("operation")
            .and_then(Value::as_str)
            .unwrap_or("add");
        let Some(op) = Operation::parse(raw_op) else {
            return Ok(self.rejected(format!("Unsupported operation: {raw_op}")));
        };
        let (a, b) = match (operand(&parameters, "operand1"), operand(&parameters, "operand2")) {
            (Ok(a), Ok(b)) => (a, b),
            (Err(e), _) | (_, Err(e)) => return Ok(self.rejected(e)),
        };
        let result = match op.apply(a, b) {
            Ok(result) => result,
            Err(e) => return Ok(self.rejected(e)),
        };

        session.history.push(json!({
            "operation": op.as_str(),
            "operand1": a,
            "operand2": b,
            "result": result,
        }));

        let mut metrics = Map::new();
        metrics.insert("operation".to_string(), json!(op.as_str()));
        metrics.insert("operand1".to_string(), json!(a));
        metrics.insert("operand2".to_string(), json!(b));
        metrics.insert("result".to_string(), json!(result));
        metrics.insert("operation_count".to_string(), json!(session.history.len()));

        Ok(ExecuteOutput::new(
            format!("Result: {a} {} {b} = {result}", op.as_str()),
            self.step_reward,
            metrics,
        ))
    }

    async fn release(&self, instance_id: &str) -> Result<bool, AdapterError> {
        let mut sessions = self.sessions()?;
        if let Some(session) = sessions.remove(instance_id) {
            tracing::debug!(
                %instance_id,
                operations = session.history.len(),
                identity = ?session.identity,
                "released arithmetic instance"
            );
            return Ok(true);
        }
        Ok(false)
    }

    async fn calc_reward(&self, instance_id: &str) -> Result<f64, AdapterError> {
        let sessions = self.sessions()?;
        let Some(session) = sessions.get(instance_id) else {
            return Ok(0.0);
        };
        let ops = session.history.len() as f64;
        Ok((1.0 - (ops - 1.0) * 0.1).clamp(0.0, 1.0))
    }
}
