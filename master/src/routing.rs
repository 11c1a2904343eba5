//! Session placement and sticky forwarding for `/{tool}/{verb}`.

use std::sync::Arc;

use serde_json::Value;
use shared_types::{instance_id_of, ToolVerb};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::{error::MasterError, state::MasterState};

impl MasterState {
    /// Run one tool operation to completion on its own task, so a caller
    /// hanging up does not abandon a forward halfway through its
    /// bookkeeping.
    pub async fn dispatch(
        self: &Arc<Self>,
        tool: String,
        verb: ToolVerb,
        body: Value,
    ) -> Result<Value, MasterError> {
        let state = Arc::clone(self);
        let task = tokio::spawn(async move {
            match verb {
                ToolVerb::Create => state.create(&tool, body).await,
                ToolVerb::Execute | ToolVerb::CalcReward => {
                    state.pass_through(&tool, verb, body).await
                }
                ToolVerb::Release => state.release(&tool, body).await,
            }
        });
        task.await
            .map_err(|e| MasterError::Internal(format!("tool operation task failed: {e}")))?
    }

    /// Place a new session on the least-loaded healthy host and bind it
    /// there once the worker confirms the create.
    pub async fn create(&self, tool: &str, body: Value) -> Result<Value, MasterError> {
        let instance_id = required_instance_id(&body)?;

        let placement = {
            let mut registry = self.registry.lock().await;
            let placement = registry.place(tool, &instance_id, Instant::now(), &mut rand::rng())?;
            info!(
                %tool,
                %instance_id,
                worker_id = %placement.worker_id,
                load = registry.load_of(&placement.worker_id),
                "routing create"
            );
            placement
        };

        let outcome = self
            .client
            .forward(&placement.url, &ToolVerb::Create.path_for(tool), &body)
            .await;
        let created = matches!(&outcome, Ok(reply) if reply_succeeded(reply));

        let bound = {
            let mut registry = self.registry.lock().await;
            registry.complete_placement(&placement, created)
        };

        match outcome {
            Ok(_) if created && !bound => {
                warn!(
                    %tool,
                    %instance_id,
                    worker_id = %placement.worker_id,
                    "worker left before the create completed"
                );
                Err(MasterError::WorkerUnavailable(placement.worker_id))
            }
            Ok(reply) => {
                if !created {
                    warn!(%tool, %instance_id, ?reply, "worker rejected create");
                }
                Ok(reply)
            }
            Err(e) => {
                warn!(%tool, %instance_id, error = %e, "create failed");
                Err(e)
            }
        }
    }

    /// `execute` and `calc_reward`: forward verbatim to the bound worker.
    pub async fn pass_through(
        &self,
        tool: &str,
        verb: ToolVerb,
        body: Value,
    ) -> Result<Value, MasterError> {
        let instance_id = required_instance_id(&body)?;
        let route = {
            let registry = self.registry.lock().await;
            registry.route(tool, &instance_id, Instant::now())?
        };
        info!(%tool, %verb, %instance_id, worker_id = %route.worker_id, "routing to bound worker");

        self.client
            .forward(&route.url, &verb.path_for(tool), &body)
            .await
    }

    /// Best-effort release on the bound worker; the binding is dropped
    /// whatever the worker answers. A release naming another tool than the
    /// binding's leaves it alone.
    pub async fn release(&self, tool: &str, body: Value) -> Result<Value, MasterError> {
        let instance_id = required_instance_id(&body)?;

        let route = {
            let registry = self.registry.lock().await;
            registry.release_route(tool, &instance_id)
        };

        let outcome = match route {
            Ok(route) => {
                info!(%tool, %instance_id, worker_id = %route.worker_id, "routing release");
                self.client
                    .forward(&route.url, &ToolVerb::Release.path_for(tool), &body)
                    .await
            }
            Err(e) => Err(e),
        };

        let removed = {
            let mut registry = self.registry.lock().await;
            registry.remove_binding(tool, &instance_id)
        };
        info!(
            %tool,
            %instance_id,
            released = outcome.is_ok(),
            had_binding = removed.is_some(),
            "instance mapping cleared"
        );

        outcome
    }
}

fn required_instance_id(body: &Value) -> Result<String, MasterError> {
    instance_id_of(body)
        .map(ToString::to_string)
        .ok_or_else(|| MasterError::BadRequest("instance_id is required".to_string()))
}

/// Replies without a `success` field count as success.
fn reply_succeeded(reply: &Value) -> bool {
    reply.get("success").and_then(Value::as_bool).unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reply_succeeded() {
        assert!(reply_succeeded(&json!({"success": true, "result": "x"})));
        assert!(reply_succeeded(&json!("x")));
        assert!(!reply_succeeded(&json!({"success": false, "error": "boom"})));
    }

    #[test]
    fn test_required_instance_id() {
        assert_eq!(required_instance_id(&json!({"instance_id": "x"})).unwrap(), "x");
        assert!(matches!(
            required_instance_id(&json!({"identity": {}})),
            Err(MasterError::BadRequest(_))
        ));
    }
}
