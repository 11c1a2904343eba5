//! HTTP surface of a worker: the per-tool verbs plus health and a manual
//! registration trigger.

use std::any::Any;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use shared_types::{
    ApiReply, CreateInput, InstanceRequest, RegisterTriggerReply, ToolVerb, WorkerHealth,
    INSTANCE_ID_FIELD,
};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{app_state::WorkerState, lifecycle, tools::AdapterError};

pub fn router(state: WorkerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/register_to_master", post(register_to_master))
        .route("/{tool}/{verb}", post(tool_operation))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Unknown tool operation: {0}")]
    UnknownOperation(String),

    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::UnknownTool(_) | ApiError::UnknownOperation(_) => StatusCode::NOT_FOUND,
            ApiError::Adapter(AdapterError::InstanceExists(_)) => StatusCode::CONFLICT,
            ApiError::Adapter(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(ApiReply::failure(self.to_string()))).into_response()
    }
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    warn!(%detail, "tool adapter panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiReply::failure(format!("Tool panicked: {detail}"))),
    )
        .into_response()
}

async fn health(State(state): State<WorkerState>) -> Json<WorkerHealth> {
    Json(state.health())
}

async fn register_to_master(State(state): State<WorkerState>) -> Json<RegisterTriggerReply> {
    let Some(master) = state.master().cloned() else {
        return Json(RegisterTriggerReply {
            success: false,
            registered: None,
            error: Some("No master URL configured".to_string()),
        });
    };

    match lifecycle::register_once(&state, &master).await {
        Ok(()) => Json(RegisterTriggerReply {
            success: true,
            registered: Some(true),
            error: None,
        }),
        Err(e) => {
            warn!(error = %e, "manual registration failed");
            Json(RegisterTriggerReply {
                success: false,
                registered: Some(state.is_registered()),
                error: Some(e.to_string()),
            })
        }
    }
}

async fn tool_operation(
    State(state): State<WorkerState>,
    Path((tool, verb)): Path<(String, String)>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    match run_tool_operation(&state, &tool, &verb, payload).await {
        Ok(response) => response,
        Err(e) => {
            if matches!(e, ApiError::Adapter(_)) {
                warn!(%tool, %verb, error = %e, "tool operation failed");
            }
            e.into_response()
        }
    }
}

async fn run_tool_operation(
    state: &WorkerState,
    tool: &str,
    verb: &str,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let verb: ToolVerb = verb
        .parse()
        .map_err(|_| ApiError::UnknownOperation(verb.to_string()))?;
    let adapter = state
        .tools()
        .get(tool)
        .ok_or_else(|| ApiError::UnknownTool(tool.to_string()))?;
    let Json(body) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    match verb {
        ToolVerb::Create => {
            let input: CreateInput = serde_json::from_value(body)
                .map_err(|e| ApiError::BadRequest(format!("invalid create body: {e}")))?;
            let instance_id = input
                .instance_id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let handle = adapter.create(&instance_id, input.identity).await?;
            state.track_created(tool, &instance_id);
            info!(%tool, %instance_id, "instance created");
            Ok(Json(ApiReply::with_result(handle)).into_response())
        }
        ToolVerb::Execute => {
            let Value::Object(mut parameters) = body else {
                return Err(ApiError::BadRequest(
                    "execute body must be a JSON object".to_string(),
                ));
            };
            let instance_id = match parameters.remove(INSTANCE_ID_FIELD) {
                Some(Value::String(id)) if !id.is_empty() => id,
                _ => return Err(ApiError::BadRequest("instance_id is required".to_string())),
            };
            let output = adapter.execute(&instance_id, parameters).await?;
            Ok(Json(output).into_response())
        }
        ToolVerb::Release => {
            let instance_id = required_instance_id(body)?;
            let released = adapter.release(&instance_id).await?;
            state.track_released(tool, &instance_id);
            info!(%tool, %instance_id, released, "instance released");
            Ok(Json(ApiReply::with_result(Value::Bool(released))).into_response())
        }
        ToolVerb::CalcReward => {
            let instance_id = required_instance_id(body)?;
            let reward = adapter.calc_reward(&instance_id).await?;
            Ok(Json(reward).into_response())
        }
    }
}

fn required_instance_id(body: Value) -> Result<String, ApiError> {
    let request: InstanceRequest = serde_json::from_value(body)
        .map_err(|e| ApiError::BadRequest(format!("invalid request body: {e}")))?;
    request
        .instance_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::BadRequest("instance_id is required".to_string()))
}
