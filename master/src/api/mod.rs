use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use shared_types::{Heartbeat, ToolVerb, Unregistration, WorkerRegistration};
use tower_http::trace::TraceLayer;

use crate::{error::MasterError, state::MasterState};

/// Master HTTP surface. Tool routes are one generic `/{tool}/{verb}` handler
/// dispatching through the registry's routing-surface table.
pub fn router(state: Arc<MasterState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/register_worker", post(register_worker))
        .route("/worker_heartbeat", post(worker_heartbeat))
        .route("/unregister_worker", post(unregister_worker))
        .route("/{tool}/{verb}", post(tool_operation))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health: registry snapshot
async fn health(State(state): State<Arc<MasterState>>) -> impl IntoResponse {
    Json(state.health().await)
}

/// POST /register_worker
async fn register_worker(
    State(state): State<Arc<MasterState>>,
    payload: Result<Json<WorkerRegistration>, JsonRejection>,
) -> Response {
    let registration = match payload {
        Ok(Json(registration)) => registration,
        Err(e) => return MasterError::BadRequest(e.body_text()).into_response(),
    };
    reply(state.register(registration).await)
}

/// POST /worker_heartbeat
async fn worker_heartbeat(
    State(state): State<Arc<MasterState>>,
    payload: Result<Json<Heartbeat>, JsonRejection>,
) -> Response {
    let heartbeat = match payload {
        Ok(Json(heartbeat)) => heartbeat,
        Err(e) => return MasterError::BadRequest(e.body_text()).into_response(),
    };
    reply(state.heartbeat(heartbeat).await)
}

/// POST /unregister_worker
async fn unregister_worker(
    State(state): State<Arc<MasterState>>,
    payload: Result<Json<Unregistration>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(e) => return MasterError::BadRequest(e.body_text()).into_response(),
    };
    reply(state.unregister(&request.worker_id).await)
}

/// POST /{tool}/{verb}: create/execute/release/calc_reward
async fn tool_operation(
    State(state): State<Arc<MasterState>>,
    Path((tool, verb)): Path<(String, String)>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let Ok(verb) = verb.parse::<ToolVerb>() else {
        return MasterError::UnknownOperation(verb).into_response();
    };
    if !state.registry.lock().await.is_known_tool(&tool) {
        return MasterError::UnknownTool(tool).into_response();
    }
    let body = match payload {
        Ok(Json(body)) => body,
        Err(e) => return MasterError::BadRequest(e.body_text()).into_response(),
    };

    match state.dispatch(tool, verb, body).await {
        Ok(value) => Json(value).into_response(),
        Err(e) => e.into_response(),
    }
}

fn reply<T: serde::Serialize>(result: Result<T, MasterError>) -> Response {
    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => e.into_response(),
    }
}
