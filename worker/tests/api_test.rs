//! Worker HTTP surface integration tests

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Map, Value};
use shared_types::ExecuteOutput;
use tower::ServiceExt;

use worker::api;
use worker::tools::{AdapterError, ToolAdapter, ToolTable};
use worker::WorkerState;

struct PanickingTool;

#[async_trait]
impl ToolAdapter for PanickingTool {
    fn name(&self) -> &str {
        "PanickingTool"
    }

    async fn create(&self, instance_id: &str, _identity: Option<Value>) -> Result<Value, AdapterError> {
        Ok(json!(instance_id))
    }

    async fn execute(
        &self,
        _instance_id: &str,
        _parameters: Map<String, Value>,
    ) -> Result<ExecuteOutput, AdapterError> {
        panic!("adapter blew up");
    }

    async fn release(&self, _instance_id: &str) -> Result<bool, AdapterError> {
        Err(AdapterError::Internal("release not supported".to_string()))
    }

    async fn calc_reward(&self, _instance_id: &str) -> Result<f64, AdapterError> {
        Ok(0.0)
    }
}

fn setup_test_app() -> (axum::Router, WorkerState) {
    let mut tools = ToolTable::builtin();
    tools.insert(Arc::new(PanickingTool));
    let state = WorkerState::new("worker-test", "http://127.0.0.1:8001", tools, None);
    (api::router(state.clone()), state)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_response(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.expect("request failed");
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("failed to read body")
        .to_bytes();
    let value: Value = serde_json::from_slice(&body).expect("invalid json");
    (status, value)
}

#[tokio::test]
async fn test_health_reports_tools_and_registration() {
    let (app, _state) = setup_test_app();

    let req = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (status, body) = json_response(&app, req).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["worker_id"], "worker-test");
    assert_eq!(body["tools"], json!(["ArithmeticTool", "EchoTool", "PanickingTool"]));
    assert_eq!(body["is_registered"], false);
    assert_eq!(body["master_url"], Value::Null);
    assert_eq!(body["instance_count"], 0);
}

#[tokio::test]
async fn test_register_trigger_without_master() {
    let (app, _state) = setup_test_app();

    let (status, body) = json_response(&app, post_json("/register_to_master", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "No master URL configured");
}

#[tokio::test]
async fn test_arithmetic_session_lifecycle() {
    let (app, state) = setup_test_app();

    let (status, body) = json_response(
        &app,
        post_json(
            "/ArithmeticTool/create",
            json!({"instance_id": "calc-1", "identity": {"user": "u1"}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true, "result": "calc-1"}));
    assert_eq!(state.instance_count(), 1);

    let (status, body) = json_response(
        &app,
        post_json(
            "/ArithmeticTool/execute",
            json!({"instance_id": "calc-1", "operation": "add", "operand1": 2, "operand2": 3}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0], "Result: 2 add 3 = 5");
    assert_eq!(body[1], 0.1);
    assert_eq!(body[2]["operation_count"], 1);

    let (status, body) = json_response(
        &app,
        post_json("/ArithmeticTool/calc_reward", json!({"instance_id": "calc-1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(1.0));

    let (status, body) = json_response(
        &app,
        post_json("/ArithmeticTool/release", json!({"instance_id": "calc-1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true, "result": true}));
    assert_eq!(state.instance_count(), 0);
}

#[tokio::test]
async fn test_create_without_instance_id_generates_one() {
    let (app, state) = setup_test_app();

    let (status, body) =
        json_response(&app, post_json("/ArithmeticTool/create", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    let generated = body["result"].as_str().expect("generated id");
    assert!(uuid::Uuid::parse_str(generated).is_ok());
    assert_eq!(state.instance_count(), 1);
}

#[tokio::test]
async fn test_adapter_error_is_structured() {
    let (app, _state) = setup_test_app();

    let (status, body) = json_response(
        &app,
        post_json("/ArithmeticTool/execute", json!({"instance_id": "ghost"})),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn test_duplicate_create_conflicts() {
    let (app, state) = setup_test_app();

    let create = json!({"instance_id": "calc-1"});
    let (status, _) = json_response(&app, post_json("/ArithmeticTool/create", create.clone())).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = json_response(&app, post_json("/ArithmeticTool/create", create)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Instance already exists: calc-1");
    assert_eq!(state.instance_count(), 1);
}

#[tokio::test]
async fn test_adapter_panic_is_caught() {
    let (app, _state) = setup_test_app();

    let (status, body) = json_response(
        &app,
        post_json("/PanickingTool/execute", json!({"instance_id": "p1"})),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("adapter blew up"));

    // The worker keeps serving afterwards.
    let (status, _) = json_response(
        &app,
        post_json("/PanickingTool/calc_reward", json!({"instance_id": "p1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_failed_release_keeps_instance_counted() {
    let (app, state) = setup_test_app();

    json_response(&app, post_json("/PanickingTool/create", json!({"instance_id": "p1"}))).await;
    assert_eq!(state.instance_count(), 1);

    let (status, body) = json_response(
        &app,
        post_json("/PanickingTool/release", json!({"instance_id": "p1"})),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Tool error: release not supported");
    assert_eq!(state.instance_count(), 1);
}

#[tokio::test]
async fn test_request_errors() {
    let (app, _state) = setup_test_app();

    let (status, body) =
        json_response(&app, post_json("/NoSuchTool/create", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Unknown tool: NoSuchTool");

    let (status, _) =
        json_response(&app, post_json("/ArithmeticTool/explode", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = json_response(
        &app,
        post_json("/ArithmeticTool/execute", json!({"operation": "add"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "instance_id is required");

    let (status, _) =
        json_response(&app, post_json("/ArithmeticTool/execute", json!([1, 2]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let req = Request::builder()
        .method("POST")
        .uri("/ArithmeticTool/create")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = json_response(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}
