//! Integration tests for the OpenAI-compatible decision engine against an
//! in-process `axum` server.

use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

use turn_pilot::config::PolicyConfig;
use turn_pilot::policy::openai::OpenAiEngine;
use turn_pilot::policy::{DecisionEngine, DecisionRequest, InvocationArguments, OperationSpec};
use turn_pilot::AppError;

#[derive(Clone)]
struct MockState {
    status: StatusCode,
    response: Value,
    seen: Arc<Mutex<Vec<(Option<String>, Value)>>>,
}

async fn completions(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    state.seen.lock().unwrap().push((auth, body));
    (state.status, Json(state.response.clone()))
}

/// Serve `response` with `status` on an ephemeral port; returns the base URL
/// and the captured requests.
async fn mock_server(
    status: StatusCode,
    response: Value,
) -> (String, Arc<Mutex<Vec<(Option<String>, Value)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let state = MockState {
        status,
        response,
        seen: Arc::clone(&seen),
    };
    let app = Router::new()
        .route("/v1/chat/completions", post(completions))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock server runs");
    });

    (format!("http://{addr}/v1"), seen)
}

fn config(base_url: &str) -> PolicyConfig {
    PolicyConfig {
        base_url: base_url.to_owned(),
        model: "test-model".into(),
        request_timeout_seconds: 5,
        ..PolicyConfig::default()
    }
}

fn request() -> DecisionRequest {
    DecisionRequest {
        system: "You play the game.".into(),
        prompt: "Tick 5".into(),
        operations: vec![OperationSpec {
            name: "game.send_intent".into(),
            description: "Send an intent".into(),
            parameters: json!({ "type": "object", "properties": { "intent": { "type": "object" } } }),
        }],
    }
}

#[tokio::test]
async fn decide_posts_chat_completion_and_parses_tool_calls() {
    let (base_url, seen) = mock_server(
        StatusCode::OK,
        json!({
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "",
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": "game.send_intent", "arguments": "{\"intent\":{\"type\":\"spawn\"}}" }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }),
    )
    .await;
    let engine = OpenAiEngine::new(&config(&base_url), None).expect("engine builds");

    let decision = engine.decide(&request()).await.expect("decision");

    assert_eq!(decision.text, None);
    assert_eq!(decision.invocations.len(), 1);
    assert_eq!(decision.invocations[0].name, "game.send_intent");
    assert!(matches!(
        decision.invocations[0].arguments,
        InvocationArguments::Object(ref map) if map["intent"]["type"] == "spawn"
    ));

    let seen = seen.lock().unwrap();
    let (auth, body) = &seen[0];
    assert_eq!(auth, &None);
    assert_eq!(body["model"], "test-model");
    assert_eq!(body["tools"][0]["function"]["name"], "game.send_intent");
    assert_eq!(body["tool_choice"], "auto");
    assert_eq!(body["messages"][1]["content"], "Tick 5");
}

#[tokio::test]
async fn api_key_is_sent_as_bearer() {
    let (base_url, seen) = mock_server(
        StatusCode::OK,
        json!({ "choices": [{ "message": { "content": "ok" } }] }),
    )
    .await;
    let engine =
        OpenAiEngine::new(&config(&base_url), Some("sk-test".into())).expect("engine builds");

    engine.decide(&request()).await.expect("decision");

    assert_eq!(seen.lock().unwrap()[0].0.as_deref(), Some("Bearer sk-test"));
}

#[tokio::test]
async fn error_status_is_a_policy_error() {
    let (base_url, _seen) = mock_server(
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({ "error": { "message": "model not loaded" } }),
    )
    .await;
    let engine = OpenAiEngine::new(&config(&base_url), None).expect("engine builds");

    let err = engine.decide(&request()).await.expect_err("server error");

    match err {
        AppError::Policy(msg) => {
            assert!(msg.contains("500"), "status missing: {msg}");
            assert!(msg.contains("model not loaded"), "body missing: {msg}");
        }
        other => panic!("expected Policy, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_endpoint_is_a_policy_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let engine = OpenAiEngine::new(&config(&format!("http://{addr}/v1")), None)
        .expect("engine builds");

    let err = engine.decide(&request()).await.expect_err("connection refused");

    assert!(matches!(err, AppError::Policy(_)));
    assert!(!err.is_session_fatal());
}
