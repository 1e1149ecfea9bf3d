//! Unit tests for decision types and the OpenAI-compatible wire mapping.

use serde_json::{json, Map};

use turn_pilot::config::PolicyConfig;
use turn_pilot::policy::openai::OpenAiEngine;
use turn_pilot::policy::{DecisionRequest, InvocationArguments, OperationSpec};
use turn_pilot::AppError;

fn request() -> DecisionRequest {
    DecisionRequest {
        system: "You play the game.".into(),
        prompt: "Tick 1".into(),
        operations: vec![OperationSpec {
            name: "game.send_intent".into(),
            description: "Send an intent".into(),
            parameters: json!({
                "type": "object",
                "properties": { "intent": { "type": "object" } },
                "required": ["intent"]
            }),
        }],
    }
}

fn engine() -> OpenAiEngine {
    OpenAiEngine::new(&PolicyConfig::default(), None).expect("engine builds")
}

// ── Argument parsing ────────────────────────────────────────────────────────

#[test]
fn object_arguments_parse() {
    let args = InvocationArguments::parse(r#"{"x": 3, "y": 4}"#);
    let InvocationArguments::Object(map) = args else {
        panic!("expected an object, got {args:?}");
    };
    assert_eq!(map.get("x"), Some(&json!(3)));
}

#[test]
fn empty_and_null_arguments_are_an_empty_object() {
    assert_eq!(InvocationArguments::parse(""), InvocationArguments::Object(Map::new()));
    assert_eq!(InvocationArguments::parse("  "), InvocationArguments::Object(Map::new()));
    assert_eq!(InvocationArguments::parse("null"), InvocationArguments::Object(Map::new()));
}

#[test]
fn broken_json_arguments_are_invalid() {
    let args = InvocationArguments::parse("{\"x\": ");
    assert!(matches!(args, InvocationArguments::Invalid { ref raw, .. } if raw == "{\"x\": "));
}

#[test]
fn non_object_arguments_are_invalid() {
    assert!(matches!(
        InvocationArguments::parse("[1, 2]"),
        InvocationArguments::Invalid { .. }
    ));
    assert!(matches!(
        InvocationArguments::from_value(json!("go north")),
        InvocationArguments::Invalid { .. }
    ));
}

// ── Request body ────────────────────────────────────────────────────────────

#[test]
fn endpoint_joins_base_url_without_double_slash() {
    let config = PolicyConfig {
        base_url: "http://127.0.0.1:11434/v1/".into(),
        ..PolicyConfig::default()
    };
    let engine = OpenAiEngine::new(&config, None).expect("engine builds");
    assert_eq!(engine.endpoint(), "http://127.0.0.1:11434/v1/chat/completions");
}

/// The operation's name, description and schema reach the wire unchanged.
#[test]
fn request_body_offers_operations_as_functions() {
    let engine = engine();
    let request = request();
    let body = serde_json::to_value(engine.request_body(&request)).expect("serialize");

    assert_eq!(body["model"], "qwen3:4b");
    assert_eq!(body["tool_choice"], "auto");
    assert_eq!(body["messages"][0], json!({ "role": "system", "content": "You play the game." }));
    assert_eq!(body["messages"][1], json!({ "role": "user", "content": "Tick 1" }));

    let tool = &body["tools"][0];
    assert_eq!(tool["type"], "function");
    assert_eq!(tool["function"]["name"], "game.send_intent");
    assert_eq!(tool["function"]["description"], "Send an intent");
    assert_eq!(tool["function"]["parameters"], request.operations[0].parameters);
}

#[test]
fn request_body_without_operations_omits_tools() {
    let engine = engine();
    let request = DecisionRequest {
        operations: Vec::new(),
        ..request()
    };
    let body = serde_json::to_value(engine.request_body(&request)).expect("serialize");

    assert!(body.get("tools").is_none());
    assert!(body.get("tool_choice").is_none());
}

#[test]
fn debug_output_masks_api_key() {
    let engine = OpenAiEngine::new(&PolicyConfig::default(), Some("sk-secret".into()))
        .expect("engine builds");
    let rendered = format!("{engine:?}");
    assert!(!rendered.contains("sk-secret"));
    assert!(rendered.contains("***"));
}

// ── Response parsing ────────────────────────────────────────────────────────

#[test]
fn tool_calls_become_invocations_in_order() {
    let body = json!({
        "choices": [{
            "message": {
                "role": "assistant",
                "content": "Expanding east.",
                "tool_calls": [
                    { "id": "a", "type": "function",
                      "function": { "name": "game.send_intent", "arguments": "{\"intent\":{\"type\":\"attack\"}}" } },
                    { "id": "b", "type": "function",
                      "function": { "name": "game.get_tile", "arguments": "{\"x\":1,\"y\":2}" } }
                ]
            }
        }]
    })
    .to_string();

    let decision = OpenAiEngine::parse_response(&body).expect("valid completion");

    assert_eq!(decision.text.as_deref(), Some("Expanding east."));
    assert_eq!(decision.invocations.len(), 2);
    assert_eq!(decision.invocations[0].name, "game.send_intent");
    assert_eq!(decision.invocations[1].name, "game.get_tile");
    let InvocationArguments::Object(ref args) = decision.invocations[0].arguments else {
        panic!("expected object arguments");
    };
    assert_eq!(args["intent"]["type"], "attack");
}

#[test]
fn object_arguments_are_accepted_too() {
    let body = json!({
        "choices": [{ "message": { "content": null, "tool_calls": [
            { "function": { "name": "noop", "arguments": { "n": 1 } } }
        ] } }]
    })
    .to_string();

    let decision = OpenAiEngine::parse_response(&body).expect("valid completion");

    assert_eq!(decision.text, None);
    assert!(matches!(
        decision.invocations[0].arguments,
        InvocationArguments::Object(ref map) if map["n"] == 1
    ));
}

#[test]
fn text_only_answer_has_no_invocations() {
    let body = json!({ "choices": [{ "message": { "content": "Waiting this turn." } }] }).to_string();

    let decision = OpenAiEngine::parse_response(&body).expect("valid completion");

    assert_eq!(decision.text.as_deref(), Some("Waiting this turn."));
    assert!(decision.invocations.is_empty());
}

#[test]
fn blank_text_is_dropped() {
    let body = json!({ "choices": [{ "message": { "content": "  \n" } }] }).to_string();
    let decision = OpenAiEngine::parse_response(&body).expect("valid completion");
    assert_eq!(decision.text, None);
}

#[test]
fn no_choices_is_a_policy_error() {
    let err = OpenAiEngine::parse_response(r#"{"choices":[]}"#).expect_err("no choices");
    assert!(matches!(err, AppError::Policy(_)));
}

#[test]
fn non_completion_body_is_a_policy_error() {
    let err = OpenAiEngine::parse_response("<html>bad gateway</html>").expect_err("not json");
    assert!(matches!(err, AppError::Policy(_)));
}
