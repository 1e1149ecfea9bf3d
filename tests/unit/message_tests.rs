//! Unit tests for JSON-RPC envelope encoding and inbound validation.

use serde_json::json;

use turn_pilot::rpc::message::{InboundMessage, Notification, Request, RpcError};
use turn_pilot::AppError;

// ── Outbound ────────────────────────────────────────────────────────────────

#[test]
fn notification_has_no_id() {
    let params = json!({});
    let value = serde_json::to_value(Notification::new("notifications/initialized", &params))
        .expect("serialize");

    assert_eq!(value["jsonrpc"], "2.0");
    assert_eq!(value["method"], "notifications/initialized");
    assert!(value.get("id").is_none());
}

#[test]
fn request_carries_id_and_params() {
    let params = json!({ "name": "game.send_intent", "arguments": { "x": 1 } });
    let value = serde_json::to_value(Request::new(3, "tools/call", &params)).expect("serialize");

    assert_eq!(value["id"], 3);
    assert_eq!(value["params"]["arguments"]["x"], 1);
}

// ── Inbound: accepted shapes ────────────────────────────────────────────────

#[test]
fn result_response_decodes() {
    let msg = InboundMessage::decode(r#"{"jsonrpc":"2.0","id":4,"result":{"tools":[]}}"#)
        .expect("valid response");

    assert_eq!(
        msg,
        InboundMessage::Result {
            id: 4,
            result: json!({ "tools": [] })
        }
    );
}

#[test]
fn error_response_decodes() {
    let msg = InboundMessage::decode(
        r#"{"jsonrpc":"2.0","id":2,"error":{"code":-1,"message":"bad"}}"#,
    )
    .expect("valid error response");

    assert_eq!(
        msg,
        InboundMessage::Error {
            id: Some(2),
            error: RpcError {
                code: -1,
                message: "bad".into(),
                data: None
            }
        }
    );
}

#[test]
fn error_response_with_null_id_decodes() {
    let msg = InboundMessage::decode(
        r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"Parse error"}}"#,
    )
    .expect("valid error response");

    assert!(matches!(msg, InboundMessage::Error { id: None, .. }));
}

#[test]
fn peer_notification_is_recognised() {
    let msg = InboundMessage::decode(
        r#"{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info"}}"#,
    )
    .expect("valid notification");

    assert_eq!(
        msg,
        InboundMessage::PeerMessage {
            method: "notifications/message".into()
        }
    );
}

#[test]
fn rpc_error_converts_to_remote() {
    let err: AppError = RpcError {
        code: -1,
        message: "bad".into(),
        data: Some(json!({ "detail": 1 })),
    }
    .into();

    assert!(matches!(err, AppError::Remote { code: -1, ref message } if message == "bad"));
}

// ── Inbound: rejected shapes ────────────────────────────────────────────────

fn assert_malformed(line: &str) {
    match InboundMessage::decode(line) {
        Err(AppError::MalformedResponse(_)) => {}
        other => panic!("expected MalformedResponse for {line:?}, got {other:?}"),
    }
}

#[test]
fn non_json_line_is_malformed() {
    assert_malformed("Server listening on port 8765");
}

#[test]
fn json_array_is_malformed() {
    assert_malformed(r#"[{"jsonrpc":"2.0","id":1,"result":{}}]"#);
}

#[test]
fn wrong_version_is_malformed() {
    assert_malformed(r#"{"jsonrpc":"1.0","id":1,"result":{}}"#);
}

#[test]
fn result_and_error_together_is_malformed() {
    assert_malformed(r#"{"jsonrpc":"2.0","id":1,"result":{},"error":{"code":1,"message":"x"}}"#);
}

#[test]
fn neither_result_nor_error_is_malformed() {
    assert_malformed(r#"{"jsonrpc":"2.0","id":1}"#);
}

#[test]
fn string_id_is_malformed() {
    assert_malformed(r#"{"jsonrpc":"2.0","id":"1","result":{}}"#);
}

#[test]
fn result_without_id_is_malformed() {
    assert_malformed(r#"{"jsonrpc":"2.0","result":{}}"#);
}
