//! Unit tests for stdout line classification in the stream inspector.

use serde_json::json;

use turn_pilot::inspect::{classify_stdout_line, InspectReport, StreamEvent, JSON_PREVIEW_CHARS};

#[test]
fn game_update_reports_tick() {
    let event = classify_stdout_line(r#"{"type":"GameUpdate","payload":{"tick":42,"updates":[]}}"#);
    assert_eq!(event, Some(StreamEvent::GameUpdate { tick: Some(json!(42)) }));
}

#[test]
fn session_info_carries_payload() {
    let event = classify_stdout_line(r#"{"type":"session_info","payload":{"clientID":"abc"}}"#);
    assert_eq!(
        event,
        Some(StreamEvent::SessionInfo(json!({ "clientID": "abc" })))
    );
}

#[test]
fn other_json_is_truncated_preview() {
    let long = format!(r#"{{"type":"other","data":"{}"}}"#, "x".repeat(300));
    let Some(StreamEvent::Json(preview)) = classify_stdout_line(&long) else {
        panic!("expected a json preview");
    };
    assert_eq!(preview.chars().count(), JSON_PREVIEW_CHARS);
    assert!(long.starts_with(&preview));
}

#[test]
fn plain_text_is_a_log_line() {
    assert_eq!(
        classify_stdout_line("  WebSocket server listening on 8765 \n"),
        Some(StreamEvent::Log("WebSocket server listening on 8765".into()))
    );
}

#[test]
fn blank_line_is_skipped() {
    assert_eq!(classify_stdout_line("   "), None);
}

#[test]
fn report_counts_by_kind() {
    let mut report = InspectReport::default();
    for line in [
        r#"{"type":"GameUpdate","payload":{"tick":1}}"#,
        r#"{"type":"GameUpdate","payload":{"tick":2}}"#,
        r#"{"type":"session_info","payload":{}}"#,
        r#"{"jsonrpc":"2.0","id":1,"result":{}}"#,
        "starting",
    ] {
        let event = classify_stdout_line(line).expect("non-blank");
        report.record(&event);
    }

    assert_eq!(report.game_updates, 2);
    assert_eq!(report.session_infos, 1);
    assert_eq!(report.other_json, 1);
    assert_eq!(report.log_lines, 1);
    assert!(!report.cancelled);
}
