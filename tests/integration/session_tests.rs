//! End-to-end session tests against small `sh` peers.
//!
//! Unix only. The JSON-RPC peer below answers `tools/list` and
//! `resources/read` and rejects everything else.

#![cfg(unix)]

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use turn_pilot::config::{GlobalConfig, PeerConfig};
use turn_pilot::session::run_session;
use turn_pilot::AppError;

use super::test_helpers::ScriptedEngine;

const RPC_PEER: &str = r#"
echo "Tick: 0" >&2
echo "Game connected successfully" >&2
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed 's/.*"id":\([0-9][0-9]*\).*/\1/')
  case "$line" in
    *'"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"noop","description":"does nothing","inputSchema":{"type":"object"}}]}}\n' "$id" ;;
    *'"resources/read"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"contents":[{"text":"{\\"tick\\":1}"}]}}\n' "$id" ;;
    *)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32601,"message":"nope"}}\n' "$id" ;;
  esac
done
"#;

fn config(script: &str) -> GlobalConfig {
    let mut config = GlobalConfig::from_toml_str("[peer]\ncommand = \"sh\"\n").expect("valid config");
    config.peer = PeerConfig::from_command("sh", vec!["-c".into(), script.into()]);
    config.peer.shutdown_grace_seconds = 2;
    config.handshake.timeout_seconds = 5;
    config.turns.interval_seconds = 0;
    config
}

#[tokio::test]
async fn session_runs_turns_and_cleans_up() {
    let mut config = config(RPC_PEER);
    config.turns.max_turns = Some(2);
    let engine = ScriptedEngine::default();

    let summary = run_session(&config, &engine, CancellationToken::new())
        .await
        .expect("session succeeds");

    assert_eq!(summary.turns, 2);
    assert_eq!(summary.failed_turns, 0);
    assert_eq!(engine.calls(), 2);

    let requests = engine.requests.lock().unwrap();
    assert_eq!(requests[0].operations.len(), 1);
    assert_eq!(requests[0].operations[0].name, "noop");
    assert!(requests[0].prompt.contains("\"tick\": 1"));
}

#[tokio::test]
async fn missing_sentinel_is_handshake_timeout() {
    let mut config = config("sleep 30");
    config.handshake.timeout_seconds = 1;
    let engine = ScriptedEngine::default();

    let started = Instant::now();
    let err = run_session(&config, &engine, CancellationToken::new())
        .await
        .expect_err("no sentinel");

    assert!(matches!(err, AppError::HandshakeTimeout(_)));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(engine.calls(), 0);
}

#[tokio::test]
async fn peer_exiting_before_sentinel_is_transport_closed() {
    let config = config("echo starting >&2; exit 1");
    let engine = ScriptedEngine::default();

    let err = run_session(&config, &engine, CancellationToken::new())
        .await
        .expect_err("peer gone");

    assert!(matches!(err, AppError::TransportClosed(_)));
}

#[tokio::test]
async fn launch_failure_is_reported() {
    let mut config = config("true");
    config.peer = PeerConfig::from_command("/nonexistent/turn-pilot-peer", Vec::new());
    let engine = ScriptedEngine::default();

    let err = run_session(&config, &engine, CancellationToken::new())
        .await
        .expect_err("cannot launch");

    assert!(matches!(err, AppError::Launch(_)));
}

#[tokio::test]
async fn cancel_during_handshake_is_orderly() {
    let config = config("sleep 30");
    let engine = ScriptedEngine::default();
    let cancel = CancellationToken::new();

    let stopper = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        })
    };

    let summary = run_session(&config, &engine, cancel)
        .await
        .expect("stop is not an error");
    stopper.await.unwrap();

    assert_eq!(summary.turns, 0);
}

#[tokio::test]
async fn disabled_handshake_goes_straight_to_discovery() {
    let mut config = config(RPC_PEER.replace("Game connected successfully", "hello").as_str());
    config.handshake.enabled = false;
    config.turns.max_turns = Some(1);
    let engine = ScriptedEngine::default();

    let summary = run_session(&config, &engine, CancellationToken::new())
        .await
        .expect("session succeeds");

    assert_eq!(summary.turns, 1);
}
