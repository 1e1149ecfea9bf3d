//! Stream inspector.
//!
//! Launches the peer without speaking the protocol and reports what arrives
//! on its two output streams. Useful to confirm the peer is wired to its
//! upstream before pointing an agent at it: game updates, session info,
//! other JSON and plain log output are told apart on stdout, and stderr is
//! passed through line by line.

use futures_util::StreamExt;
use serde_json::Value;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::PeerConfig;
use crate::peer::codec::{LineCodec, MAX_LINE_BYTES};
use crate::peer::spawner::{spawn_peer, StopOutcome};
use crate::Result;

/// Longest prefix of an unrecognised JSON line that is echoed.
pub const JSON_PREVIEW_CHARS: usize = 100;

/// What one stdout line turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// `{"type": "GameUpdate", "payload": {"tick": ...}}`.
    GameUpdate {
        /// `payload.tick`, when present.
        tick: Option<Value>,
    },
    /// `{"type": "session_info", "payload": ...}`.
    SessionInfo(Value),
    /// Any other JSON, truncated to [`JSON_PREVIEW_CHARS`].
    Json(String),
    /// Not JSON.
    Log(String),
}

/// Classify a stdout line. Blank lines yield `None`.
#[must_use]
pub fn classify_stdout_line(line: &str) -> Option<StreamEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let Ok(message) = serde_json::from_str::<Value>(line) else {
        return Some(StreamEvent::Log(line.to_owned()));
    };

    let event = match message.get("type").and_then(Value::as_str) {
        Some("GameUpdate") => StreamEvent::GameUpdate {
            tick: message
                .get("payload")
                .and_then(|p| p.get("tick"))
                .cloned(),
        },
        Some("session_info") => {
            StreamEvent::SessionInfo(message.get("payload").cloned().unwrap_or(Value::Null))
        }
        _ => StreamEvent::Json(line.chars().take(JSON_PREVIEW_CHARS).collect()),
    };
    Some(event)
}

/// Counters collected while inspecting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InspectReport {
    /// Game updates seen on stdout.
    pub game_updates: u64,
    /// Session info messages seen on stdout.
    pub session_infos: u64,
    /// Other JSON lines on stdout.
    pub other_json: u64,
    /// Non-JSON lines on stdout.
    pub log_lines: u64,
    /// Lines on stderr.
    pub stderr_lines: u64,
    /// Over-long or non-UTF-8 lines dropped from either stream.
    pub skipped_lines: u64,
    /// Whether the run ended because of `cancel` rather than peer exit.
    pub cancelled: bool,
}

impl InspectReport {
    /// Count `event` and log it.
    pub fn record(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::GameUpdate { tick } => {
                self.game_updates += 1;
                let tick = tick.as_ref().map_or_else(|| "?".to_owned(), Value::to_string);
                info!(target: "inspect", tick = tick.as_str(), "game update received");
            }
            StreamEvent::SessionInfo(payload) => {
                self.session_infos += 1;
                info!(target: "inspect", %payload, "session info");
            }
            StreamEvent::Json(preview) => {
                self.other_json += 1;
                info!(target: "inspect", preview = preview.as_str(), "message");
            }
            StreamEvent::Log(text) => {
                self.log_lines += 1;
                info!(target: "inspect", text = text.as_str(), "log");
            }
        }
    }
}

/// Launch the peer and report its output until it exits or `cancel` fires,
/// then stop it.
///
/// The peer's stdin is held open for the whole run and never written to.
///
/// # Errors
///
/// `AppError::Launch` if the peer cannot be spawned, `AppError::Io` if it
/// cannot be stopped.
pub async fn run_inspector(config: &PeerConfig, cancel: CancellationToken) -> Result<InspectReport> {
    let (mut peer, streams) = spawn_peer(config)?;
    let _stdin = streams.stdin;
    let mut stdout = FramedRead::new(streams.stdout, LineCodec::skipping(MAX_LINE_BYTES));
    let mut stderr = FramedRead::new(streams.stderr, LineCodec::skipping(MAX_LINE_BYTES));

    let mut report = InspectReport::default();
    let mut stdout_open = true;
    let mut stderr_open = true;

    info!(command = config.command, "inspecting peer output");
    while stdout_open || stderr_open {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                report.cancelled = true;
                break;
            }
            line = stdout.next(), if stdout_open => match line {
                Some(Ok(line)) => {
                    if let Some(event) = classify_stdout_line(&line) {
                        report.record(&event);
                    }
                }
                Some(Err(err)) => {
                    warn!(%err, "stdout read failed");
                    stdout_open = false;
                }
                None => stdout_open = false,
            },
            line = stderr.next(), if stderr_open => match line {
                Some(Ok(line)) => {
                    report.stderr_lines += 1;
                    warn!(target: "peer", "{}", line.trim_end());
                }
                Some(Err(err)) => {
                    warn!(%err, "stderr read failed");
                    stderr_open = false;
                }
                None => stderr_open = false,
            },
        }
    }

    report.skipped_lines = stdout.decoder().skipped() + stderr.decoder().skipped();
    if report.skipped_lines > 0 {
        warn!(skipped = report.skipped_lines, "over-long or non-UTF-8 lines were dropped");
    }

    match peer.stop(config.shutdown_grace()).await? {
        StopOutcome::AlreadyExited(code) => info!(?code, "peer exited on its own"),
        outcome => info!(?outcome, "peer stopped"),
    }
    Ok(report)
}
