//! Session orchestration.
//!
//! One session = one peer process. The sequence is:
//!
//! 1. spawn the peer and start draining its stderr;
//! 2. wait for the readiness sentinel (if enabled);
//! 3. optionally run the MCP `initialize` exchange;
//! 4. discover capabilities;
//! 5. run the turn loop until stopped.
//!
//! Any failure in 2–4 is fatal to the session. Whatever way steps 2–5 end,
//! the peer is stopped and the drain is shut down before returning.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::catalog::CapabilityCatalog;
use crate::config::GlobalConfig;
use crate::peer::diagnostics::{spawn_monitor, DiagnosticFilter, DiagnosticMonitor};
use crate::peer::spawner::spawn_peer;
use crate::policy::DecisionEngine;
use crate::rpc::client::ProtocolClient;
use crate::turn::controller::{SessionSummary, TurnController, TurnSettings};
use crate::Result;

/// How long the diagnostic drain gets to wind down after the peer stopped.
const DRAIN_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Run one full session against a freshly spawned peer.
///
/// Cancelling `cancel` is an orderly stop and yields `Ok`.
///
/// # Errors
///
/// - `AppError::Launch` — the peer could not be spawned.
/// - `AppError::HandshakeTimeout` — no readiness sentinel in time.
/// - Any error while discovering capabilities.
/// - Session-fatal errors from the turn loop (e.g. `TransportClosed`).
pub async fn run_session(
    config: &GlobalConfig,
    engine: &dyn DecisionEngine,
    cancel: CancellationToken,
) -> Result<SessionSummary> {
    let session_id = Uuid::new_v4();
    run_instrumented(config, engine, cancel)
        .instrument(info_span!("session", %session_id))
        .await
}

async fn run_instrumented(
    config: &GlobalConfig,
    engine: &dyn DecisionEngine,
    cancel: CancellationToken,
) -> Result<SessionSummary> {
    let (mut peer, streams) = spawn_peer(&config.peer)?;

    let sentinel = config
        .handshake
        .enabled
        .then(|| config.handshake.sentinel.clone());
    let monitor = spawn_monitor(
        streams.stderr,
        DiagnosticFilter::new(sentinel, &config.diagnostics.noise_patterns),
        config.diagnostics.max_line_bytes,
        CancellationToken::new(),
    );
    let mut client = ProtocolClient::new(streams.stdin, streams.stdout);

    let outcome = drive(config, engine, &monitor, &mut client, &cancel).await;

    // Closing stdin first lets peers that exit on EOF do so on their own.
    drop(client);
    if let Err(err) = peer.stop(config.peer.shutdown_grace()).await {
        error!(%err, "peer shutdown failed");
    }
    let stats = monitor.shutdown(DRAIN_SHUTDOWN_TIMEOUT).await;
    info!(
        noise = stats.noise,
        informational = stats.informational,
        readiness = stats.readiness,
        "diagnostic channel closed"
    );

    match &outcome {
        Ok(summary) => info!(turns = summary.turns, "session finished"),
        Err(err) => error!(%err, "session aborted"),
    }
    outcome
}

async fn drive<W, R>(
    config: &GlobalConfig,
    engine: &dyn DecisionEngine,
    monitor: &DiagnosticMonitor,
    client: &mut ProtocolClient<W, R>,
    cancel: &CancellationToken,
) -> Result<SessionSummary>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    if config.handshake.enabled {
        info!(
            sentinel = config.handshake.sentinel,
            timeout = ?config.handshake.timeout(),
            "waiting for peer readiness"
        );
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(SessionSummary::default()),
            ready = monitor.await_readiness(config.handshake.timeout()) => ready?,
        }
    }

    if config.peer.initialize {
        let init = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(SessionSummary::default()),
            init = client.initialize(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")) => init?,
        };
        info!(server = %init.get("serverInfo").cloned().unwrap_or_default(), "peer initialized");
    }

    let catalog = tokio::select! {
        biased;
        () = cancel.cancelled() => return Ok(SessionSummary::default()),
        catalog = CapabilityCatalog::fetch(client, config.resources.summary_uri()) => catalog?,
    };

    info!(
        interval = ?config.turns.interval(),
        max_turns = ?config.turns.max_turns,
        "starting turn loop"
    );
    TurnController::new(client, &catalog, engine, TurnSettings::from_config(config))
        .run(cancel)
        .await
}
