#![forbid(unsafe_code)]

//! `turn-pilot` — agent binary.
//!
//! Loads configuration, builds the decision engine and runs one session
//! against the configured peer until the turn limit, a fatal error, or
//! Ctrl-C / SIGTERM.

use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use turn_pilot::config::GlobalConfig;
use turn_pilot::logging::{init_tracing, LogFormat};
use turn_pilot::policy::openai::OpenAiEngine;
use turn_pilot::session::run_session;
use turn_pilot::{AppError, Result};

#[derive(Debug, Parser)]
#[command(name = "turn-pilot", about = "Turn-based agent for a stdio JSON-RPC peer", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the pause between turns, in seconds.
    #[arg(long)]
    interval: Option<u64>,

    /// Stop after this many turns.
    #[arg(long)]
    max_turns: Option<u64>,

    /// Override the decision model name.
    #[arg(long)]
    model: Option<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("turn-pilot bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(interval) = args.interval {
        config.turns.interval_seconds = interval;
    }
    if args.max_turns.is_some() {
        config.turns.max_turns = args.max_turns;
    }
    if let Some(model) = args.model {
        config.policy.model = model;
    }
    config.validate()?;
    info!(
        command = config.peer.command,
        model = config.policy.model,
        endpoint = config.policy.base_url,
        "configuration loaded"
    );

    let engine = OpenAiEngine::from_config(&config.policy)?;

    // ── Run until done or interrupted ───────────────────
    let ct = CancellationToken::new();
    let session = run_session(&config, &engine, ct.clone());
    tokio::pin!(session);

    let outcome = tokio::select! {
        outcome = &mut session => outcome,
        () = shutdown_signal() => {
            info!("shutdown signal received");
            ct.cancel();
            session.await
        }
    };

    let summary = outcome?;
    info!(
        turns = summary.turns,
        failed_turns = summary.failed_turns,
        operations = summary.operations_executed,
        failed_operations = summary.operations_failed,
        "turn-pilot shut down"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}
