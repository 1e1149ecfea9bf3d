#![forbid(unsafe_code)]

//! `turn-pilot-inspect` — launch the peer and report what it emits.
//!
//! Does not speak the protocol. Runs until the peer exits or Ctrl-C, then
//! stops the peer the same way the agent does.

use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use turn_pilot::config::{GlobalConfig, PeerConfig};
use turn_pilot::inspect::run_inspector;
use turn_pilot::logging::{init_tracing, LogFormat};
use turn_pilot::{AppError, Result};

#[derive(Debug, Parser)]
#[command(
    name = "turn-pilot-inspect",
    about = "Launch the peer and report its stdout/stderr traffic",
    version,
    long_about = None
)]
struct Cli {
    /// Take the peer launch settings from this TOML configuration file.
    #[arg(long, conflicts_with = "command")]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Seconds the peer gets to exit after SIGTERM.
    #[arg(long)]
    grace: Option<u64>,

    /// Peer command line, e.g. `node src/mcp/dist/index.js`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

impl Cli {
    fn peer_config(&self) -> Result<PeerConfig> {
        let mut peer = if let Some(ref path) = self.config {
            GlobalConfig::load_from_path(path)?.peer
        } else {
            let (command, args) = self.command.split_first().ok_or_else(|| {
                AppError::Config("either --config or a peer command is required".into())
            })?;
            PeerConfig::from_command(command.clone(), args.to_vec())
        };
        if let Some(grace) = self.grace {
            peer.shutdown_grace_seconds = grace;
        }
        Ok(peer)
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let peer = args.peer_config()?;
    let cancel = CancellationToken::new();

    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, stopping peer");
                cancel.cancel();
            }
        })
    };

    let report = run_inspector(&peer, cancel).await;
    watcher.abort();
    let report = report?;

    info!(
        game_updates = report.game_updates,
        session_infos = report.session_infos,
        other_json = report.other_json,
        log_lines = report.log_lines,
        stderr_lines = report.stderr_lines,
        skipped_lines = report.skipped_lines,
        cancelled = report.cancelled,
        "inspection finished"
    );
    Ok(())
}
