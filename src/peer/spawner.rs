//! Peer process spawner and lifecycle.
//!
//! Launches the peer with all three stdio streams piped and
//! `kill_on_drop(true)`, so the process cannot outlive us even on a panic.
//! Orderly shutdown goes through [`PeerProcess::stop`]: SIGTERM, a bounded
//! wait, then a forced kill.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::config::PeerConfig;
use crate::{AppError, Result};

/// The three byte streams of a freshly spawned peer.
///
/// `stdin`/`stdout` go to the protocol client, `stderr` to the diagnostic
/// monitor. Nothing else may write to `stdin`.
#[derive(Debug)]
pub struct PeerStreams {
    /// Peer's stdin (primary channel, outbound).
    pub stdin: ChildStdin,
    /// Peer's stdout (primary channel, inbound).
    pub stdout: ChildStdout,
    /// Peer's stderr (diagnostic channel).
    pub stderr: ChildStderr,
}

/// How the peer ended up after [`PeerProcess::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The peer had already exited before stop was requested.
    AlreadyExited(Option<i32>),
    /// The peer exited within the grace period.
    Exited(Option<i32>),
    /// The peer ignored the termination request and was killed.
    Killed,
    /// Stop had already run; nothing was done.
    AlreadyStopped,
}

/// Handle to the running peer process.
#[derive(Debug)]
pub struct PeerProcess {
    child: Child,
    pid: Option<u32>,
    stopped: bool,
}

/// Spawn the peer described by `config`.
///
/// # Errors
///
/// - `AppError::Launch("failed to spawn peer …")` — executable missing or
///   not runnable.
/// - `AppError::Launch("failed to capture peer …")` — a pipe was not created.
pub fn spawn_peer(config: &PeerConfig) -> Result<(PeerProcess, PeerStreams)> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args)
        .envs(&config.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(ref dir) = config.working_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|err| {
        AppError::Launch(format!("failed to spawn peer `{}`: {err}", config.command))
    })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Launch("failed to capture peer stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Launch("failed to capture peer stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Launch("failed to capture peer stderr".into()))?;

    let pid = child.id();
    info!(
        pid = pid.unwrap_or(0),
        command = config.command,
        args = ?config.args,
        "peer process spawned"
    );

    Ok((
        PeerProcess {
            child,
            pid,
            stopped: false,
        },
        PeerStreams {
            stdin,
            stdout,
            stderr,
        },
    ))
}

impl PeerProcess {
    /// OS process id, if the process was still running when spawned.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Whether [`stop`](Self::stop) has already completed.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Terminate the peer: SIGTERM, wait up to `grace`, then kill.
    ///
    /// Runs at most once; later calls return [`StopOutcome::AlreadyStopped`].
    /// Safe to call while the diagnostic drain is still reading stderr: the
    /// drain sees end-of-input once the process is gone.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the process could not be waited on or
    /// killed. The handle is still marked stopped; `kill_on_drop` remains as
    /// the fallback.
    pub async fn stop(&mut self, grace: Duration) -> Result<StopOutcome> {
        if self.stopped {
            return Ok(StopOutcome::AlreadyStopped);
        }
        self.stopped = true;

        match self.child.try_wait() {
            Ok(Some(status)) => {
                info!(code = ?status.code(), "peer had already exited");
                return Ok(StopOutcome::AlreadyExited(status.code()));
            }
            Ok(None) => {}
            Err(err) => {
                warn!(%err, "failed to poll peer status before stop");
            }
        }

        self.request_termination();

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(status = %describe_exit(status), "peer exited");
                Ok(StopOutcome::Exited(status.code()))
            }
            Ok(Err(err)) => Err(AppError::Io(format!("failed to wait for peer: {err}"))),
            Err(_elapsed) => {
                warn!(?grace, "peer did not exit within grace period, killing");
                self.child
                    .kill()
                    .await
                    .map_err(|err| AppError::Io(format!("failed to kill peer: {err}")))?;
                Ok(StopOutcome::Killed)
            }
        }
    }

    #[cfg(unix)]
    fn request_termination(&mut self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(raw) = self.pid.and_then(|pid| i32::try_from(pid).ok()) else {
            return;
        };
        match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) => debug!(pid = raw, "SIGTERM sent to peer"),
            Err(err) => warn!(pid = raw, %err, "failed to send SIGTERM to peer"),
        }
    }

    // No SIGTERM equivalent; the grace wait is skipped in effect.
    #[cfg(not(unix))]
    fn request_termination(&mut self) {
        if let Err(err) = self.child.start_kill() {
            warn!(%err, "failed to terminate peer");
        }
    }
}

fn describe_exit(status: ExitStatus) -> String {
    if status.success() {
        "exited normally (code 0)".to_owned()
    } else {
        status.code().map_or_else(
            || "terminated by signal".to_owned(),
            |c| format!("exited with code {c}"),
        )
    }
}
