//! Diagnostic channel monitor.
//!
//! Drains the peer's stderr on its own task for the whole session so a
//! chatty peer can never block the request/response path. Every line is
//! classified by [`DiagnosticFilter`]:
//!
//! | Class           | Output                  | Effect                     |
//! |-----------------|-------------------------|----------------------------|
//! | `Readiness`     | `info` on target `peer` | flips the readiness flag   |
//! | `Noise`         | `trace` on target `peer`| counted only               |
//! | `Informational` | `info` on target `peer` | counted                    |
//!
//! Readiness is a [`watch`] flag that only ever goes `false → true`, so it
//! fires once, releases every waiter, and later waiters return immediately.
//! Waiters never touch the stream.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::peer::codec::LineCodec;
use crate::{AppError, Result};

/// Classification of one diagnostic line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    /// Suppressed from user-facing output.
    Noise,
    /// Surfaced to the operator.
    Informational,
    /// Contains the readiness sentinel.
    Readiness,
}

/// A diagnostic line together with its classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticLine {
    /// Raw line text, trimmed of surrounding whitespace.
    pub text: String,
    /// Derived classification.
    pub class: LineClass,
}

/// Pure line classifier.
///
/// The sentinel is matched as a literal, case-sensitive substring anywhere
/// in the line. Noise patterns match case-insensitively at any position.
#[derive(Debug, Clone)]
pub struct DiagnosticFilter {
    sentinel: Option<String>,
    noise: Vec<String>,
}

impl DiagnosticFilter {
    /// Build a filter. `sentinel = None` disables readiness detection.
    #[must_use]
    pub fn new(sentinel: Option<String>, noise_patterns: &[String]) -> Self {
        Self {
            sentinel: sentinel.filter(|s| !s.is_empty()),
            noise: noise_patterns
                .iter()
                .filter(|p| !p.is_empty())
                .map(|p| p.to_lowercase())
                .collect(),
        }
    }

    /// Classify `line`.
    #[must_use]
    pub fn classify(&self, line: &str) -> LineClass {
        if self
            .sentinel
            .as_deref()
            .is_some_and(|sentinel| line.contains(sentinel))
        {
            return LineClass::Readiness;
        }

        let lowered = line.to_lowercase();
        if self.noise.iter().any(|pattern| lowered.contains(pattern)) {
            LineClass::Noise
        } else {
            LineClass::Informational
        }
    }

    /// Classify `line` and pair it with its trimmed text.
    #[must_use]
    pub fn inspect(&self, line: &str) -> DiagnosticLine {
        let text = line.trim().to_owned();
        let class = self.classify(&text);
        DiagnosticLine { text, class }
    }
}

/// Per-class line counters.
#[derive(Debug, Default)]
struct DiagnosticCounters {
    noise: AtomicU64,
    informational: AtomicU64,
    readiness: AtomicU64,
}

/// Point-in-time copy of the monitor's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticStats {
    /// Lines suppressed as noise.
    pub noise: u64,
    /// Lines surfaced as informational.
    pub informational: u64,
    /// Lines that contained the sentinel (including repeats).
    pub readiness: u64,
}

/// Handle to a running diagnostic drain.
#[derive(Debug)]
pub struct DiagnosticMonitor {
    ready_rx: watch::Receiver<bool>,
    counters: Arc<DiagnosticCounters>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Start draining `stream` on a background task.
///
/// The task ends on end-of-input, on an I/O error, or when `cancel` fires.
#[must_use]
pub fn spawn_monitor<R>(
    stream: R,
    filter: DiagnosticFilter,
    max_line_bytes: usize,
    cancel: CancellationToken,
) -> DiagnosticMonitor
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (ready_tx, ready_rx) = watch::channel(false);
    let counters = Arc::new(DiagnosticCounters::default());

    let handle = tokio::spawn(run_drain(
        stream,
        filter,
        max_line_bytes,
        ready_tx,
        Arc::clone(&counters),
        cancel.clone(),
    ));

    DiagnosticMonitor {
        ready_rx,
        counters,
        cancel,
        handle,
    }
}

impl DiagnosticMonitor {
    /// Whether readiness has already been signalled.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.ready_rx.borrow()
    }

    /// A receiver other tasks can wait on; see [`wait_ready`].
    #[must_use]
    pub fn readiness(&self) -> watch::Receiver<bool> {
        self.ready_rx.clone()
    }

    /// Block until readiness fires or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// - `AppError::HandshakeTimeout` — no sentinel within `timeout`.
    /// - `AppError::TransportClosed` — the diagnostic stream ended first.
    pub async fn await_readiness(&self, timeout: Duration) -> Result<()> {
        wait_ready(self.readiness(), timeout).await
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> DiagnosticStats {
        DiagnosticStats {
            noise: self.counters.noise.load(Ordering::Relaxed),
            informational: self.counters.informational.load(Ordering::Relaxed),
            readiness: self.counters.readiness.load(Ordering::Relaxed),
        }
    }

    /// Stop the drain and wait for it, bounded by `timeout`.
    ///
    /// Returns the final counters.
    pub async fn shutdown(self, timeout: Duration) -> DiagnosticStats {
        let stats = self.stats();
        let Self { cancel, handle, counters, .. } = self;
        cancel.cancel();
        if tokio::time::timeout(timeout, handle).await.is_err() {
            warn!(?stats, "diagnostic drain did not stop in time");
        }
        DiagnosticStats {
            noise: counters.noise.load(Ordering::Relaxed),
            informational: counters.informational.load(Ordering::Relaxed),
            readiness: counters.readiness.load(Ordering::Relaxed),
        }
    }
}

/// Wait on a readiness receiver obtained from [`DiagnosticMonitor::readiness`].
///
/// # Errors
///
/// Same as [`DiagnosticMonitor::await_readiness`].
pub async fn wait_ready(mut ready_rx: watch::Receiver<bool>, timeout: Duration) -> Result<()> {
    match tokio::time::timeout(timeout, ready_rx.wait_for(|ready| *ready)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(_closed)) => Err(AppError::TransportClosed(
            "diagnostic stream ended before the peer signalled readiness".into(),
        )),
        Err(_elapsed) => Err(AppError::HandshakeTimeout(format!(
            "peer did not signal readiness within {timeout:?}"
        ))),
    }
}

async fn run_drain<R>(
    stream: R,
    filter: DiagnosticFilter,
    max_line_bytes: usize,
    ready_tx: watch::Sender<bool>,
    counters: Arc<DiagnosticCounters>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stream, LineCodec::skipping(max_line_bytes));

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("diagnostic drain: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!("diagnostic drain: EOF detected");
                        break;
                    }
                    // Bad lines are skipped by the codec; only read failures land here.
                    Some(Err(err)) => {
                        warn!(error = %err, "diagnostic drain: read failed, stopping");
                        break;
                    }
                    Some(Ok(raw)) => {
                        let line = filter.inspect(&raw);
                        if line.text.is_empty() {
                            continue;
                        }
                        record(&line, &ready_tx, &counters);
                    }
                }
            }
        }
    }

    let skipped = framed.decoder().skipped();
    if skipped > 0 {
        warn!(
            skipped,
            max_line_bytes, "diagnostic drain: over-long or non-UTF-8 lines were dropped"
        );
    }
}

fn record(line: &DiagnosticLine, ready_tx: &watch::Sender<bool>, counters: &DiagnosticCounters) {
    match line.class {
        LineClass::Noise => {
            counters.noise.fetch_add(1, Ordering::Relaxed);
            trace!(target: "peer", "{}", line.text);
        }
        LineClass::Informational => {
            counters.informational.fetch_add(1, Ordering::Relaxed);
            info!(target: "peer", "{}", line.text);
        }
        LineClass::Readiness => {
            counters.readiness.fetch_add(1, Ordering::Relaxed);
            info!(target: "peer", "{}", line.text);
            let fired = ready_tx.send_if_modified(|ready| {
                if *ready {
                    false
                } else {
                    *ready = true;
                    true
                }
            });
            if fired {
                info!("peer signalled readiness");
            }
        }
    }
}
