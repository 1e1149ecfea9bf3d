//! The turn loop.
//!
//! ```text
//! Idle → FetchingState → Deciding → ExecutingOperations → Pausing ─┐
//!              ▲                                                   │
//!              └───────────────────────────────────────────────────┘
//! (any state) ── stop ──▶ Stopped
//! ```
//!
//! Each turn returns a typed result. At the turn boundary the error policy
//! of [`AppError::is_session_fatal`] decides: session-fatal errors end
//! [`TurnController::run`], everything else is logged with the turn number
//! and phase and the loop pauses and carries on.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::catalog::CapabilityCatalog;
use crate::config::GlobalConfig;
use crate::policy::{DecisionEngine, DecisionRequest, Invocation, InvocationArguments};
use crate::rpc::client::ProtocolClient;
use crate::rpc::mcp::ToolResult;
use crate::turn::prompt::{build_prompt, PromptText};
use crate::{AppError, Result};

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    /// Not started.
    Idle,
    /// Reading the state snapshot.
    FetchingState,
    /// Waiting on the decision engine.
    Deciding,
    /// Running requested operations.
    ExecutingOperations,
    /// Sleeping until the next turn.
    Pausing,
    /// Terminal.
    Stopped,
}

/// Per-session loop settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnSettings {
    /// Resource read at the start of every turn.
    pub state_uri: String,
    /// System instruction for the decision engine.
    pub system_prompt: String,
    /// Instruction text framing the operation list.
    pub prompt: PromptText,
    /// Pause between turns.
    pub interval: Duration,
    /// Stop after this many turns.
    pub max_turns: Option<u64>,
}

impl TurnSettings {
    /// Settings taken from the loaded configuration.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            state_uri: config.resources.state_uri.clone(),
            system_prompt: config.policy.system_prompt.clone(),
            prompt: PromptText::from_policy(&config.policy),
            interval: config.turns.interval(),
            max_turns: config.turns.max_turns,
        }
    }
}

/// Result of one requested invocation.
#[derive(Debug)]
pub struct ExecutionRecord {
    /// Operation name as requested.
    pub operation: String,
    /// Peer result, or why it could not be obtained.
    pub outcome: Result<ToolResult>,
}

impl ExecutionRecord {
    /// Failed locally, failed remotely, or flagged `isError` by the peer.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.outcome.as_ref().map_or(true, |result| result.is_error)
    }
}

/// Everything that happened in one completed turn.
#[derive(Debug)]
pub struct TurnRecord {
    /// 1-based turn number.
    pub sequence: u64,
    /// When the turn began.
    pub started_at: DateTime<Utc>,
    /// The state the decision was based on.
    pub snapshot: Value,
    /// Free text returned by the engine.
    pub decision_text: Option<String>,
    /// One entry per invocation, in request order.
    pub executions: Vec<ExecutionRecord>,
}

impl TurnRecord {
    /// Number of invocations that failed.
    #[must_use]
    pub fn failed_operations(&self) -> usize {
        self.executions.iter().filter(|e| e.failed()).count()
    }
}

/// Counters over a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// Turns started.
    pub turns: u64,
    /// Turns abandoned because of an error.
    pub failed_turns: u64,
    /// Invocations attempted.
    pub operations_executed: u64,
    /// Invocations that failed.
    pub operations_failed: u64,
}

/// Drives turns against one peer with one decision engine.
pub struct TurnController<'a, W, R> {
    client: &'a mut ProtocolClient<W, R>,
    catalog: &'a CapabilityCatalog,
    engine: &'a dyn DecisionEngine,
    settings: TurnSettings,
    phase: TurnPhase,
    sequence: u64,
    summary: SessionSummary,
}

impl<'a, W, R> TurnController<'a, W, R>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    /// Create an idle controller.
    #[must_use]
    pub fn new(
        client: &'a mut ProtocolClient<W, R>,
        catalog: &'a CapabilityCatalog,
        engine: &'a dyn DecisionEngine,
        settings: TurnSettings,
    ) -> Self {
        Self {
            client,
            catalog,
            engine,
            settings,
            phase: TurnPhase::Idle,
            sequence: 0,
            summary: SessionSummary::default(),
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    /// Counters so far.
    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        self.summary
    }

    /// Run turns until `cancel` fires, the turn limit is reached, or a
    /// session-fatal error occurs.
    ///
    /// Cancellation interrupts an in-flight turn or pause immediately.
    ///
    /// # Errors
    ///
    /// Only errors for which [`AppError::is_session_fatal`] is true.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<SessionSummary> {
        loop {
            if self.limit_reached() {
                info!(turns = self.sequence, "turn limit reached");
                break;
            }

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                outcome = self.execute_turn() => outcome,
            };

            match outcome {
                Ok(record) => self.finish_turn(&record),
                Err(err) if err.is_session_fatal() => {
                    error!(turn = self.sequence, phase = ?self.phase, %err, "session-fatal error, stopping");
                    self.phase = TurnPhase::Stopped;
                    return Err(err);
                }
                Err(err) => {
                    self.summary.failed_turns += 1;
                    error!(turn = self.sequence, phase = ?self.phase, %err, "turn failed");
                }
            }

            if self.limit_reached() {
                info!(turns = self.sequence, "turn limit reached");
                break;
            }

            self.phase = TurnPhase::Pausing;
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.settings.interval) => {}
            }
        }

        self.phase = TurnPhase::Stopped;
        info!(
            turns = self.summary.turns,
            failed_turns = self.summary.failed_turns,
            operations = self.summary.operations_executed,
            failed_operations = self.summary.operations_failed,
            "turn loop stopped"
        );
        Ok(self.summary)
    }

    /// Run a single turn: fetch state, decide, execute.
    ///
    /// Failing invocations are recorded in the returned [`TurnRecord`]; a
    /// session-fatal error from one of them is returned instead.
    ///
    /// # Errors
    ///
    /// State fetch or decision failures, and session-fatal invocation
    /// failures.
    pub async fn execute_turn(&mut self) -> Result<TurnRecord> {
        self.sequence += 1;
        self.summary.turns += 1;
        let sequence = self.sequence;
        let started_at = Utc::now();
        info!(turn = sequence, "turn started");

        self.phase = TurnPhase::FetchingState;
        let snapshot = self.fetch_state().await?;

        self.phase = TurnPhase::Deciding;
        let operations = self.catalog.adapted();
        let request = DecisionRequest {
            system: self.settings.system_prompt.clone(),
            prompt: build_prompt(
                &snapshot,
                &operations,
                self.catalog.summary(),
                &self.settings.prompt,
            ),
            operations,
        };
        let decision = self.engine.decide(&request).await?;
        if let Some(ref text) = decision.text {
            info!(turn = sequence, text = text.as_str(), "engine response");
        }

        self.phase = TurnPhase::ExecutingOperations;
        let mut executions = Vec::with_capacity(decision.invocations.len());
        for invocation in decision.invocations {
            let operation = invocation.name.clone();
            match self.invoke(sequence, invocation).await {
                Err(err) if err.is_session_fatal() => return Err(err),
                outcome => executions.push(ExecutionRecord { operation, outcome }),
            }
        }

        Ok(TurnRecord {
            sequence,
            started_at,
            snapshot,
            decision_text: decision.text,
            executions,
        })
    }

    fn limit_reached(&self) -> bool {
        self.settings
            .max_turns
            .is_some_and(|max| self.sequence >= max)
    }

    async fn fetch_state(&mut self) -> Result<Value> {
        let text = self.client.read_resource(&self.settings.state_uri).await?;
        serde_json::from_str(&text).map_err(|err| {
            AppError::MalformedResponse(format!(
                "state snapshot from {} is not json: {err}",
                self.settings.state_uri
            ))
        })
    }

    async fn invoke(&mut self, turn: u64, invocation: Invocation) -> Result<ToolResult> {
        let Invocation { name, arguments } = invocation;
        let arguments = match arguments {
            InvocationArguments::Object(map) => Value::Object(map),
            InvocationArguments::Invalid { raw, reason } => {
                warn!(turn, operation = name, raw, "engine produced unusable arguments");
                return Err(AppError::Policy(format!(
                    "invalid arguments for {name}: {reason}"
                )));
            }
        };

        if !self.catalog.contains(&name) {
            warn!(turn, operation = name, "operation not in catalog, forwarding anyway");
        }

        info!(turn, operation = name, %arguments, "executing operation");
        match self.client.call_tool(&name, arguments).await {
            Ok(result) => {
                if result.is_error {
                    warn!(turn, operation = name, result = %result.output.to_display_string(), "operation reported an error");
                } else {
                    info!(turn, operation = name, result = %result.output.to_display_string(), "operation completed");
                }
                Ok(result)
            }
            Err(err) => {
                warn!(turn, operation = name, %err, "operation failed");
                Err(err)
            }
        }
    }

    fn finish_turn(&mut self, record: &TurnRecord) {
        let failed = record.failed_operations();
        self.summary.operations_executed += record.executions.len() as u64;
        self.summary.operations_failed += failed as u64;

        let elapsed_ms = (Utc::now() - record.started_at).num_milliseconds();
        info!(
            turn = record.sequence,
            operations = record.executions.len(),
            failed,
            elapsed_ms,
            "turn completed"
        );
    }
}
