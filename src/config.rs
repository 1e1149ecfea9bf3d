//! Global configuration parsing and validation.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::{AppError, Result};

/// How to launch and stop the peer process.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PeerConfig {
    /// Executable to launch (e.g., `node`).
    pub command: String,
    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for the peer; inherits ours when unset.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables for the peer.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Time the peer gets to exit after SIGTERM before it is killed.
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
    /// Send the MCP `initialize` exchange before discovery.
    #[serde(default)]
    pub initialize: bool,
}

impl PeerConfig {
    /// A peer launched as `command args…` with every other field defaulted.
    #[must_use]
    pub fn from_command(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            working_dir: None,
            env: HashMap::new(),
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
            initialize: false,
        }
    }

    /// Grace period as a [`Duration`].
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

fn default_shutdown_grace_seconds() -> u64 {
    5
}

/// Readiness handshake on the diagnostic channel.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HandshakeConfig {
    /// Whether to wait for the sentinel before discovery.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Literal substring that marks the peer as ready.
    #[serde(default = "default_sentinel")]
    pub sentinel: String,
    /// Upper bound on the wait.
    #[serde(default = "default_handshake_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sentinel: default_sentinel(),
            timeout_seconds: default_handshake_timeout_seconds(),
        }
    }
}

impl HandshakeConfig {
    /// Handshake bound as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn default_true() -> bool {
    true
}

fn default_sentinel() -> String {
    "Game connected successfully".into()
}

fn default_handshake_timeout_seconds() -> u64 {
    30
}

/// Diagnostic channel filtering.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DiagnosticsConfig {
    /// Substrings that mark a diagnostic line as suppressible noise.
    #[serde(default = "default_noise_patterns")]
    pub noise_patterns: Vec<String>,
    /// Longest diagnostic line accepted before it is skipped.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            noise_patterns: default_noise_patterns(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

fn default_noise_patterns() -> Vec<String> {
    [
        "Received game update",
        "Broadcasting game update",
        "Game state updated",
        "Tick:",
        "packedTileUpdates",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

fn default_max_line_bytes() -> usize {
    1_048_576
}

/// Resource identifiers read from the peer.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ResourceConfig {
    /// Resource read at the start of every turn.
    #[serde(default = "default_state_uri")]
    pub state_uri: String,
    /// Static resource read once at session start; failure is non-fatal.
    /// An empty string disables the read.
    #[serde(default = "default_summary_uri")]
    pub summary_uri: Option<String>,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            state_uri: default_state_uri(),
            summary_uri: default_summary_uri(),
        }
    }
}

impl ResourceConfig {
    /// The static resource to read, if any.
    #[must_use]
    pub fn summary_uri(&self) -> Option<&str> {
        self.summary_uri.as_deref().filter(|uri| !uri.trim().is_empty())
    }
}

fn default_state_uri() -> String {
    "game://state".into()
}

#[allow(clippy::unnecessary_wraps)]
fn default_summary_uri() -> Option<String> {
    Some("game://map/summary".into())
}

/// Turn pacing.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TurnConfig {
    /// Pause between turns. Zero is only accepted for bounded runs.
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    /// Stop after this many turns; unbounded when unset.
    #[serde(default)]
    pub max_turns: Option<u64>,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            max_turns: None,
        }
    }
}

impl TurnConfig {
    /// Turn interval as a [`Duration`].
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

fn default_interval_seconds() -> u64 {
    5
}

/// OpenAI-compatible decision engine endpoint.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct PolicyConfig {
    /// Base URL of the chat-completions API (e.g. `http://localhost:11434/v1`).
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model name sent with each request.
    #[serde(default = "default_model")]
    pub model: String,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Environment variable holding a bearer key; local servers need none.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Per-request HTTP timeout.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    /// System instruction sent with every decision request.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Objective stated in every turn prompt; empty to omit.
    #[serde(default = "default_goal")]
    pub goal: String,
    /// Closing guidance after the tool list in every turn prompt; empty to omit.
    #[serde(default = "default_guidance")]
    pub guidance: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            api_key_env: None,
            request_timeout_seconds: default_request_timeout_seconds(),
            system_prompt: default_system_prompt(),
            goal: default_goal(),
            guidance: default_guidance(),
        }
    }
}

impl PolicyConfig {
    /// Resolve the bearer key from the configured environment variable.
    ///
    /// Returns `None` when no variable is configured, or when it is unset or
    /// empty (logged, since the endpoint may then reject requests).
    #[must_use]
    pub fn api_key(&self) -> Option<String> {
        let var = self.api_key_env.as_deref()?;
        match env::var(var) {
            Ok(value) if !value.is_empty() => Some(value),
            _ => {
                warn!(var, "api key env var is unset or empty; sending no credentials");
                None
            }
        }
    }

    /// Request timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

fn default_base_url() -> String {
    "http://localhost:11434/v1".into()
}

fn default_model() -> String {
    "qwen3:4b".into()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_request_timeout_seconds() -> u64 {
    120
}

fn default_system_prompt() -> String {
    "You are an AI agent playing OpenFrontIO. Use the available tools to explore and take actions."
        .into()
}

fn default_goal() -> String {
    "Your goal is to expand your territory and eliminate opponents.".into()
}

fn default_guidance() -> String {
    "Think strategically and make decisions to grow your empire. \
     Use the tools to explore the map and take actions."
        .into()
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Peer launch settings.
    pub peer: PeerConfig,
    /// Readiness handshake settings.
    #[serde(default)]
    pub handshake: HandshakeConfig,
    /// Diagnostic channel filtering.
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
    /// Resource identifiers.
    #[serde(default)]
    pub resources: ResourceConfig,
    /// Turn pacing.
    #[serde(default)]
    pub turns: TurnConfig,
    /// Decision engine endpoint.
    #[serde(default)]
    pub policy: PolicyConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Re-run validation, e.g. after CLI overrides were applied.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.peer.command.trim().is_empty() {
            return Err(AppError::Config("peer.command must not be empty".into()));
        }

        if self.handshake.enabled {
            if self.handshake.sentinel.is_empty() {
                return Err(AppError::Config(
                    "handshake.sentinel must not be empty when the handshake is enabled".into(),
                ));
            }
            if self.handshake.timeout_seconds == 0 {
                return Err(AppError::Config(
                    "handshake.timeout_seconds must be greater than zero".into(),
                ));
            }
        }

        if self.diagnostics.max_line_bytes == 0 {
            return Err(AppError::Config(
                "diagnostics.max_line_bytes must be greater than zero".into(),
            ));
        }

        if self.resources.state_uri.trim().is_empty() {
            return Err(AppError::Config(
                "resources.state_uri must not be empty".into(),
            ));
        }

        if self.turns.interval_seconds == 0 && self.turns.max_turns.is_none() {
            return Err(AppError::Config(
                "turns.interval_seconds must be greater than zero unless turns.max_turns is set"
                    .into(),
            ));
        }

        if self.turns.max_turns == Some(0) {
            return Err(AppError::Config(
                "turns.max_turns must be greater than zero when set".into(),
            ));
        }

        if !(0.0..=2.0).contains(&self.policy.temperature) {
            return Err(AppError::Config(format!(
                "policy.temperature must be between 0.0 and 2.0, got {}",
                self.policy.temperature
            )));
        }

        reqwest::Url::parse(&self.policy.base_url)
            .map_err(|err| AppError::Config(format!("policy.base_url invalid: {err}")))?;

        if self.policy.model.trim().is_empty() {
            return Err(AppError::Config("policy.model must not be empty".into()));
        }

        Ok(())
    }
}
