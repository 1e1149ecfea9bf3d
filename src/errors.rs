//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// The peer process could not be spawned.
    Launch(String),
    /// The peer never emitted its readiness sentinel within the bound.
    HandshakeTimeout(String),
    /// A peer stream ended, or could not be written, while in use.
    TransportClosed(String),
    /// A response line was unparseable, too long, or did not correlate.
    MalformedResponse(String),
    /// The peer answered with a JSON-RPC error object.
    Remote {
        /// JSON-RPC error code.
        code: i64,
        /// Human-readable error message.
        message: String,
    },
    /// The decision engine failed or returned an unusable decision.
    Policy(String),
    /// File-system or process-management I/O failure.
    Io(String),
}

impl AppError {
    /// Whether this error ends the session rather than a single turn.
    ///
    /// | Variant             | Scope   |
    /// |---------------------|---------|
    /// | `Launch`            | session |
    /// | `HandshakeTimeout`  | session |
    /// | `TransportClosed`   | session |
    /// | `Config`            | session |
    /// | `MalformedResponse` | turn    |
    /// | `Remote`            | turn    |
    /// | `Policy`            | turn    |
    /// | `Io`                | turn    |
    #[must_use]
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Launch(_) | Self::HandshakeTimeout(_) | Self::TransportClosed(_)
        )
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Launch(msg) => write!(f, "launch: {msg}"),
            Self::HandshakeTimeout(msg) => write!(f, "handshake timeout: {msg}"),
            Self::TransportClosed(msg) => write!(f, "transport closed: {msg}"),
            Self::MalformedResponse(msg) => write!(f, "malformed response: {msg}"),
            Self::Remote { code, message } => write!(f, "remote error {code}: {message}"),
            Self::Policy(msg) => write!(f, "policy: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::Policy(err.to_string())
    }
}
