//! JSON-RPC 2.0 envelopes.
//!
//! Outbound messages are plain serde structs. Inbound lines are decoded into
//! [`InboundMessage`], a tagged schema checked field by field, so a response
//! is exactly one of result / error and never both.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{AppError, Result};

/// Protocol version string carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Outbound request.
#[derive(Debug, Clone, Serialize)]
pub struct Request<'a> {
    /// Always [`JSONRPC_VERSION`].
    pub jsonrpc: &'static str,
    /// Session-unique, monotonically increasing id.
    pub id: u64,
    /// Method name, e.g. `tools/list`.
    pub method: &'a str,
    /// Method parameters; `{}` when the method takes none.
    pub params: &'a Value,
}

impl<'a> Request<'a> {
    /// Build a request envelope.
    #[must_use]
    pub fn new(id: u64, method: &'a str, params: &'a Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }
}

/// Outbound notification (no id, no response).
#[derive(Debug, Clone, Serialize)]
pub struct Notification<'a> {
    /// Always [`JSONRPC_VERSION`].
    pub jsonrpc: &'static str,
    /// Method name.
    pub method: &'a str,
    /// Method parameters.
    pub params: &'a Value,
}

impl<'a> Notification<'a> {
    /// Build a notification envelope.
    #[must_use]
    pub fn new(method: &'a str, params: &'a Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }
}

/// Error object of an error response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcError {
    /// JSON-RPC error code.
    pub code: i64,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
    /// Optional structured detail.
    #[serde(default)]
    pub data: Option<Value>,
}

impl From<RpcError> for AppError {
    fn from(err: RpcError) -> Self {
        Self::Remote {
            code: err.code,
            message: err.message,
        }
    }
}

/// A decoded line from the primary channel.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Successful response.
    Result {
        /// Id of the request being answered.
        id: u64,
        /// Method result; may be `null`.
        result: Value,
    },
    /// Error response. `id` is `None` when the peer could not read ours.
    Error {
        /// Id of the request being answered, if the peer knew it.
        id: Option<u64>,
        /// Error details.
        error: RpcError,
    },
    /// A peer-initiated message (notification or request); not a response.
    PeerMessage {
        /// Method the peer invoked.
        method: String,
    },
}

impl InboundMessage {
    /// Decode and validate one line.
    ///
    /// # Errors
    ///
    /// Returns `AppError::MalformedResponse` when the line is not a JSON
    /// object, names another protocol version, has a non-integer id, or
    /// carries neither or both of `result` and `error`.
    pub fn decode(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line)
            .map_err(|err| AppError::MalformedResponse(format!("not valid json: {err}")))?;

        let Value::Object(mut fields) = value else {
            return Err(AppError::MalformedResponse(
                "message is not a json object".into(),
            ));
        };

        match fields.get("jsonrpc") {
            None => {}
            Some(Value::String(version)) if version == JSONRPC_VERSION => {}
            Some(other) => {
                return Err(AppError::MalformedResponse(format!(
                    "unsupported jsonrpc version: {other}"
                )));
            }
        }

        if let Some(method) = fields.get("method") {
            let method = method.as_str().ok_or_else(|| {
                AppError::MalformedResponse("`method` is not a string".into())
            })?;
            return Ok(Self::PeerMessage {
                method: method.to_owned(),
            });
        }

        let id = decode_id(&fields)?;

        match (fields.remove("result"), fields.remove("error")) {
            (Some(_), Some(_)) => Err(AppError::MalformedResponse(
                "response carries both `result` and `error`".into(),
            )),
            (Some(result), None) => {
                let id = id.ok_or_else(|| {
                    AppError::MalformedResponse("result response without an id".into())
                })?;
                Ok(Self::Result { id, result })
            }
            (None, Some(error)) => {
                let error: RpcError = serde_json::from_value(error).map_err(|err| {
                    AppError::MalformedResponse(format!("invalid error object: {err}"))
                })?;
                Ok(Self::Error { id, error })
            }
            (None, None) => Err(AppError::MalformedResponse(
                "response carries neither `result` nor `error`".into(),
            )),
        }
    }
}

fn decode_id(fields: &Map<String, Value>) -> Result<Option<u64>> {
    match fields.get("id") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_u64().map(Some).ok_or_else(|| {
            AppError::MalformedResponse(format!("id is not a non-negative integer: {n}"))
        }),
        Some(other) => Err(AppError::MalformedResponse(format!(
            "id is not an integer: {other}"
        ))),
    }
}
