//! Decision engine boundary.
//!
//! The [`DecisionEngine`] trait keeps the turn loop independent of whatever
//! produces decisions. The loop hands over a system instruction, a context
//! prompt, and the operations the peer currently exposes; the engine answers
//! with optional free text and zero or more invocations.

pub mod openai;

use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::Result;

/// An operation as offered to the decision engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationSpec {
    /// Operation name.
    pub name: String,
    /// Operation description.
    pub description: String,
    /// JSON Schema of the arguments.
    pub parameters: Value,
}

/// Input to one decision.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionRequest {
    /// System instruction.
    pub system: String,
    /// Context prompt describing the current state.
    pub prompt: String,
    /// Operations the engine may request.
    pub operations: Vec<OperationSpec>,
}

/// Arguments of a requested invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationArguments {
    /// A JSON object ready to forward to the peer.
    Object(Map<String, Value>),
    /// The engine produced arguments that are not a JSON object.
    Invalid {
        /// What the engine sent.
        raw: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl InvocationArguments {
    /// Parse the JSON-encoded argument string of a function call.
    ///
    /// An empty string or `null` means "no arguments".
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Self::Object(Map::new());
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Self::from_value(value),
            Err(err) => Self::Invalid {
                raw: raw.to_owned(),
                reason: err.to_string(),
            },
        }
    }

    /// Accept an already-decoded value.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Object(map),
            Value::Null => Self::Object(Map::new()),
            other => Self::Invalid {
                raw: other.to_string(),
                reason: "arguments are not a json object".into(),
            },
        }
    }
}

/// One operation the engine wants executed.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Operation name.
    pub name: String,
    /// Arguments.
    pub arguments: InvocationArguments,
}

/// The engine's answer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decision {
    /// Free-form text, if any.
    pub text: Option<String>,
    /// Invocations in the order they should run.
    pub invocations: Vec<Invocation>,
}

/// Produces decisions for the turn loop.
pub trait DecisionEngine: Send + Sync {
    /// Decide what to do for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Policy`](crate::AppError::Policy) when no decision
    /// could be obtained; the turn is abandoned and the loop continues.
    fn decide<'a>(
        &'a self,
        request: &'a DecisionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Decision>> + Send + 'a>>;
}
