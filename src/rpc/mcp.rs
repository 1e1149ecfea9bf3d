//! Payload shapes of the MCP methods the client consumes.
//!
//! Missing optional fields default the way a lenient peer expects: an absent
//! `tools` list is empty, an absent `inputSchema` is `{}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A callable operation ("tool") exposed by the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationDescriptor {
    /// Unique operation name, e.g. `game.send_intent`.
    pub name: String,
    /// Free-text description for the decision engine.
    #[serde(default)]
    pub description: String,
    /// JSON Schema of the arguments; passed through untouched.
    #[serde(default = "empty_object")]
    pub input_schema: Value,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// A readable resource exposed by the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    /// Resource identifier, e.g. `game://state`.
    pub uri: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// MIME type of the content.
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// `tools/list` result.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<OperationDescriptor>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// `resources/list` result.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListResourcesResult {
    #[serde(default)]
    pub resources: Vec<ResourceDescriptor>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// `resources/read` result.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ReadResourceResult {
    #[serde(default)]
    pub contents: Vec<ContentItem>,
}

/// `tools/call` result.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(default)]
    pub is_error: bool,
}

/// One content entry of a resource read or tool result.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ContentItem {
    #[serde(default)]
    pub text: Option<String>,
}

/// Decoded first content item of a tool result.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// The text parsed as JSON.
    Structured(Value),
    /// The text did not parse as JSON and is passed through as-is.
    Text(String),
    /// The result had no content items.
    Empty,
}

impl ToolOutput {
    /// Decode a tool result's text, falling back to raw text.
    #[must_use]
    pub fn from_text(text: String) -> Self {
        match serde_json::from_str(&text) {
            Ok(value) => Self::Structured(value),
            Err(_) => Self::Text(text),
        }
    }

    /// Render for logs and for feeding back into prompts.
    #[must_use]
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Structured(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
            Self::Text(text) => text.clone(),
            Self::Empty => "(no content)".to_owned(),
        }
    }
}

/// Outcome of `tools/call`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    /// Decoded first content item.
    pub output: ToolOutput,
    /// The peer flagged the call as failed (`isError`).
    pub is_error: bool,
}
