//! OpenAI-compatible chat-completions engine.
//!
//! Works with any server exposing `POST {base_url}/chat/completions` with
//! function calling: Ollama, KoboldCPP, llama.cpp server, or hosted APIs.
//! Operations are offered as `{"type": "function", ...}` tools and the
//! first choice's `tool_calls` become [`Invocation`]s.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::PolicyConfig;
use crate::policy::{
    Decision, DecisionEngine, DecisionRequest, Invocation, InvocationArguments, OperationSpec,
};
use crate::{AppError, Result};

/// Longest slice of an error body quoted in an error message.
const ERROR_BODY_PREVIEW: usize = 512;

// ── Wire types ───────────────────────────────────────────────────────────────

/// Request body for `/chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest<'a> {
    /// Model name.
    pub model: &'a str,
    /// System and user messages.
    pub messages: Vec<ChatMessage<'a>>,
    /// Offered functions; omitted when empty.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition<'a>>,
    /// `"auto"` when tools are offered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<&'static str>,
    /// Sampling temperature.
    pub temperature: f32,
}

/// A chat message.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage<'a> {
    /// `system` or `user`.
    pub role: &'static str,
    /// Message text.
    pub content: &'a str,
}

/// A function offered to the model.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition<'a> {
    /// Always `function`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// The function itself.
    pub function: &'a OperationSpec,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    function: ResponseFunction,
}

/// Some servers send `arguments` as a JSON-encoded string, others as an
/// object; both are accepted.
#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

// ── Engine ───────────────────────────────────────────────────────────────────

/// Decision engine backed by an OpenAI-compatible HTTP endpoint.
pub struct OpenAiEngine {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f32,
    api_key: Option<String>,
}

impl std::fmt::Debug for OpenAiEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEngine")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish_non_exhaustive()
    }
}

impl OpenAiEngine {
    /// Build an engine from configuration, resolving the key from the
    /// configured environment variable.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Policy` if the HTTP client cannot be built.
    pub fn from_config(config: &PolicyConfig) -> Result<Self> {
        Self::new(config, config.api_key())
    }

    /// Build an engine with an explicit bearer key.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Policy` if the HTTP client cannot be built.
    pub fn new(config: &PolicyConfig, api_key: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("turn-pilot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| AppError::Policy(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            temperature: config.temperature,
            api_key,
        })
    }

    /// Full URL requests are posted to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Request body for `request`.
    #[must_use]
    pub fn request_body<'a>(&'a self, request: &'a DecisionRequest) -> ChatCompletionRequest<'a> {
        let tools: Vec<ToolDefinition<'a>> = request
            .operations
            .iter()
            .map(|function| ToolDefinition {
                kind: "function",
                function,
            })
            .collect();
        let tool_choice = if tools.is_empty() { None } else { Some("auto") };

        ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            tools,
            tool_choice,
            temperature: self.temperature,
        }
    }

    /// Turn a raw response body into a [`Decision`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::Policy` if the body is not a chat completion or
    /// has no choices.
    pub fn parse_response(body: &str) -> Result<Decision> {
        let response: ChatCompletionResponse = serde_json::from_str(body)
            .map_err(|err| AppError::Policy(format!("unexpected completion body: {err}")))?;

        let message = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Policy("completion has no choices".into()))?
            .message;

        let invocations = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| Invocation {
                name: call.function.name,
                arguments: match call.function.arguments {
                    Value::String(raw) => InvocationArguments::parse(&raw),
                    other => InvocationArguments::from_value(other),
                },
            })
            .collect();

        Ok(Decision {
            text: message.content.filter(|text| !text.trim().is_empty()),
            invocations,
        })
    }

    async fn complete(&self, request: &DecisionRequest) -> Result<Decision> {
        let body = self.request_body(request);
        debug!(
            endpoint = self.endpoint,
            model = self.model,
            tools = body.tools.len(),
            "requesting decision"
        );

        let mut builder = self.http.post(&self.endpoint).json(&body);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let preview: String = text.chars().take(ERROR_BODY_PREVIEW).collect();
            return Err(AppError::Policy(format!(
                "decision endpoint returned {status}: {preview}"
            )));
        }

        let decision = Self::parse_response(&text)?;
        info!(
            model = self.model,
            invocations = decision.invocations.len(),
            has_text = decision.text.is_some(),
            "decision received"
        );
        Ok(decision)
    }
}

impl DecisionEngine for OpenAiEngine {
    fn decide<'a>(
        &'a self,
        request: &'a DecisionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Decision>> + Send + 'a>> {
        Box::pin(self.complete(request))
    }
}
