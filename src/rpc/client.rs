//! Correlated request/response client for the primary channel.
//!
//! Strictly half-duplex: [`ProtocolClient::call`] writes one request and
//! reads until that request's response arrives before returning, so at most
//! one id is ever in flight and correlation is a plain equality check.
//!
//! The client is generic over its byte streams so the same code drives a
//! real child process ([`PeerClient`]) and in-memory pipes in tests.

use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::{ChildStdin, ChildStdout};
use tokio_util::codec::FramedRead;
use tracing::{debug, warn};

use crate::peer::codec::LineCodec;
use crate::rpc::mcp::{
    CallToolResult, ListResourcesResult, ListToolsResult, OperationDescriptor,
    ReadResourceResult, ResourceDescriptor, ToolOutput, ToolResult,
};
use crate::rpc::message::{InboundMessage, Notification, Request};
use crate::{AppError, Result};

/// MCP protocol revision announced by [`ProtocolClient::initialize`].
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Upper bound on pages followed for one list call.
const MAX_PAGES: usize = 64;

/// Client bound to a spawned peer's stdio.
pub type PeerClient = ProtocolClient<ChildStdin, ChildStdout>;

/// JSON-RPC client over a line-framed byte-stream pair.
#[derive(Debug)]
pub struct ProtocolClient<W, R> {
    writer: W,
    reader: FramedRead<R, LineCodec>,
    last_id: u64,
    in_flight: Option<u64>,
    // Set after a framing error: `FramedRead` yields one `None` next, which
    // is not end-of-input.
    resync: bool,
}

impl<W, R> ProtocolClient<W, R>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    /// Wrap `writer` (peer stdin) and `reader` (peer stdout).
    #[must_use]
    pub fn new(writer: W, reader: R) -> Self {
        Self::with_codec(writer, reader, LineCodec::new())
    }

    /// Like [`new`](Self::new) with an explicit line codec.
    #[must_use]
    pub fn with_codec(writer: W, reader: R, codec: LineCodec) -> Self {
        Self {
            writer,
            reader: FramedRead::new(reader, codec),
            last_id: 0,
            in_flight: None,
            resync: false,
        }
    }

    /// Id of the most recently sent request; `0` before the first call.
    #[must_use]
    pub fn last_request_id(&self) -> u64 {
        self.last_id
    }

    /// Id of the request awaiting its response, if any.
    #[must_use]
    pub fn pending_request(&self) -> Option<u64> {
        self.in_flight
    }

    /// Send `method` with `params` and wait for its result.
    ///
    /// # Errors
    ///
    /// - `AppError::TransportClosed` — stdout reached end-of-input or stdin
    ///   could not be written.
    /// - `AppError::MalformedResponse` — the response line is not a valid
    ///   JSON-RPC response or answers a different id.
    /// - `AppError::Remote` — the peer returned an error object.
    pub async fn call(&mut self, method: &str, params: Value) -> Result<Value> {
        self.last_id += 1;
        let id = self.last_id;

        let line = serde_json::to_vec(&Request::new(id, method, &params))
            .map_err(|err| AppError::Io(format!("failed to serialise request: {err}")))?;

        self.in_flight = Some(id);
        let outcome = self.exchange(id, method, line).await;
        self.in_flight = None;
        outcome
    }

    /// Send a notification; no response is expected.
    ///
    /// # Errors
    ///
    /// Returns `AppError::TransportClosed` if stdin cannot be written.
    pub async fn notify(&mut self, method: &str, params: Value) -> Result<()> {
        let line = serde_json::to_vec(&Notification::new(method, &params))
            .map_err(|err| AppError::Io(format!("failed to serialise notification: {err}")))?;
        self.write_line(line).await?;
        debug!(method, "notification sent");
        Ok(())
    }

    /// MCP `initialize` request followed by `notifications/initialized`.
    ///
    /// Returns the peer's `initialize` result (server info, capabilities).
    ///
    /// # Errors
    ///
    /// Any error of [`call`](Self::call) or [`notify`](Self::notify).
    pub async fn initialize(&mut self, client_name: &str, client_version: &str) -> Result<Value> {
        let result = self
            .call(
                "initialize",
                json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": { "name": client_name, "version": client_version }
                }),
            )
            .await?;
        self.notify("notifications/initialized", json!({})).await?;
        Ok(result)
    }

    /// `resources/list`, following pagination.
    ///
    /// # Errors
    ///
    /// Any error of [`call`](Self::call); `MalformedResponse` if a page does
    /// not have the expected shape.
    pub async fn list_resources(&mut self) -> Result<Vec<ResourceDescriptor>> {
        let mut resources = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let page: ListResourcesResult = decode_result(
                "resources/list",
                self.call("resources/list", cursor_params(cursor.as_deref()))
                    .await?,
            )?;
            resources.extend(page.resources);
            match advance_cursor(cursor.as_deref(), page.next_cursor) {
                Some(next) => cursor = Some(next),
                None => return Ok(resources),
            }
        }

        warn!(max_pages = MAX_PAGES, "resources/list pagination cut short");
        Ok(resources)
    }

    /// `resources/read`: text of the first content item, or `""` when the
    /// resource has no contents.
    ///
    /// # Errors
    ///
    /// Any error of [`call`](Self::call); `MalformedResponse` on an
    /// unexpected result shape.
    pub async fn read_resource(&mut self, uri: &str) -> Result<String> {
        let read: ReadResourceResult =
            decode_result("resources/read", self.call("resources/read", json!({ "uri": uri })).await?)?;
        Ok(read
            .contents
            .into_iter()
            .next()
            .and_then(|item| item.text)
            .unwrap_or_default())
    }

    /// `tools/list`, following pagination.
    ///
    /// # Errors
    ///
    /// Any error of [`call`](Self::call); `MalformedResponse` if a page does
    /// not have the expected shape.
    pub async fn list_tools(&mut self) -> Result<Vec<OperationDescriptor>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let page: ListToolsResult = decode_result(
                "tools/list",
                self.call("tools/list", cursor_params(cursor.as_deref()))
                    .await?,
            )?;
            tools.extend(page.tools);
            match advance_cursor(cursor.as_deref(), page.next_cursor) {
                Some(next) => cursor = Some(next),
                None => return Ok(tools),
            }
        }

        warn!(max_pages = MAX_PAGES, "tools/list pagination cut short");
        Ok(tools)
    }

    /// `tools/call`: invoke `name` and decode its first content item.
    ///
    /// Text that is not JSON comes back as [`ToolOutput::Text`]; that is a
    /// normal outcome, not an error.
    ///
    /// # Errors
    ///
    /// Any error of [`call`](Self::call); `MalformedResponse` on an
    /// unexpected result shape.
    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<ToolResult> {
        let result: CallToolResult = decode_result(
            "tools/call",
            self.call("tools/call", json!({ "name": name, "arguments": arguments }))
                .await?,
        )?;

        let output = result
            .content
            .into_iter()
            .next()
            .map_or(ToolOutput::Empty, |item| {
                ToolOutput::from_text(item.text.unwrap_or_default())
            });

        Ok(ToolResult {
            output,
            is_error: result.is_error,
        })
    }

    async fn exchange(&mut self, id: u64, method: &str, line: Vec<u8>) -> Result<Value> {
        self.write_line(line).await?;
        debug!(id, method, "request sent");

        loop {
            let line = match self.reader.next().await {
                None if self.resync => {
                    self.resync = false;
                    continue;
                }
                None => {
                    return Err(AppError::TransportClosed(format!(
                        "peer closed stdout while awaiting response to request {id} ({method})"
                    )));
                }
                Some(Err(err)) => {
                    self.resync = matches!(err, AppError::MalformedResponse(_));
                    return Err(err);
                }
                Some(Ok(line)) => line,
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match InboundMessage::decode(trimmed)? {
                InboundMessage::PeerMessage { method: peer_method } => {
                    debug!(
                        id,
                        peer_method, "skipping peer-initiated message while awaiting response"
                    );
                }
                InboundMessage::Result { id: got, result } => {
                    ensure_correlated(id, Some(got))?;
                    debug!(id, method, "response received");
                    return Ok(result);
                }
                InboundMessage::Error { id: got, error } => {
                    ensure_correlated(id, got)?;
                    debug!(id, method, code = error.code, "error response received");
                    return Err(error.into());
                }
            }
        }
    }

    async fn write_line(&mut self, mut line: Vec<u8>) -> Result<()> {
        line.push(b'\n');
        self.writer
            .write_all(&line)
            .await
            .map_err(|err| AppError::TransportClosed(format!("write to peer failed: {err}")))?;
        self.writer
            .flush()
            .await
            .map_err(|err| AppError::TransportClosed(format!("flush to peer failed: {err}")))
    }
}

/// An error response without an id is accepted: with one request in flight
/// it can only be answering that request.
fn ensure_correlated(expected: u64, got: Option<u64>) -> Result<()> {
    match got {
        Some(got) if got != expected => Err(AppError::MalformedResponse(format!(
            "response id {got} does not match request id {expected}"
        ))),
        _ => Ok(()),
    }
}

fn decode_result<T>(method: &str, value: Value) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if value.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(value)
        .map_err(|err| AppError::MalformedResponse(format!("unexpected {method} result: {err}")))
}

fn cursor_params(cursor: Option<&str>) -> Value {
    cursor.map_or_else(|| json!({}), |cursor| json!({ "cursor": cursor }))
}

/// Next cursor to request, or `None` when pagination is done. A peer that
/// repeats the cursor it was just given is treated as done.
fn advance_cursor(current: Option<&str>, next: Option<String>) -> Option<String> {
    next.filter(|next| !next.is_empty() && Some(next.as_str()) != current)
}
