//! JSON-RPC protocol client for the peer's primary channel.
//!
//! - `message`: request/notification envelopes and the validated inbound
//!   response schema.
//! - `mcp`: payload shapes of `tools/*` and `resources/*`.
//! - `client`: [`ProtocolClient`](client::ProtocolClient), the half-duplex
//!   call-and-wait client and its MCP convenience methods.

pub mod client;
pub mod mcp;
pub mod message;
