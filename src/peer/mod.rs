//! Peer process transport.
//!
//! The peer is a long-running child process speaking newline-delimited
//! JSON-RPC on stdin/stdout and free-form diagnostics on stderr.
//!
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based line framing
//!   with a maximum line length.
//! - `spawner`: process launch and SIGTERM → kill shutdown.
//! - `diagnostics`: stderr drain, noise filtering, readiness signal.

pub mod codec;
pub mod diagnostics;
pub mod spawner;
