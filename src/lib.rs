#![forbid(unsafe_code)]

//! Turn-based agent loop over a stdio JSON-RPC peer.
//!
//! A peer process is launched and spoken to over newline-delimited
//! JSON-RPC on its stdin/stdout while its stderr is drained for
//! diagnostics and a readiness sentinel. Each turn reads a state snapshot,
//! asks an external [`policy::DecisionEngine`] what to do, and executes the
//! requested operations on the peer.

pub mod catalog;
pub mod config;
pub mod errors;
pub mod inspect;
pub mod logging;
pub mod peer;
pub mod policy;
pub mod rpc;
pub mod session;
pub mod turn;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
