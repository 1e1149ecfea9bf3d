//! Turn-based control loop.
//!
//! - `controller`: the fetch → decide → execute → pause state machine.
//! - `prompt`: renders a state snapshot into the decision engine's prompt.

pub mod controller;
pub mod prompt;
