//! Context prompt rendering.
//!
//! Snapshots shaped like a game state (`playerID` plus a `players` array)
//! get a compact status report; anything else is embedded as pretty JSON.
//! The operation list is rendered from the catalog, never hardcoded, and
//! the instruction text comes from `[policy]` configuration.

use std::fmt::Write as _;

use serde_json::Value;

use crate::config::PolicyConfig;
use crate::policy::OperationSpec;

/// Configurable instruction text framing the operation list.
///
/// Empty fields are left out of the prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptText {
    /// Objective stated before the operation list.
    pub goal: String,
    /// Closing guidance after the operation list.
    pub guidance: String,
}

impl PromptText {
    /// Instruction text taken from the policy configuration.
    #[must_use]
    pub fn from_policy(policy: &PolicyConfig) -> Self {
        Self {
            goal: policy.goal.clone(),
            guidance: policy.guidance.clone(),
        }
    }
}

/// Build the user prompt for one turn.
#[must_use]
pub fn build_prompt(
    snapshot: &Value,
    operations: &[OperationSpec],
    summary: Option<&str>,
    text: &PromptText,
) -> String {
    let mut out = String::new();

    match render_player_status(snapshot) {
        Some(status) => out.push_str(&status),
        None => render_generic_state(&mut out, snapshot),
    }

    if let Some(summary) = summary.filter(|s| !s.trim().is_empty()) {
        let _ = write!(out, "\n**Map Summary:**\n{}\n", summary.trim_end());
    }

    out.push_str("\n**Instructions:**\n");
    let goal = text.goal.trim();
    if !goal.is_empty() {
        out.push_str(goal);
        out.push(' ');
    }
    if operations.is_empty() {
        out.push_str("No tools are currently available; describe your plan instead.\n");
    } else {
        let _ = writeln!(out, "You have access to {} tools:", operations.len());
        for (index, op) in operations.iter().enumerate() {
            let _ = write!(out, "{}. `{}`", index + 1, op.name);
            if op.description.is_empty() {
                out.push('\n');
            } else {
                let _ = writeln!(out, " - {}", op.description);
            }
        }
        let guidance = text.guidance.trim();
        if !guidance.is_empty() {
            let _ = writeln!(out, "\n{guidance}");
        }
    }

    out
}

fn render_player_status(snapshot: &Value) -> Option<String> {
    let player_id = snapshot.get("playerID")?;
    let players = snapshot.get("players")?.as_array()?;
    let me = players.iter().find(|p| p.get("id") == Some(player_id))?;
    let tick = snapshot.get("tick").map_or_else(|| "0".to_owned(), scalar);

    let mut out = String::new();
    let _ = writeln!(out, "**Game Tick:** {tick}");
    let _ = writeln!(out, "**Your Player ID:** {}\n", scalar(player_id));
    let _ = writeln!(out, "**Your Status:**");
    let _ = writeln!(out, "- Alive: {}", is_alive(me));
    let _ = writeln!(out, "- Troops: {}", field(me, "troops"));
    let _ = writeln!(out, "- Gold: {}", field(me, "gold"));
    let _ = writeln!(out, "- Cities: {}", field(me, "cities"));
    let _ = writeln!(out, "- Land: {} tiles\n", field(me, "land"));
    let _ = writeln!(out, "**All Players:**");
    for p in players {
        let you = if p.get("id") == Some(player_id) { " (YOU)" } else { "" };
        let _ = writeln!(
            out,
            "- Player {}{you}: {} land, {} troops, {}",
            p.get("id").map_or_else(|| "?".to_owned(), scalar),
            field(p, "land"),
            field(p, "troops"),
            if is_alive(p) { "Alive" } else { "Dead" },
        );
    }
    Some(out)
}

fn render_generic_state(out: &mut String, snapshot: &Value) {
    let pretty = serde_json::to_string_pretty(snapshot).unwrap_or_else(|_| snapshot.to_string());
    let _ = write!(out, "**Current State:**\n```json\n{pretty}\n```\n");
}

fn is_alive(player: &Value) -> bool {
    player.get("isAlive").and_then(Value::as_bool).unwrap_or(false)
}

fn field(value: &Value, key: &str) -> String {
    value.get(key).map_or_else(|| "0".to_owned(), scalar)
}

/// Strings without quotes, everything else as JSON.
fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
