//! Tier and reload classification rules.
//!
//! Two independent lookup tables keyed by `(tool, action)`: one refines the
//! caller-declared tier, the other decides whether a call will trigger a
//! domain reload. The tables are data; adding a rule is an entry, not a
//! branch in the scheduler.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use serde_json::Value;

use crate::scheduler::job::{BatchCommand, ExecutionTier};

/// Tier overrides. Query-style actions are always safe to run immediately;
/// world-mutating actions always pay the heavy price, whatever the caller
/// declared. Tools/actions not listed keep the declared tier.
static TIER_RULES: LazyLock<HashMap<(&'static str, &'static str), ExecutionTier>> =
    LazyLock::new(|| {
        HashMap::from([
            (("scene", "get_hierarchy"), ExecutionTier::Instant),
            (("scene", "get_state"), ExecutionTier::Instant),
            (("objects", "find"), ExecutionTier::Instant),
            (("objects", "get_properties"), ExecutionTier::Instant),
            (("console", "read"), ExecutionTier::Instant),
            (("playmode", "get_state"), ExecutionTier::Instant),
            (("scene", "load"), ExecutionTier::Heavy),
            (("scene", "save"), ExecutionTier::Heavy),
            (("scene", "create"), ExecutionTier::Heavy),
            (("project", "build"), ExecutionTier::Heavy),
            (("playmode", "enter"), ExecutionTier::Heavy),
            (("playmode", "exit"), ExecutionTier::Heavy),
            (("scripts", "recompile"), ExecutionTier::Heavy),
            (("tests", "run"), ExecutionTier::Heavy),
        ])
    });

/// Actions that always trigger a domain reload. The compile-sensitive
/// refresh rule lives in code because it depends on a parameter, not just
/// the action name.
static RELOAD_RULES: LazyLock<HashSet<(&'static str, &'static str)>> = LazyLock::new(|| {
    HashSet::from([("playmode", "enter"), ("scripts", "recompile")])
});

fn action_of(params: &Value) -> Option<&str> {
    params.get("action").and_then(Value::as_str)
}

fn compile_mode(params: &Value) -> Option<&str> {
    params.get("compile").and_then(Value::as_str)
}

fn is_asset_refresh(tool: &str, params: &Value) -> bool {
    tool == "assets" && action_of(params) == Some("refresh")
}

/// Resolve the tier actually used for scheduling.
///
/// An asset refresh is `Smooth` only when the compile flag is explicitly
/// `"none"`; otherwise, including when the flag is absent, it is `Heavy`.
/// Unrecognized tools/actions fall back to the declared tier verbatim: the
/// classifier augments, it never downgrades unknown operations.
pub fn classify(tool: &str, declared: ExecutionTier, params: &Value) -> ExecutionTier {
    if is_asset_refresh(tool, params) {
        return if compile_mode(params) == Some("none") {
            ExecutionTier::Smooth
        } else {
            ExecutionTier::Heavy
        };
    }
    if let Some(action) = action_of(params) {
        if let Some(&tier) = TIER_RULES.get(&(tool, action)) {
            return tier;
        }
    }
    declared
}

/// True when executing this call will trigger a domain reload. Defaults to
/// false; an asset refresh reloads unless the compile flag is explicitly
/// `"none"` (an absent flag is disruptive).
pub fn causes_domain_reload(tool: &str, params: &Value) -> bool {
    if is_asset_refresh(tool, params) {
        return compile_mode(params) != Some("none");
    }
    match action_of(params) {
        Some(action) => RELOAD_RULES.contains(&(tool, action)),
        None => false,
    }
}

/// The batch tier is the maximum over its commands: one heavy command makes
/// the whole batch heavy, because the batch schedules as a single unit.
pub fn classify_batch(commands: &[BatchCommand]) -> ExecutionTier {
    commands
        .iter()
        .map(|c| c.tier)
        .max()
        .unwrap_or(ExecutionTier::Instant)
}

/// The batch reload flag is the OR over its commands.
pub fn batch_causes_reload(commands: &[BatchCommand]) -> bool {
    commands.iter().any(|c| c.causes_domain_reload)
}
