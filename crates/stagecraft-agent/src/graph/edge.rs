use serde::{Deserialize, Serialize};
use serde_json::Value;

use stagecraft_core::state::StateContainer;

/// A directed edge between two registered nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Source node name.
    pub from: String,
    /// Target node name.
    pub to: String,
    /// Condition that must hold, after the source ran, to traverse this edge.
    #[serde(default)]
    pub condition: EdgeCondition,
}

/// Condition for traversing an edge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeCondition {
    /// Always traverse this edge.
    #[default]
    Always,
    /// Traverse if a simple expression matches the state.
    /// Supported: `key == "value"`, `key != "value"`, `key contains "substr"`,
    /// where `key` may be a dotted path into nested objects (`plan.name`).
    Conditional { expr: String },
}

impl Edge {
    /// Create an unconditional edge.
    pub fn always(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: EdgeCondition::Always,
        }
    }

    /// Create a conditional edge.
    pub fn conditional(
        from: impl Into<String>,
        to: impl Into<String>,
        expr: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: EdgeCondition::Conditional { expr: expr.into() },
        }
    }

    pub fn matches(&self, state: &StateContainer) -> bool {
        match &self.condition {
            EdgeCondition::Always => true,
            EdgeCondition::Conditional { expr } => evaluate_condition(expr, state),
        }
    }
}

/// Evaluate a simple conditional expression against the state.
///
/// Non-string values are compared by their JSON text. Returns `false` for
/// unparseable expressions and missing keys.
pub fn evaluate_condition(expr: &str, state: &StateContainer) -> bool {
    let expr = expr.trim();

    if let Some((key, substr)) = parse_operator(expr, " contains ") {
        return lookup(state, key).is_some_and(|s| s.contains(substr));
    }

    if let Some((key, value)) = parse_operator(expr, "!=") {
        return lookup(state, key).is_some_and(|s| s != value);
    }

    if let Some((key, value)) = parse_operator(expr, "==") {
        return lookup(state, key).is_some_and(|s| s == value);
    }

    false
}

/// Resolve a dotted path and render the value for comparison.
fn lookup(state: &StateContainer, path: &str) -> Option<String> {
    let mut parts = path.split('.');
    let mut current = state.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(match current {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

/// Parse `key OP "value"` expressions, returning (key, value).
fn parse_operator<'a>(expr: &'a str, op: &str) -> Option<(&'a str, &'a str)> {
    let (key, val) = expr.split_once(op)?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key, val.trim().trim_matches('"')))
}
