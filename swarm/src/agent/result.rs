//! Agent run results.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::usage::TokenUsage;
use crate::value::{JsonMap, ToolCall, ToolResult, Value};

/// Diagnostic metadata keys the engine emits on [`AgentResult`].
pub mod metadata {
    /// Which engine produced the result.
    pub const ENGINE: &str = "engine";
    /// Checkpoint id associated with the producing workflow step.
    pub const CHECKPOINT_ID: &str = "checkpoint_id";
    /// `true` when the membrane planner failed and the naive prompt path
    /// was used.
    pub const MEMBRANE_FALLBACK_USED: &str = "membrane.fallback.used";
    /// The membrane planner's error text on the fallback path.
    pub const MEMBRANE_FALLBACK_ERROR: &str = "membrane.fallback.error";
    /// Routing decision recorded by a supervisor (`"fallback"` etc).
    pub const ROUTING_DECISION: &str = "routing_decision";
    /// Name of the agent a handoff transferred execution to.
    pub const HANDOFF_TARGET: &str = "handoff_target";
    /// The provider's finish reason when it was not a natural completion.
    pub const FINISH_REASON: &str = "finish_reason";
}

/// The outcome of one agent run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentResult {
    /// The final text output.
    pub output: String,
    /// Every tool call dispatched during the run, in dispatch order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// The matching results, in the same order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResult>,
    /// Completed loop iterations.
    pub iterations: usize,
    /// Wall-clock duration of the run.
    pub duration: Duration,
    /// Token accounting, when the provider reported any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    /// Diagnostic metadata (see [`metadata`]).
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub metadata: JsonMap<String, Value>,
}

impl AgentResult {
    /// Read a metadata entry.
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Whether the membrane fallback path was used.
    #[must_use]
    pub fn used_membrane_fallback(&self) -> bool {
        self.metadata
            .get(metadata::MEMBRANE_FALLBACK_USED)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_accessors() {
        let mut result = AgentResult::default();
        result
            .metadata
            .insert(metadata::MEMBRANE_FALLBACK_USED.into(), json!(true));
        result
            .metadata
            .insert(metadata::ROUTING_DECISION.into(), json!("fallback"));
        assert!(result.used_membrane_fallback());
        assert_eq!(
            result.metadata_value(metadata::ROUTING_DECISION),
            Some(&json!("fallback"))
        );
    }
}
