//! The value model shared by tools, channels, and checkpoints.
//!
//! Values are [`serde_json::Value`] — the ecosystem's tagged union of
//! null/bool/number/string/array/object. The `preserve_order` feature keeps
//! object keys in insertion order, which makes serialization deterministic;
//! canonical (sorted-key) output lives in [`crate::canonical`].

use serde::{Deserialize, Serialize};

pub use serde_json::{Map as JsonMap, Value};

/// A tool invocation requested by a model.
///
/// The `id` is opaque and correlates a dispatched call to its result even
/// across parallel execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Name of the tool to invoke.
    pub name: String,
    /// Arguments keyed by parameter name, in declaration order.
    pub arguments: JsonMap<String, Value>,
}

impl ToolCall {
    /// Create a call with no id.
    #[must_use]
    pub fn new(name: impl Into<String>, arguments: JsonMap<String, Value>) -> Self {
        Self {
            id: None,
            name: name.into(),
            arguments,
        }
    }

    /// Attach a call id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

impl std::fmt::Display for ToolCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}({})",
            self.name,
            serde_json::to_string(&self.arguments).unwrap_or_default()
        )
    }
}

/// The outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Id of the call this result answers, when the call carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Name of the tool that produced this result.
    pub name: String,
    /// The tool's output value. [`Value::Null`] when the call failed.
    pub output: Value,
    /// Error message when the call failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    /// A successful result for `call`.
    #[must_use]
    pub fn ok(call: &ToolCall, output: Value) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            output,
            error: None,
        }
    }

    /// A failed result for `call`.
    #[must_use]
    pub fn error(call: &ToolCall, message: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            output: Value::Null,
            error: Some(message.into()),
        }
    }

    /// Whether this result carries an error.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// The output rendered for a conversation message: the error message
    /// for failures, otherwise the output as text.
    #[must_use]
    pub fn render(&self) -> String {
        if let Some(err) = &self.error {
            return format!("error: {err}");
        }
        match &self.output {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_result_correlates_by_call_id() {
        let call = ToolCall::new("lookup", JsonMap::new()).with_id("call-7");
        let result = ToolResult::ok(&call, json!({"hits": 3}));
        assert_eq!(result.call_id.as_deref(), Some("call-7"));
        assert_eq!(result.name, "lookup");
        assert!(!result.is_error());
    }

    #[test]
    fn failed_result_renders_error() {
        let call = ToolCall::new("lookup", JsonMap::new());
        let result = ToolResult::error(&call, "backend offline");
        assert!(result.is_error());
        assert_eq!(result.render(), "error: backend offline");
        assert_eq!(result.output, Value::Null);
    }

    #[test]
    fn object_keys_preserve_insertion_order() {
        let mut map = JsonMap::new();
        map.insert("zeta".into(), json!(1));
        map.insert("alpha".into(), json!(2));
        let keys: Vec<&String> = map.keys().collect();
        assert_eq!(keys, ["zeta", "alpha"]);
    }
}
