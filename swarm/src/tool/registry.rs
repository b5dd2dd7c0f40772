//! The tool registry: named, deterministic, guardrail-wrapped.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::context::RunContext;
use crate::error::{Error, ErrorKind, Result};
use crate::guardrail::{GuardrailRunner, GuardrailStage, GuardrailSubject};
use crate::schema::ToolSchema;
use crate::value::{JsonMap, ToolCall, ToolResult, Value};

use super::Tool;

/// A map from tool name to executable handle.
///
/// Iteration order is lexicographic by the UTF-8 bytes of the name, so
/// [`ToolRegistry::list`] is deterministic. Registration is immutable
/// while any run holds a [`RunGuard`].
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, Arc<dyn Tool>>>,
    guardrails: GuardrailRunner,
    active_runs: AtomicUsize,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.names();
        f.debug_struct("ToolRegistry")
            .field("tools", &names)
            .finish_non_exhaustive()
    }
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach tool-stage guardrails (`ToolInput` / `ToolOutput`).
    #[must_use]
    pub fn with_guardrails(mut self, guardrails: GuardrailRunner) -> Self {
        self.guardrails = guardrails;
        self
    }

    /// Register a tool.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateTool`] when the name is taken;
    /// [`Error::Configuration`] when a run is active.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<()> {
        self.ensure_unlocked()?;
        let name = tool.name();
        let mut tools = self.tools.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        if tools.contains_key(&name) {
            return Err(Error::DuplicateTool(name));
        }
        debug!(tool = %name, "registered tool");
        tools.insert(name, tool);
        Ok(())
    }

    /// Remove a tool by name. Removing an absent name is a no-op.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] when a run is active.
    pub fn unregister(&self, name: &str) -> Result<()> {
        self.ensure_unlocked()?;
        let mut tools = self.tools.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        tools.remove(name);
        Ok(())
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let tools = self.tools.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        tools.get(name).cloned()
    }

    /// All tools, sorted lexicographically by the UTF-8 bytes of the name.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<dyn Tool>> {
        let tools = self.tools.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        tools.values().cloned().collect()
    }

    /// All tool names, in the same order as [`ToolRegistry::list`].
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let tools = self.tools.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        tools.keys().cloned().collect()
    }

    /// All tool schemas, in listing order.
    #[must_use]
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.list().iter().map(|tool| tool.schema()).collect()
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        let tools = self.tools.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        tools.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke a tool by name with guardrail checks around execution.
    ///
    /// # Errors
    ///
    /// [`Error::ToolNotFound`] for unknown names,
    /// [`Error::InvalidToolArguments`] on schema mismatch,
    /// [`Error::GuardrailTripwire`] when a tool guardrail trips, and
    /// [`Error::ToolExecutionFailed`] when the tool itself fails.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: &JsonMap<String, Value>,
        cx: &RunContext,
    ) -> Result<Value> {
        let tool = self
            .lookup(name)
            .ok_or_else(|| Error::ToolNotFound(name.to_owned()))?;

        let schema = tool.schema();
        schema.validate_arguments(arguments)?;

        let call = ToolCall::new(name, arguments.clone());
        self.guardrails
            .run(GuardrailStage::ToolInput, &GuardrailSubject::Call(call.clone()), cx)
            .await?;

        let output = tool.invoke(arguments, cx).await.map_err(|e| match e.kind() {
            ErrorKind::GuardrailTripwire | ErrorKind::Cancelled | ErrorKind::Timeout => e,
            _ => Error::tool_execution(name, e.to_string()),
        })?;

        let result = ToolResult::ok(&call, output.clone());
        self.guardrails
            .run(GuardrailStage::ToolOutput, &GuardrailSubject::Output(result), cx)
            .await?;

        Ok(output)
    }

    /// Mark a run as active, freezing registration until the guard drops.
    #[must_use]
    pub fn run_guard(self: &Arc<Self>) -> RunGuard {
        self.active_runs.fetch_add(1, Ordering::SeqCst);
        RunGuard {
            registry: Arc::clone(self),
        }
    }

    fn ensure_unlocked(&self) -> Result<()> {
        if self.active_runs.load(Ordering::SeqCst) > 0 {
            return Err(Error::configuration(
                "tool registry cannot be modified during an active run",
            ));
        }
        Ok(())
    }
}

/// Freezes registry mutation for the duration of a run.
#[derive(Debug)]
pub struct RunGuard {
    registry: Arc<ToolRegistry>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry.active_runs.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guardrail::{FnGuardrail, GuardrailVerdict};
    use crate::schema::{ParameterType, ToolParameter};
    use crate::tool::FnTool;
    use serde_json::json;

    fn echo_tool(name: &str) -> Arc<dyn Tool> {
        let schema = ToolSchema::new(name, "Echo the input.").parameter(ToolParameter::required(
            "input",
            "Text to echo",
            ParameterType::String,
        ));
        Arc::new(FnTool::new(schema, |args| {
            Ok(args.get("input").cloned().unwrap_or(Value::Null))
        }))
    }

    #[test]
    fn list_is_sorted_by_utf8_bytes() {
        let registry = ToolRegistry::new();
        for name in ["zeta", "alpha", "Beta"] {
            registry.register(echo_tool(name)).expect("unique names");
        }
        // 'B' (0x42) < 'a' (0x61) < 'z' (0x7a) in byte order.
        assert_eq!(registry.names(), ["Beta", "alpha", "zeta"]);
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool("echo")).expect("first");
        let err = registry.register(echo_tool("echo")).expect_err("duplicate");
        assert_eq!(err.kind(), ErrorKind::DuplicateTool);
    }

    #[test]
    fn unregister_then_lookup_is_none() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool("echo")).expect("register");
        registry.unregister("echo").expect("unregister");
        assert!(registry.lookup("echo").is_none());
    }

    #[test]
    fn mutation_is_forbidden_during_a_run() {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(echo_tool("echo")).expect("register");
        let guard = registry.run_guard();
        let err = registry.register(echo_tool("other")).expect_err("frozen");
        assert_eq!(err.kind(), ErrorKind::Configuration);
        drop(guard);
        registry.register(echo_tool("other")).expect("unfrozen again");
    }

    #[tokio::test]
    async fn invoke_validates_arguments() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool("echo")).expect("register");
        let cx = RunContext::new("t");

        let mut args = JsonMap::new();
        args.insert("input".into(), json!("hi"));
        let out = registry.invoke("echo", &args, &cx).await.expect("valid");
        assert_eq!(out, json!("hi"));

        let err = registry
            .invoke("echo", &JsonMap::new(), &cx)
            .await
            .expect_err("missing required arg");
        assert_eq!(err.kind(), ErrorKind::InvalidToolArguments);
    }

    #[tokio::test]
    async fn invoke_unknown_tool_fails() {
        let registry = ToolRegistry::new();
        let cx = RunContext::new("t");
        let err = registry
            .invoke("ghost", &JsonMap::new(), &cx)
            .await
            .expect_err("absent");
        assert_eq!(err.kind(), ErrorKind::ToolNotFound);
    }

    #[tokio::test]
    async fn tool_guardrail_tripwire_aborts_invoke() {
        let mut guardrails = GuardrailRunner::new();
        guardrails.push(Arc::new(FnGuardrail::new(
            "no-secrets",
            GuardrailStage::ToolInput,
            |subject| match subject {
                GuardrailSubject::Call(call) if call.arguments.contains_key("secret") => {
                    GuardrailVerdict::tripwire("secret argument")
                }
                _ => GuardrailVerdict::Passed,
            },
        )));
        let registry = ToolRegistry::new().with_guardrails(guardrails);
        let schema = ToolSchema::new("write", "Write a value.").parameter(
            ToolParameter::optional("secret", "A secret", ParameterType::String),
        );
        registry
            .register(Arc::new(FnTool::new(schema, |_| Ok(Value::Null))))
            .expect("register");

        let cx = RunContext::new("t");
        let mut args = JsonMap::new();
        args.insert("secret".into(), json!("hunter2"));
        let err = registry
            .invoke("write", &args, &cx)
            .await
            .expect_err("tripwire");
        assert_eq!(err.kind(), ErrorKind::GuardrailTripwire);
    }
}
