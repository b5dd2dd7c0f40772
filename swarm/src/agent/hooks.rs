//! Run lifecycle hooks.
//!
//! Hooks observe a run from the side; they cannot alter its result.
//! For a single event, hooks fire in declaration order.

use async_trait::async_trait;

use crate::agent::AgentResult;
use crate::context::RunContext;
use crate::value::{ToolCall, ToolResult};

/// Observes the lifecycle of agent runs.
#[async_trait]
pub trait RunHooks: Send + Sync {
    /// A run started.
    async fn on_run_started(&self, _cx: &RunContext) {}

    /// A loop iteration started (1-based).
    async fn on_iteration_started(&self, _cx: &RunContext, _iteration: usize) {}

    /// A tool call is about to dispatch.
    async fn on_tool_call(&self, _cx: &RunContext, _call: &ToolCall) {}

    /// A tool result arrived.
    async fn on_tool_result(&self, _cx: &RunContext, _result: &ToolResult) {}

    /// The run completed successfully.
    async fn on_run_completed(&self, _cx: &RunContext, _result: &AgentResult) {}
}
