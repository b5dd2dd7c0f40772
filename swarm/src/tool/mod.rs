//! Tools: the executable capabilities an agent can invoke.
//!
//! A [`Tool`] couples an introspectable [`ToolSchema`] with an async
//! execution body. Tools live in a [`ToolRegistry`] which validates
//! arguments, wraps execution in tool guardrails, and lists tools in a
//! deterministic order. Batches of model-requested calls go through the
//! [`ToolDispatcher`], which handles approval gating, bounded
//! concurrency, and order-preserving result emission.

mod dispatch;
mod registry;

pub use dispatch::{
    ApprovalDecision, ApprovalHandler, ApprovalPolicy, ToolDispatchEvent, ToolDispatcher,
};
pub use registry::{RunGuard, ToolRegistry};

use async_trait::async_trait;

use crate::context::RunContext;
use crate::error::Result;
use crate::schema::ToolSchema;
use crate::value::{JsonMap, Value};

/// An executable capability with an introspectable schema.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The tool's callable surface.
    fn schema(&self) -> ToolSchema;

    /// The tool's name. Defaults to the schema name.
    fn name(&self) -> String {
        self.schema().name
    }

    /// Execute the tool.
    ///
    /// Arguments have already been validated against [`Tool::schema`] by
    /// the registry.
    async fn invoke(&self, arguments: &JsonMap<String, Value>, cx: &RunContext) -> Result<Value>;
}

/// A tool built from a synchronous closure, for tests and trivial tools.
pub struct FnTool<F> {
    schema: ToolSchema,
    body: F,
}

impl<F> FnTool<F>
where
    F: Fn(&JsonMap<String, Value>) -> Result<Value> + Send + Sync,
{
    /// Wrap a closure under the given schema.
    pub const fn new(schema: ToolSchema, body: F) -> Self {
        Self { schema, body }
    }
}

impl<F> std::fmt::Debug for FnTool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.schema.name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> Tool for FnTool<F>
where
    F: Fn(&JsonMap<String, Value>) -> Result<Value> + Send + Sync,
{
    fn schema(&self) -> ToolSchema {
        self.schema.clone()
    }

    async fn invoke(&self, arguments: &JsonMap<String, Value>, _cx: &RunContext) -> Result<Value> {
        (self.body)(arguments)
    }
}
