//! Convenience re-exports of the common surface.
//!
//! ```rust,ignore
//! use swarm::prelude::*;
//! ```

pub use crate::agent::{
    Agent, AgentBuilder, AgentConfiguration, AgentEvent, AgentResult, ModelSettings, RunHooks,
};
pub use crate::context::{CancelFlag, RunContext};
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::graph::{
    ChannelSpec, CheckpointPolicy, CheckpointStore, DagNode, ExternalWrite, FileCheckpointStore,
    InterruptHandle, MemoryCheckpointStore, Step, Workflow, WorkflowEngine, WorkflowOutcome,
};
pub use crate::guardrail::{Guardrail, GuardrailRunner, GuardrailStage, GuardrailVerdict};
pub use crate::handoff::Handoff;
pub use crate::membrane::{ContextMembrane, MembraneConfig, PromptPlanner};
pub use crate::memory::{BufferMemory, Memory, WindowBufferMemory};
pub use crate::provider::{
    FinishReason, InferenceOptions, InferenceProvider, MockProvider, ProviderResponse, ToolChoice,
};
pub use crate::resilience::{
    BackoffStrategy, CircuitBreaker, FallbackChain, FallbackStep, RateLimiter, RetryPolicy,
};
pub use crate::routing::{
    FixedRouter, InterruptionPolicy, KeywordRouter, LlmRouter, RouteDecision, RoutingStrategy,
    Supervisor,
};
pub use crate::schema::{ParameterType, ToolParameter, ToolSchema};
pub use crate::tool::{ApprovalHandler, ApprovalPolicy, FnTool, Tool, ToolRegistry};
pub use crate::usage::TokenUsage;
pub use crate::value::{ToolCall, ToolResult, Value};
