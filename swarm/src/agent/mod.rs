//! The tool-using agent.
//!
//! An agent drives a model through a bounded loop: plan a prompt, call
//! the model, dispatch any requested tools, feed the results back, and
//! stop when the model produces a final answer or a budget runs out.
//! Agents are cheap to clone (shared core); identity is pointer identity,
//! which handoff resolution depends on.

mod builder;
mod config;
mod events;
mod hooks;
mod result;
mod run_loop;

pub use builder::AgentBuilder;
pub use config::{AgentConfiguration, DEFAULT_MAX_ITERATIONS, ModelSettings};
pub use events::{AgentEvent, AgentEventStream};
pub use hooks::RunHooks;
pub use result::{AgentResult, metadata};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::context::CancelFlag;
use crate::guardrail::GuardrailRunner;
use crate::handoff::Handoff;
use crate::membrane::PromptPlanner;
use crate::memory::Memory;
use crate::provider::InferenceProvider;
use crate::tool::{ApprovalHandler, ApprovalPolicy, ToolRegistry};

pub(crate) struct AgentCore {
    pub(crate) config: AgentConfiguration,
    pub(crate) instructions: String,
    pub(crate) provider: Arc<dyn InferenceProvider>,
    pub(crate) registry: Arc<ToolRegistry>,
    pub(crate) memory: Option<Arc<dyn Memory>>,
    pub(crate) guardrails: GuardrailRunner,
    pub(crate) handoffs: Vec<Handoff>,
    pub(crate) hooks: Vec<Arc<dyn RunHooks>>,
    pub(crate) planner: Option<Arc<dyn PromptPlanner>>,
    pub(crate) approval_policy: ApprovalPolicy,
    pub(crate) approval_handler: Option<Arc<dyn ApprovalHandler>>,
    pub(crate) cancel: CancelFlag,
    pub(crate) interrupted: AtomicBool,
}

/// A tool-using controller over one inference provider.
#[derive(Clone)]
pub struct Agent {
    pub(crate) core: Arc<AgentCore>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.core.config.name)
            .field("tools", &self.core.registry.len())
            .field("handoffs", &self.core.handoffs.len())
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Start building an agent named `name`.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> AgentBuilder {
        AgentBuilder::new(name)
    }

    /// The agent's configured name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.core.config.name
    }

    /// The agent's configuration.
    #[must_use]
    pub fn configuration(&self) -> &AgentConfiguration {
        &self.core.config
    }

    /// The agent's instructions.
    #[must_use]
    pub fn instructions(&self) -> &str {
        &self.core.instructions
    }

    /// The agent's tool registry.
    #[must_use]
    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.core.registry
    }

    /// Runtime identity comparison. Two clones of the same agent are
    /// identical; two separately built agents never are, even with equal
    /// configuration.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    /// Request cancellation of the current run.
    pub fn cancel(&self) {
        self.core.cancel.cancel();
    }

    /// Whether this agent is paused on an interrupt (set by a workflow
    /// engine when a run of this agent interrupted).
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.core.interrupted.load(Ordering::SeqCst)
    }

    /// Mark or clear the interrupted state.
    pub fn set_interrupted(&self, interrupted: bool) {
        self.core.interrupted.store(interrupted, Ordering::SeqCst);
    }
}
