//! Agent builder.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use crate::context::CancelFlag;
use crate::error::{Error, Result};
use crate::guardrail::{Guardrail, GuardrailRunner};
use crate::handoff::Handoff;
use crate::membrane::PromptPlanner;
use crate::memory::Memory;
use crate::provider::InferenceProvider;
use crate::tool::{ApprovalHandler, ApprovalPolicy, Tool, ToolRegistry};

use super::{Agent, AgentConfiguration, AgentCore, RunHooks};

/// Builder for [`Agent`].
///
/// # Example
///
/// ```rust,ignore
/// let agent = Agent::builder("researcher")
///     .provider(provider)
///     .instructions("You are a careful researcher.")
///     .tool(search_tool)
///     .max_iterations(6)
///     .build()?;
/// ```
pub struct AgentBuilder {
    config: AgentConfiguration,
    instructions: String,
    provider: Option<Arc<dyn InferenceProvider>>,
    registry: Option<Arc<ToolRegistry>>,
    tools: Vec<Arc<dyn Tool>>,
    memory: Option<Arc<dyn Memory>>,
    guardrails: GuardrailRunner,
    handoffs: Vec<Handoff>,
    hooks: Vec<Arc<dyn RunHooks>>,
    planner: Option<Arc<dyn PromptPlanner>>,
    approval_policy: ApprovalPolicy,
    approval_handler: Option<Arc<dyn ApprovalHandler>>,
}

impl std::fmt::Debug for AgentBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentBuilder")
            .field("name", &self.config.name)
            .field("has_provider", &self.provider.is_some())
            .field("tools", &self.tools.len())
            .field("handoffs", &self.handoffs.len())
            .finish_non_exhaustive()
    }
}

impl AgentBuilder {
    /// Create a builder for an agent named `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: AgentConfiguration::new(name),
            instructions: String::new(),
            provider: None,
            registry: None,
            tools: Vec::new(),
            memory: None,
            guardrails: GuardrailRunner::new(),
            handoffs: Vec::new(),
            hooks: Vec::new(),
            planner: None,
            approval_policy: ApprovalPolicy::Never,
            approval_handler: None,
        }
    }

    /// Set the inference provider.
    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn InferenceProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the agent's instructions.
    #[must_use]
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn configuration(mut self, config: AgentConfiguration) -> Self {
        self.config = config;
        self
    }

    /// Add a tool.
    #[must_use]
    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    /// Add several tools.
    #[must_use]
    pub fn tools(mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    /// Use an existing registry instead of building one from added tools.
    #[must_use]
    pub fn registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Attach session memory.
    #[must_use]
    pub fn memory(mut self, memory: Arc<dyn Memory>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Add a guardrail. Declaration order is execution order.
    #[must_use]
    pub fn guardrail(mut self, guardrail: Arc<dyn Guardrail>) -> Self {
        self.guardrails.push(guardrail);
        self
    }

    /// Declare a handoff.
    #[must_use]
    pub fn handoff(mut self, handoff: Handoff) -> Self {
        self.handoffs.push(handoff);
        self
    }

    /// Add a run hook. Declaration order is invocation order.
    #[must_use]
    pub fn hook(mut self, hook: Arc<dyn RunHooks>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Attach a context membrane (or any prompt planner).
    #[must_use]
    pub fn planner(mut self, planner: Arc<dyn PromptPlanner>) -> Self {
        self.planner = Some(planner);
        self
    }

    /// Set the tool approval policy.
    #[must_use]
    pub fn approval_policy(mut self, policy: ApprovalPolicy) -> Self {
        self.approval_policy = policy;
        self
    }

    /// Set the approval handler consulted for gated calls.
    #[must_use]
    pub fn approval_handler(mut self, handler: Arc<dyn ApprovalHandler>) -> Self {
        self.approval_handler = Some(handler);
        self
    }

    /// Set the iteration budget.
    #[must_use]
    pub const fn max_iterations(mut self, max: usize) -> Self {
        self.config.max_iterations = max;
        self
    }

    /// Bound a single run's wall-clock time.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Prefer the provider's streaming surfaces during runs.
    #[must_use]
    pub const fn streaming(mut self, streaming: bool) -> Self {
        self.config.streaming = streaming;
        self
    }

    /// Terminate the run when any tool call fails.
    #[must_use]
    pub const fn stop_on_tool_error(mut self, stop: bool) -> Self {
        self.config.stop_on_tool_error = stop;
        self
    }

    /// Dispatch batched tool calls concurrently.
    #[must_use]
    pub const fn parallel_tool_calls(mut self, parallel: bool) -> Self {
        self.config.parallel_tool_calls = parallel;
        self
    }

    /// Build the agent.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] for invalid configuration,
    /// [`Error::ProviderUnavailable`] when no provider was set, and
    /// [`Error::DuplicateTool`] when added tools collide.
    pub fn build(self) -> Result<Agent> {
        self.config.validate()?;
        let provider = self.provider.ok_or(Error::ProviderUnavailable)?;

        let registry = match self.registry {
            Some(registry) => registry,
            None => Arc::new(ToolRegistry::new()),
        };
        for tool in self.tools {
            registry.register(tool)?;
        }
        // The planner's internal tools must be invokable like any other.
        if let Some(planner) = &self.planner {
            for tool in planner.internal_tools() {
                registry.register(tool)?;
            }
        }

        Ok(Agent {
            core: Arc::new(AgentCore {
                config: self.config,
                instructions: self.instructions,
                provider,
                registry,
                memory: self.memory,
                guardrails: self.guardrails,
                handoffs: self.handoffs,
                hooks: self.hooks,
                planner: self.planner,
                approval_policy: self.approval_policy,
                approval_handler: self.approval_handler,
                cancel: CancelFlag::new(),
                interrupted: AtomicBool::new(false),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::provider::MockProvider;

    #[test]
    fn missing_provider_is_rejected() {
        let err = Agent::builder("worker").build().expect_err("no provider");
        assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
    }

    #[test]
    fn invalid_configuration_is_rejected_at_build() {
        let mut config = AgentConfiguration::new("worker");
        config.tool_concurrency = 0;
        let err = Agent::builder("worker")
            .provider(Arc::new(MockProvider::new()))
            .configuration(config)
            .build()
            .expect_err("invalid config");
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn clones_share_identity() {
        let agent = Agent::builder("worker")
            .provider(Arc::new(MockProvider::new()))
            .build()
            .expect("valid");
        let clone = agent.clone();
        assert!(agent.ptr_eq(&clone));

        let rebuilt = Agent::builder("worker")
            .provider(Arc::new(MockProvider::new()))
            .build()
            .expect("valid");
        assert!(!agent.ptr_eq(&rebuilt));
    }
}
