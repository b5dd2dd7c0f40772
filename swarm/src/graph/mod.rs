//! The orchestration graph: declarative step trees over a checkpointing
//! runtime.
//!
//! A workflow is a tree of [`Step`]s — sequences, parallel fan-outs,
//! dependency DAGs, routed branches, loops, transforms, guards, and
//! interrupt points — validated at construction and executed by the
//! [`WorkflowEngine`] with checkpointing, interruption, and single-use
//! resume.

mod channel;
mod checkpoint;
mod compile;
mod engine;
mod replay;
mod resume;

pub use channel::{ChannelScope, ChannelSpec, ExternalWrite, UpdatePolicy, ValueType};
pub use checkpoint::{
    CheckpointState, CheckpointStore, EVENT_SCHEMA_VERSION, FileCheckpointStore,
    MemoryCheckpointStore, OUTPUT_CHANNEL, sanitize_workflow_id,
};
pub use compile::{GraphViolation, Workflow};
pub use engine::{CheckpointPolicy, WorkflowEngine, WorkflowOutcome};
pub use replay::{
    TranscriptDiff, TranscriptEvent, final_state_hash, first_diff, project_transcript,
    transcript_hash,
};
pub use resume::InterruptHandle;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::agent::Agent;
use crate::error::Result;
use crate::routing::{InterruptionPolicy, RoutingStrategy};

/// Pure string-to-string step body.
pub type TransformFn = Arc<dyn Fn(String) -> String + Send + Sync>;
/// Predicate over the current dataflow value.
pub type PredicateFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;
/// Validation check over the current dataflow value.
pub type GuardFn = Arc<dyn Fn(&str) -> Result<()> + Send + Sync>;

/// How a parallel group reacts to a failing branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParallelErrorHandling {
    /// The first branch error fails the group.
    #[default]
    FailFast,
    /// Failed branches are dropped; surviving outputs merge.
    ContinueOnError,
}

/// How parallel branch outputs combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeStrategy {
    /// Newline-join outputs in declaration order.
    #[default]
    Concat,
    /// Keep only the last branch's output.
    Last,
}

/// One node of a dependency DAG.
#[derive(Clone)]
pub struct DagNode {
    /// Node name, unique within the DAG.
    pub name: String,
    /// The node's step.
    pub step: Step,
    /// Names of nodes that must complete first.
    pub depends_on: Vec<String>,
}

impl DagNode {
    /// Create a node with no dependencies.
    #[must_use]
    pub fn new(name: impl Into<String>, step: Step) -> Self {
        Self {
            name: name.into(),
            step,
            depends_on: Vec::new(),
        }
    }

    /// Add dependencies.
    #[must_use]
    pub fn depends_on(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }
}

impl std::fmt::Debug for DagNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DagNode")
            .field("name", &self.name)
            .field("depends_on", &self.depends_on)
            .finish_non_exhaustive()
    }
}

/// One orchestration step. Each step has a name used for identity in the
/// graph, in channels, and in checkpoints.
#[derive(Clone)]
pub enum Step {
    /// Run children in order, threading the dataflow value through.
    Sequential {
        /// Step name.
        name: String,
        /// Children, in execution order.
        steps: Vec<Step>,
    },
    /// Run children concurrently on the same input.
    Parallel {
        /// Step name.
        name: String,
        /// Branches.
        steps: Vec<Step>,
        /// Failure behavior.
        error_handling: ParallelErrorHandling,
        /// Output combination.
        merge: MergeStrategy,
    },
    /// Run nodes in dependency order.
    Dag {
        /// Step name.
        name: String,
        /// Nodes with their dependencies.
        nodes: Vec<DagNode>,
    },
    /// Route to one of several agents.
    Router {
        /// Step name.
        name: String,
        /// The routing strategy.
        strategy: Arc<dyn RoutingStrategy>,
        /// Named routes.
        routes: BTreeMap<String, Agent>,
        /// Fallback agent for unavailable or interrupted routes.
        fallback: Option<Agent>,
        /// Interruption handling.
        policy: InterruptionPolicy,
    },
    /// Run one of two children depending on the dataflow value.
    Branch {
        /// Step name.
        name: String,
        /// Chooses the branch.
        predicate: PredicateFn,
        /// Taken when the predicate holds.
        then_step: Box<Step>,
        /// Taken otherwise; absent means pass-through.
        else_step: Option<Box<Step>>,
    },
    /// Repeat the body while the predicate holds, up to a bound.
    RepeatWhile {
        /// Step name.
        name: String,
        /// The loop body.
        body: Box<Step>,
        /// Loop condition over the current value.
        predicate: PredicateFn,
        /// Iteration bound.
        max_iterations: usize,
    },
    /// Apply a pure function to the dataflow value.
    Transform {
        /// Step name.
        name: String,
        /// The function.
        transform: TransformFn,
    },
    /// Validate the dataflow value; failure aborts the workflow.
    Guard {
        /// Step name.
        name: String,
        /// The check.
        check: GuardFn,
    },
    /// Pause for human approval. The resume payload is recorded on the
    /// step's channel; the dataflow value passes through unchanged.
    HumanApproval {
        /// Step name.
        name: String,
        /// What to ask the human.
        prompt: String,
    },
    /// Unconditionally pause the workflow.
    Interrupt {
        /// Step name.
        name: String,
        /// Why the workflow pauses.
        reason: String,
    },
    /// Run an agent on the dataflow value.
    AgentRun {
        /// Step name.
        name: String,
        /// The agent.
        agent: Agent,
    },
}

impl Step {
    /// The step's name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Sequential { name, .. }
            | Self::Parallel { name, .. }
            | Self::Dag { name, .. }
            | Self::Router { name, .. }
            | Self::Branch { name, .. }
            | Self::RepeatWhile { name, .. }
            | Self::Transform { name, .. }
            | Self::Guard { name, .. }
            | Self::HumanApproval { name, .. }
            | Self::Interrupt { name, .. }
            | Self::AgentRun { name, .. } => name,
        }
    }

    /// A sequential group.
    #[must_use]
    pub fn sequential(name: impl Into<String>, steps: Vec<Self>) -> Self {
        Self::Sequential {
            name: name.into(),
            steps,
        }
    }

    /// A parallel group with default error handling and merge.
    #[must_use]
    pub fn parallel(name: impl Into<String>, steps: Vec<Self>) -> Self {
        Self::Parallel {
            name: name.into(),
            steps,
            error_handling: ParallelErrorHandling::default(),
            merge: MergeStrategy::default(),
        }
    }

    /// A dependency DAG.
    #[must_use]
    pub fn dag(name: impl Into<String>, nodes: Vec<DagNode>) -> Self {
        Self::Dag {
            name: name.into(),
            nodes,
        }
    }

    /// A router over named agents.
    #[must_use]
    pub fn router(
        name: impl Into<String>,
        strategy: Arc<dyn RoutingStrategy>,
        routes: BTreeMap<String, Agent>,
    ) -> Self {
        Self::Router {
            name: name.into(),
            strategy,
            routes,
            fallback: None,
            policy: InterruptionPolicy::Never,
        }
    }

    /// A two-way branch.
    #[must_use]
    pub fn branch(
        name: impl Into<String>,
        predicate: impl Fn(&str) -> bool + Send + Sync + 'static,
        then_step: Self,
        else_step: Option<Self>,
    ) -> Self {
        Self::Branch {
            name: name.into(),
            predicate: Arc::new(predicate),
            then_step: Box::new(then_step),
            else_step: else_step.map(Box::new),
        }
    }

    /// A bounded while-loop.
    #[must_use]
    pub fn repeat_while(
        name: impl Into<String>,
        body: Self,
        predicate: impl Fn(&str) -> bool + Send + Sync + 'static,
        max_iterations: usize,
    ) -> Self {
        Self::RepeatWhile {
            name: name.into(),
            body: Box::new(body),
            predicate: Arc::new(predicate),
            max_iterations,
        }
    }

    /// A pure transform.
    #[must_use]
    pub fn transform(
        name: impl Into<String>,
        transform: impl Fn(String) -> String + Send + Sync + 'static,
    ) -> Self {
        Self::Transform {
            name: name.into(),
            transform: Arc::new(transform),
        }
    }

    /// A validation guard.
    #[must_use]
    pub fn guard(
        name: impl Into<String>,
        check: impl Fn(&str) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self::Guard {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    /// A human approval pause.
    #[must_use]
    pub fn human_approval(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::HumanApproval {
            name: name.into(),
            prompt: prompt.into(),
        }
    }

    /// An unconditional pause.
    #[must_use]
    pub fn interrupt(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Interrupt {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// An agent invocation.
    #[must_use]
    pub fn agent_run(name: impl Into<String>, agent: Agent) -> Self {
        Self::AgentRun {
            name: name.into(),
            agent,
        }
    }

    /// Override a parallel group's error handling.
    #[must_use]
    pub fn with_error_handling(mut self, handling: ParallelErrorHandling) -> Self {
        if let Self::Parallel { error_handling, .. } = &mut self {
            *error_handling = handling;
        }
        self
    }

    /// Override a parallel group's merge strategy.
    #[must_use]
    pub fn with_merge(mut self, strategy: MergeStrategy) -> Self {
        if let Self::Parallel { merge, .. } = &mut self {
            *merge = strategy;
        }
        self
    }

    /// Set a router's fallback agent.
    #[must_use]
    pub fn with_fallback(mut self, agent: Agent) -> Self {
        if let Self::Router { fallback, .. } = &mut self {
            *fallback = Some(agent);
        }
        self
    }

    /// Set a router's interruption policy.
    #[must_use]
    pub fn with_policy(mut self, new_policy: InterruptionPolicy) -> Self {
        if let Self::Router { policy, .. } = &mut self {
            *policy = new_policy;
        }
        self
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequential { name, steps } => f
                .debug_struct("Sequential")
                .field("name", name)
                .field("steps", &steps.len())
                .finish(),
            Self::Parallel { name, steps, .. } => f
                .debug_struct("Parallel")
                .field("name", name)
                .field("steps", &steps.len())
                .finish(),
            Self::Dag { name, nodes } => f
                .debug_struct("Dag")
                .field("name", name)
                .field("nodes", &nodes.len())
                .finish(),
            Self::Router { name, routes, .. } => f
                .debug_struct("Router")
                .field("name", name)
                .field("routes", &routes.keys().collect::<Vec<_>>())
                .finish(),
            Self::Branch { name, .. } => {
                f.debug_struct("Branch").field("name", name).finish()
            }
            Self::RepeatWhile {
                name,
                max_iterations,
                ..
            } => f
                .debug_struct("RepeatWhile")
                .field("name", name)
                .field("max_iterations", max_iterations)
                .finish(),
            Self::Transform { name, .. } => {
                f.debug_struct("Transform").field("name", name).finish()
            }
            Self::Guard { name, .. } => f.debug_struct("Guard").field("name", name).finish(),
            Self::HumanApproval { name, prompt } => f
                .debug_struct("HumanApproval")
                .field("name", name)
                .field("prompt", prompt)
                .finish(),
            Self::Interrupt { name, reason } => f
                .debug_struct("Interrupt")
                .field("name", name)
                .field("reason", reason)
                .finish(),
            Self::AgentRun { name, agent } => f
                .debug_struct("AgentRun")
                .field("name", name)
                .field("agent", &agent.name())
                .finish(),
        }
    }
}
