//! Streaming run events.
//!
//! `stream(input)` yields a lazy, finite, non-restartable sequence of
//! these events. They are observation-only: consuming or dropping them
//! never changes the resulting [`AgentResult`].

use std::pin::Pin;

use futures::Stream;

use crate::agent::AgentResult;
use crate::guardrail::GuardrailStage;
use crate::value::Value;

/// Events emitted during a streamed agent run.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum AgentEvent {
    /// The run started.
    Started {
        /// Unique id of this run.
        run_id: String,
    },

    /// A loop iteration began (1-based).
    IterationStarted {
        /// Iteration number.
        iteration: usize,
    },

    /// Incremental output text.
    OutputToken(String),

    /// Model reasoning text, when the provider surfaces it.
    Thinking(String),

    /// A tool call started executing.
    ToolCallStarted {
        /// Call id, when the provider assigned one.
        id: Option<String>,
        /// Tool name.
        name: String,
    },

    /// A partial update for an in-flight tool call.
    ToolCallPartial {
        /// Call id, when present.
        id: Option<String>,
        /// Tool name.
        name: String,
        /// Argument fragment received so far.
        arguments: String,
    },

    /// A tool call finished successfully.
    ToolCallCompleted {
        /// Call id, when present.
        id: Option<String>,
        /// Tool name.
        name: String,
        /// The tool's output.
        output: Value,
    },

    /// A tool call failed.
    ToolCallFailed {
        /// Call id, when present.
        id: Option<String>,
        /// Tool name.
        name: String,
        /// The failure message.
        error: String,
    },

    /// Execution transferred to another agent.
    Handoff {
        /// The delegating agent.
        from: String,
        /// The target agent.
        to: String,
    },

    /// A guardrail tripwire fired.
    GuardrailTriggered {
        /// Name of the guardrail.
        guardrail: String,
        /// The stage it was inspecting.
        stage: GuardrailStage,
    },

    /// A loop iteration finished.
    IterationCompleted {
        /// Iteration number.
        iteration: usize,
    },

    /// The run finished successfully.
    Completed(Box<AgentResult>),

    /// The run failed.
    Failed(String),
}

/// A finite, non-restartable stream of run events.
pub type AgentEventStream = Pin<Box<dyn Stream<Item = AgentEvent> + Send>>;
