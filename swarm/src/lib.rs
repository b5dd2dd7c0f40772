//! Swarm is a multi-agent orchestration framework: tool-using agent
//! loops over pluggable inference providers, composed into workflows —
//! sequences, parallel fan-outs, dependency DAGs, routed branches, and
//! loops — on a checkpointing graph runtime with interruption and
//! resume.
//!
//! # Layers
//!
//! - [`agent`] — the tool-using loop: model calls, approval-gated tool
//!   dispatch, guardrails, handoffs, streaming events.
//! - [`graph`] — the orchestration engine: validated step trees,
//!   channels, checkpoints, single-use resume handles, replay hashing.
//! - [`membrane`] — the prompt planner that keeps strict token budgets
//!   by just-in-time tool loading and content pointerization.
//! - [`resilience`] — retry, circuit breaking, rate limiting, fallback
//!   chains, timeouts.
//! - [`routing`] — routing strategies and the interruption-aware
//!   supervisor.
//!
//! Provider HTTP clients, embedding stores, and persistence backends
//! stay outside this crate; they plug in through the traits in
//! [`provider`], [`memory`], and [`graph`].
//!
//! # Example
//!
//! ```rust,ignore
//! use swarm::prelude::*;
//!
//! let agent = Agent::builder("assistant")
//!     .provider(provider)
//!     .instructions("You are a helpful assistant.")
//!     .tool(search_tool)
//!     .build()?;
//!
//! let result = agent.run("What changed in the last release?").await?;
//! println!("{}", result.output);
//! ```

pub mod agent;
pub mod canonical;
pub mod context;
pub mod error;
pub mod graph;
pub mod guardrail;
pub mod handoff;
pub mod membrane;
pub mod memory;
pub mod message;
pub mod prelude;
pub mod provider;
pub mod resilience;
pub mod routing;
pub mod schema;
pub mod tool;
pub mod usage;
pub mod value;

pub use agent::{Agent, AgentConfiguration, AgentResult};
pub use error::{Error, ErrorKind, Result};
pub use graph::{Step, Workflow, WorkflowEngine, WorkflowOutcome};
pub use value::{ToolCall, ToolResult, Value};
