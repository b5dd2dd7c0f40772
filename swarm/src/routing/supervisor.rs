//! The interruption-aware supervisor.
//!
//! A supervisor routes an input to one of its sub-agents. When the
//! selected agent reports itself interrupted (paused on a workflow
//! interrupt), the configured [`InterruptionPolicy`] decides whether to
//! wait, fall back, or race the fallback against recovery.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{debug, warn};

use crate::agent::{Agent, AgentResult, metadata};
use crate::error::{Error, Result};

use super::RoutingStrategy;

/// What to do when the routed-to agent is interrupted or unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptionPolicy {
    /// Propagate the interruption upward; no fallback.
    Never,
    /// Execute the fallback agent immediately.
    Fallback,
    /// Poll the agent every `poll_interval` up to `timeout`, then fall
    /// back if it is still interrupted.
    TimeoutThenFallback {
        /// How long to keep polling.
        timeout: Duration,
        /// Delay between polls.
        poll_interval: Duration,
    },
    /// Start the fallback concurrently; the first successful completion
    /// wins. Past `timeout`, prefer the fallback.
    ParallelRace {
        /// How long to wait for the primary to recover.
        timeout: Duration,
        /// Delay between recovery polls.
        poll_interval: Duration,
    },
}

/// Routes inputs to named sub-agents with interruption handling.
pub struct Supervisor {
    strategy: Arc<dyn RoutingStrategy>,
    routes: BTreeMap<String, Agent>,
    fallback: Option<Agent>,
    policy: InterruptionPolicy,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("routes", &self.routes.keys().collect::<Vec<_>>())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Create a supervisor over `strategy`.
    #[must_use]
    pub fn new(strategy: Arc<dyn RoutingStrategy>) -> Self {
        Self {
            strategy,
            routes: BTreeMap::new(),
            fallback: None,
            policy: InterruptionPolicy::Never,
        }
    }

    /// Register a route.
    #[must_use]
    pub fn route(mut self, name: impl Into<String>, agent: Agent) -> Self {
        self.routes.insert(name.into(), agent);
        self
    }

    /// Set the fallback agent.
    #[must_use]
    pub fn fallback(mut self, agent: Agent) -> Self {
        self.fallback = Some(agent);
        self
    }

    /// Set the interruption policy.
    #[must_use]
    pub const fn policy(mut self, policy: InterruptionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Route `input` and run the selected agent under the policy.
    ///
    /// # Errors
    ///
    /// Routing failures, the selected agent's own errors, or
    /// [`Error::WorkflowInterrupted`] when the policy forbids falling
    /// back from an interrupted agent.
    pub async fn run(&self, input: &str) -> Result<AgentResult> {
        let names: Vec<String> = self.routes.keys().cloned().collect();
        let decision = self.strategy.route(input, &names).await?;
        debug!(route = %decision.selected, "supervisor routed");

        let Some(primary) = self.routes.get(&decision.selected) else {
            warn!(route = %decision.selected, "selected route has no agent");
            if matches!(self.policy, InterruptionPolicy::Never) {
                return Err(Error::generation(format!(
                    "route '{}' has no agent",
                    decision.selected
                )));
            }
            return self.run_fallback(input, "selected route is unavailable").await;
        };

        if !primary.is_interrupted() {
            return Self::finish(primary.run(input).await?, &decision.selected);
        }

        match self.policy {
            InterruptionPolicy::Never => Err(Error::WorkflowInterrupted {
                reason: format!("agent '{}' is interrupted", decision.selected),
            }),
            InterruptionPolicy::Fallback => {
                self.run_fallback(input, "primary interrupted").await
            }
            InterruptionPolicy::TimeoutThenFallback {
                timeout,
                poll_interval,
            } => {
                let deadline = Instant::now() + timeout;
                while Instant::now() < deadline {
                    if !primary.is_interrupted() {
                        return Self::finish(primary.run(input).await?, &decision.selected);
                    }
                    tokio::time::sleep(poll_interval).await;
                }
                self.run_fallback(input, "primary stayed interrupted past the timeout")
                    .await
            }
            InterruptionPolicy::ParallelRace {
                timeout,
                poll_interval,
            } => {
                self.race(input, primary, &decision.selected, timeout, poll_interval)
                    .await
            }
        }
    }

    async fn race(
        &self,
        input: &str,
        primary: &Agent,
        selected: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<AgentResult> {
        let Some(fallback) = &self.fallback else {
            // Nothing to race against; degrade to waiting.
            let deadline = Instant::now() + timeout;
            while Instant::now() < deadline {
                if !primary.is_interrupted() {
                    return Self::finish(primary.run(input).await?, selected);
                }
                tokio::time::sleep(poll_interval).await;
            }
            return Err(Error::WorkflowInterrupted {
                reason: format!("agent '{selected}' stayed interrupted and no fallback is configured"),
            });
        };

        let fallback_agent = fallback.clone();
        let fallback_input = input.to_owned();
        let mut fallback_task =
            tokio::spawn(async move { fallback_agent.run(fallback_input).await });

        let deadline = Instant::now() + timeout;
        let primary_result = loop {
            if Instant::now() >= deadline {
                break None;
            }
            if !primary.is_interrupted() {
                break Some(primary.run(input).await);
            }
            tokio::select! {
                joined = &mut fallback_task => {
                    // Fallback finished first while the primary was still
                    // interrupted; it wins.
                    return Self::finish(flatten_join(joined)?, "fallback");
                }
                () = tokio::time::sleep(poll_interval) => {}
            }
        };

        match primary_result {
            Some(Ok(result)) => {
                fallback_task.abort();
                Self::finish(result, selected)
            }
            // Past the timeout, or the recovered primary failed: the
            // fallback's outcome decides.
            Some(Err(_)) | None => Self::finish(flatten_join(fallback_task.await)?, "fallback"),
        }
    }

    async fn run_fallback(&self, input: &str, reason: &str) -> Result<AgentResult> {
        match &self.fallback {
            Some(fallback) => {
                debug!(%reason, "supervisor falling back");
                Self::finish(fallback.run(input).await?, "fallback")
            }
            None => Err(Error::WorkflowInterrupted {
                reason: format!("{reason} and no fallback is configured"),
            }),
        }
    }

    fn finish(mut result: AgentResult, decision: &str) -> Result<AgentResult> {
        result
            .metadata
            .insert(metadata::ROUTING_DECISION.into(), json!(decision));
        Ok(result)
    }
}

fn flatten_join(
    joined: std::result::Result<Result<AgentResult>, tokio::task::JoinError>,
) -> Result<AgentResult> {
    match joined {
        Ok(result) => result,
        Err(join_err) if join_err.is_cancelled() => Err(Error::Cancelled),
        Err(join_err) => Err(Error::generation(join_err.to_string())),
    }
}
