//! Agent configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::provider::{InferenceOptions, ToolChoice};

/// Default iteration budget for the tool-using loop.
pub const DEFAULT_MAX_ITERATIONS: usize = 10;
/// Default bound on concurrent tool calls.
pub const DEFAULT_TOOL_CONCURRENCY: usize = 5;

/// Model sampling settings.
///
/// This is the single authoritative temperature layer; the run loop
/// copies it into [`InferenceOptions`] for every call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Maximum tokens per response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Nucleus sampling parameter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Stop sequences.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
    /// Sampling seed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Tool selection constraint.
    #[serde(default)]
    pub tool_choice: ToolChoice,
}

/// Named bag of knobs for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfiguration {
    /// Agent name, used for handoff resolution and routing.
    pub name: String,
    /// Iteration budget for the tool-using loop.
    pub max_iterations: usize,
    /// Wall-clock bound on a single `run`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Model sampling settings.
    #[serde(default)]
    pub model: ModelSettings,
    /// Whether runs should stream events by default.
    #[serde(default)]
    pub streaming: bool,
    /// Terminate the run when any tool call fails.
    #[serde(default)]
    pub stop_on_tool_error: bool,
    /// Dispatch batched tool calls concurrently.
    #[serde(default)]
    pub parallel_tool_calls: bool,
    /// Bound on concurrent tool calls when parallel dispatch is on.
    pub tool_concurrency: usize,
    /// Retain only this many session messages when building prompts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_limit: Option<usize>,
}

impl AgentConfiguration {
    /// Create a configuration with defaults.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            timeout: None,
            model: ModelSettings::default(),
            streaming: false,
            stop_on_tool_error: false,
            parallel_tool_calls: false,
            tool_concurrency: DEFAULT_TOOL_CONCURRENCY,
            history_limit: None,
        }
    }

    /// Reject negative or contradictory values.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] describing the first violation found.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::configuration("agent name must not be empty"));
        }
        if let Some(t) = self.model.temperature {
            if !t.is_finite() || !(0.0..=2.0).contains(&t) {
                return Err(Error::configuration(format!(
                    "temperature {t} outside [0, 2]"
                )));
            }
        }
        if let Some(p) = self.model.top_p {
            if !p.is_finite() || !(0.0..=1.0).contains(&p) || p == 0.0 {
                return Err(Error::configuration(format!("top_p {p} outside (0, 1]")));
            }
        }
        if let Some(max_tokens) = self.model.max_tokens {
            if max_tokens == 0 {
                return Err(Error::configuration("max_tokens must be positive"));
            }
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::configuration("timeout must be positive"));
        }
        if self.tool_concurrency == 0 {
            return Err(Error::configuration(
                "tool_concurrency must be at least 1",
            ));
        }
        if self.history_limit == Some(0) {
            return Err(Error::configuration(
                "history_limit of 0 contradicts keeping a session",
            ));
        }
        Ok(())
    }

    /// Render these settings as per-call inference options.
    #[must_use]
    pub fn inference_options(&self) -> InferenceOptions {
        InferenceOptions {
            temperature: self.model.temperature,
            max_tokens: self.model.max_tokens,
            top_p: self.model.top_p,
            stop_sequences: self.model.stop_sequences.clone(),
            tool_choice: self.model.tool_choice.clone(),
            seed: self.model.seed,
            parallel_tool_calls: self.parallel_tool_calls,
            ..InferenceOptions::default()
        }
    }
}
