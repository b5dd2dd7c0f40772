//! Handoffs: synthetic tools that transfer execution between agents.
//!
//! A handoff declaration is injected into the model's tool catalog as an
//! additional tool. When the model chooses it, the agent loop intercepts
//! the call instead of executing a registry tool: the target agent runs
//! with the (optionally filtered) input, and its output either becomes
//! the current agent's final output, or — in nested mode — a tool result
//! the loop continues with.

use std::sync::Arc;

use crate::agent::Agent;
use crate::schema::{ParameterType, ToolParameter, ToolSchema};

/// Rewrites the input handed to the target agent.
pub type InputFilter = Arc<dyn Fn(&str) -> String + Send + Sync>;
/// Observes a handoff at the moment of interception.
pub type HandoffObserver = Arc<dyn Fn(&str) + Send + Sync>;
/// Gates a handoff's availability per turn.
pub type EnabledPredicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// A declared transfer of execution to a target agent.
#[derive(Clone)]
pub struct Handoff {
    target: Agent,
    tool_name: Option<String>,
    description: Option<String>,
    input_filter: Option<InputFilter>,
    is_enabled: Option<EnabledPredicate>,
    on_handoff: Option<HandoffObserver>,
    nested: bool,
}

impl std::fmt::Debug for Handoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handoff")
            .field("target", &self.target.name())
            .field("tool_name", &self.effective_tool_name())
            .field("nested", &self.nested)
            .finish_non_exhaustive()
    }
}

impl Handoff {
    /// Declare a handoff to `target`.
    #[must_use]
    pub fn to(target: Agent) -> Self {
        Self {
            target,
            tool_name: None,
            description: None,
            input_filter: None,
            is_enabled: None,
            on_handoff: None,
            nested: false,
        }
    }

    /// Override the synthetic tool name.
    #[must_use]
    pub fn with_tool_name(mut self, name: impl Into<String>) -> Self {
        self.tool_name = Some(name.into());
        self
    }

    /// Override the synthetic tool description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Rewrite the input before the target runs.
    #[must_use]
    pub fn with_input_filter(mut self, filter: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.input_filter = Some(Arc::new(filter));
        self
    }

    /// Gate availability per turn.
    #[must_use]
    pub fn with_enabled(mut self, predicate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.is_enabled = Some(Arc::new(predicate));
        self
    }

    /// Observe the handoff at interception time.
    #[must_use]
    pub fn with_on_handoff(mut self, observer: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_handoff = Some(Arc::new(observer));
        self
    }

    /// Continue the loop with the target's output as a tool result
    /// instead of finishing with it.
    #[must_use]
    pub const fn nested(mut self) -> Self {
        self.nested = true;
        self
    }

    /// The target agent.
    #[must_use]
    pub const fn target(&self) -> &Agent {
        &self.target
    }

    /// Whether the loop should continue after the handoff.
    #[must_use]
    pub const fn is_nested(&self) -> bool {
        self.nested
    }

    /// Whether this handoff is currently available.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.is_enabled.as_ref().is_none_or(|p| p())
    }

    /// The synthetic tool name: the override, or
    /// `handoff_to_<snake_case(target name)>`.
    #[must_use]
    pub fn effective_tool_name(&self) -> String {
        self.tool_name
            .clone()
            .unwrap_or_else(|| format!("handoff_to_{}", snake_case(self.target.name())))
    }

    /// The synthetic tool schema injected into the model's catalog.
    #[must_use]
    pub fn schema(&self) -> ToolSchema {
        let description = self.description.clone().unwrap_or_else(|| {
            format!(
                "Transfer the conversation to the '{}' agent.",
                self.target.name()
            )
        });
        ToolSchema::new(self.effective_tool_name(), description).parameter(
            ToolParameter::required(
                "input",
                "The input to hand to the target agent",
                ParameterType::String,
            ),
        )
    }

    /// Apply the input filter, when one is configured.
    #[must_use]
    pub fn filter_input(&self, input: &str) -> String {
        match &self.input_filter {
            Some(filter) => filter(input),
            None => input.to_owned(),
        }
    }

    /// Notify the observer, when one is configured.
    pub fn notify(&self, input: &str) {
        if let Some(observer) = &self.on_handoff {
            observer(input);
        }
    }
}

/// Resolve the handoff configuration that governs `target`.
///
/// Priority: runtime (pointer) identity, then configured agent name.
/// Ambiguity yields the first by declaration order.
#[must_use]
pub fn resolve<'a>(handoffs: &'a [Handoff], target: &Agent) -> Option<&'a Handoff> {
    handoffs
        .iter()
        .find(|h| h.target.ptr_eq(target))
        .or_else(|| handoffs.iter().find(|h| h.target.name() == target.name()))
}

pub(crate) fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for ch in name.chars() {
        if ch.is_whitespace() || ch == '-' || ch == '.' {
            if !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
        } else if ch.is_uppercase() {
            if prev_lower && !out.ends_with('_') {
                out.push('_');
            }
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
            prev_lower = false;
        } else {
            out.push(ch);
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        }
    }
    out.trim_matches('_').to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::provider::MockProvider;
    use std::sync::Arc as StdArc;

    fn agent(name: &str) -> Agent {
        Agent::builder(name)
            .provider(StdArc::new(MockProvider::new()))
            .build()
            .expect("valid agent")
    }

    #[test]
    fn snake_case_handles_common_names() {
        assert_eq!(snake_case("Billing Agent"), "billing_agent");
        assert_eq!(snake_case("TriageBot"), "triage_bot");
        assert_eq!(snake_case("support"), "support");
        assert_eq!(snake_case("v2-Escalation"), "v2_escalation");
    }

    #[test]
    fn default_tool_name_derives_from_target() {
        let handoff = Handoff::to(agent("Billing Agent"));
        assert_eq!(handoff.effective_tool_name(), "handoff_to_billing_agent");
        let schema = handoff.schema();
        assert!(schema.description.contains("Billing Agent"));
        assert_eq!(schema.parameters[0].name, "input");
    }

    #[test]
    fn overrides_take_precedence() {
        let handoff = Handoff::to(agent("billing"))
            .with_tool_name("escalate")
            .with_description("Escalate to billing.");
        assert_eq!(handoff.effective_tool_name(), "escalate");
        assert_eq!(handoff.schema().description, "Escalate to billing.");
    }

    #[test]
    fn resolution_prefers_pointer_identity() {
        let shared = agent("twin");
        let other_with_same_name = agent("twin");
        let handoffs = vec![
            Handoff::to(other_with_same_name).with_tool_name("by_name"),
            Handoff::to(shared.clone()).with_tool_name("by_identity"),
        ];
        let resolved = resolve(&handoffs, &shared).expect("resolvable");
        assert_eq!(resolved.effective_tool_name(), "by_identity");
    }

    #[test]
    fn resolution_falls_back_to_name_then_declaration_order() {
        let a = agent("twin");
        let b = agent("twin");
        let handoffs = vec![
            Handoff::to(a).with_tool_name("first"),
            Handoff::to(b).with_tool_name("second"),
        ];
        // A third, distinct agent with the same configured name matches
        // the first declaration.
        let probe = agent("twin");
        let resolved = resolve(&handoffs, &probe).expect("name match");
        assert_eq!(resolved.effective_tool_name(), "first");
    }

    #[test]
    fn disabled_handoffs_report_unavailable() {
        let handoff = Handoff::to(agent("late")).with_enabled(|| false);
        assert!(!handoff.enabled());
    }

    #[test]
    fn input_filter_rewrites() {
        let handoff =
            Handoff::to(agent("t")).with_input_filter(|input| format!("filtered: {input}"));
        assert_eq!(handoff.filter_input("x"), "filtered: x");
    }
}
