//! Guardrails: validation checks around agent inputs, outputs, and tools.
//!
//! A guardrail inspects one subject and returns a [`GuardrailVerdict`].
//! `Failed` is a soft finding — recorded and logged, never fatal.
//! `Tripwire` halts the run immediately with a typed
//! [`Error::GuardrailTripwire`]; tripwires are never recovered locally.
//!
//! The [`GuardrailRunner`] executes a list in declaration order, or
//! concurrently when configured, and by default stops on the first
//! tripwire.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::value::{ToolCall, ToolResult, Value};

/// Which phase of execution a guardrail inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailStage {
    /// User input, before the first model call.
    Input,
    /// The agent's final output.
    Output,
    /// Tool arguments, before execution.
    ToolInput,
    /// Tool results, after execution.
    ToolOutput,
}

impl std::fmt::Display for GuardrailStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
            Self::ToolInput => write!(f, "tool input"),
            Self::ToolOutput => write!(f, "tool output"),
        }
    }
}

/// What a guardrail is looking at.
#[derive(Debug, Clone)]
pub enum GuardrailSubject {
    /// Input or output text.
    Text(String),
    /// A tool call about to execute.
    Call(ToolCall),
    /// A tool result that just arrived.
    Output(ToolResult),
}

impl GuardrailSubject {
    /// The subject as text, when it is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// The outcome of one guardrail check.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardrailVerdict {
    /// The subject passed.
    Passed,
    /// A soft failure: recorded, not fatal.
    Failed(String),
    /// A terminal violation. The run halts with a typed error.
    Tripwire {
        /// Why the tripwire fired.
        message: String,
        /// Optional structured diagnostics.
        info: Option<Value>,
    },
}

impl GuardrailVerdict {
    /// A tripwire verdict with no structured info.
    #[must_use]
    pub fn tripwire(message: impl Into<String>) -> Self {
        Self::Tripwire {
            message: message.into(),
            info: None,
        }
    }
}

/// A single validation check.
#[async_trait]
pub trait Guardrail: Send + Sync {
    /// Name used in errors and events.
    fn name(&self) -> &str;

    /// Which phase this guardrail belongs to.
    fn stage(&self) -> GuardrailStage;

    /// Inspect the subject.
    async fn check(&self, subject: &GuardrailSubject, cx: &RunContext) -> Result<GuardrailVerdict>;
}

/// A guardrail built from a closure, for tests and simple checks.
pub struct FnGuardrail<F> {
    name: String,
    stage: GuardrailStage,
    check: F,
}

impl<F> FnGuardrail<F>
where
    F: Fn(&GuardrailSubject) -> GuardrailVerdict + Send + Sync,
{
    /// Wrap a synchronous check function.
    pub fn new(name: impl Into<String>, stage: GuardrailStage, check: F) -> Self {
        Self {
            name: name.into(),
            stage,
            check,
        }
    }
}

impl<F> std::fmt::Debug for FnGuardrail<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnGuardrail")
            .field("name", &self.name)
            .field("stage", &self.stage)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> Guardrail for FnGuardrail<F>
where
    F: Fn(&GuardrailSubject) -> GuardrailVerdict + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn stage(&self) -> GuardrailStage {
        self.stage
    }

    async fn check(&self, subject: &GuardrailSubject, _cx: &RunContext) -> Result<GuardrailVerdict> {
        Ok((self.check)(subject))
    }
}

/// A soft finding recorded by a non-tripwire failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardrailFinding {
    /// Name of the guardrail that failed.
    pub guardrail: String,
    /// The failure message.
    pub message: String,
}

/// Executes an ordered list of guardrails for one stage.
#[derive(Clone, Default)]
pub struct GuardrailRunner {
    guardrails: Vec<Arc<dyn Guardrail>>,
    concurrent: bool,
}

impl std::fmt::Debug for GuardrailRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardrailRunner")
            .field("count", &self.guardrails.len())
            .field("concurrent", &self.concurrent)
            .finish()
    }
}

impl GuardrailRunner {
    /// Create an empty runner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a guardrail. Declaration order is execution order.
    pub fn push(&mut self, guardrail: Arc<dyn Guardrail>) {
        self.guardrails.push(guardrail);
    }

    /// Run all guardrails of one stage concurrently instead of in order.
    ///
    /// Tripwire precedence still follows declaration order: when several
    /// trip in the same batch, the first-declared one wins.
    #[must_use]
    pub fn concurrent(mut self) -> Self {
        self.concurrent = true;
        self
    }

    /// Whether any guardrail is registered for `stage`.
    #[must_use]
    pub fn has_stage(&self, stage: GuardrailStage) -> bool {
        self.guardrails.iter().any(|g| g.stage() == stage)
    }

    /// Run every guardrail registered for `stage` against `subject`.
    ///
    /// Returns the soft findings. Stops at (and returns) the first
    /// tripwire as [`Error::GuardrailTripwire`].
    ///
    /// # Errors
    ///
    /// [`Error::GuardrailTripwire`] on a tripwire; guardrail-internal
    /// errors propagate unchanged.
    pub async fn run(
        &self,
        stage: GuardrailStage,
        subject: &GuardrailSubject,
        cx: &RunContext,
    ) -> Result<Vec<GuardrailFinding>> {
        let staged: Vec<&Arc<dyn Guardrail>> = self
            .guardrails
            .iter()
            .filter(|g| g.stage() == stage)
            .collect();
        if staged.is_empty() {
            return Ok(Vec::new());
        }

        let verdicts: Vec<(String, GuardrailVerdict)> = if self.concurrent {
            let futures = staged.iter().map(|g| async {
                let verdict = g.check(subject, cx).await?;
                Ok::<_, Error>((g.name().to_owned(), verdict))
            });
            join_all(futures).await.into_iter().collect::<Result<_>>()?
        } else {
            let mut collected = Vec::with_capacity(staged.len());
            for g in &staged {
                let verdict = g.check(subject, cx).await?;
                let tripped = matches!(verdict, GuardrailVerdict::Tripwire { .. });
                collected.push((g.name().to_owned(), verdict));
                if tripped {
                    break;
                }
            }
            collected
        };

        let mut findings = Vec::new();
        for (name, verdict) in verdicts {
            match verdict {
                GuardrailVerdict::Passed => {}
                GuardrailVerdict::Failed(message) => {
                    warn!(guardrail = %name, %stage, %message, "guardrail failed");
                    findings.push(GuardrailFinding {
                        guardrail: name,
                        message,
                    });
                }
                GuardrailVerdict::Tripwire { message, info } => {
                    return Err(Error::GuardrailTripwire {
                        guardrail: name,
                        stage,
                        message,
                        info,
                    });
                }
            }
        }
        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn text_guardrail(
        name: &str,
        stage: GuardrailStage,
        verdict: GuardrailVerdict,
    ) -> Arc<dyn Guardrail> {
        let v = verdict;
        Arc::new(FnGuardrail::new(name, stage, move |_| v.clone()))
    }

    #[tokio::test]
    async fn passes_collect_no_findings() {
        let mut runner = GuardrailRunner::new();
        runner.push(text_guardrail(
            "clean",
            GuardrailStage::Input,
            GuardrailVerdict::Passed,
        ));
        let cx = RunContext::new("t");
        let findings = runner
            .run(GuardrailStage::Input, &GuardrailSubject::Text("ok".into()), &cx)
            .await
            .expect("no tripwire");
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn soft_failures_are_recorded_not_fatal() {
        let mut runner = GuardrailRunner::new();
        runner.push(text_guardrail(
            "style",
            GuardrailStage::Output,
            GuardrailVerdict::Failed("too informal".into()),
        ));
        let cx = RunContext::new("t");
        let findings = runner
            .run(GuardrailStage::Output, &GuardrailSubject::Text("yo".into()), &cx)
            .await
            .expect("soft failure is not an error");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].guardrail, "style");
    }

    #[tokio::test]
    async fn first_tripwire_short_circuits() {
        let mut runner = GuardrailRunner::new();
        runner.push(text_guardrail(
            "pii",
            GuardrailStage::Input,
            GuardrailVerdict::tripwire("found an SSN"),
        ));
        runner.push(text_guardrail(
            "never-reached",
            GuardrailStage::Input,
            GuardrailVerdict::tripwire("should not run"),
        ));
        let cx = RunContext::new("t");
        let err = runner
            .run(GuardrailStage::Input, &GuardrailSubject::Text("x".into()), &cx)
            .await
            .expect_err("tripwire is terminal");
        assert_eq!(err.kind(), ErrorKind::GuardrailTripwire);
        assert!(err.to_string().contains("pii"));
    }

    #[tokio::test]
    async fn stages_are_isolated() {
        let mut runner = GuardrailRunner::new();
        runner.push(text_guardrail(
            "output-only",
            GuardrailStage::Output,
            GuardrailVerdict::tripwire("nope"),
        ));
        let cx = RunContext::new("t");
        // An input-stage run never sees the output guardrail.
        let findings = runner
            .run(GuardrailStage::Input, &GuardrailSubject::Text("x".into()), &cx)
            .await
            .expect("nothing registered for input");
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn concurrent_mode_prefers_first_declared_tripwire() {
        let mut runner = GuardrailRunner::new();
        runner.push(text_guardrail(
            "first",
            GuardrailStage::Input,
            GuardrailVerdict::tripwire("first wins"),
        ));
        runner.push(text_guardrail(
            "second",
            GuardrailStage::Input,
            GuardrailVerdict::tripwire("second"),
        ));
        let runner = runner.concurrent();
        let cx = RunContext::new("t");
        let err = runner
            .run(GuardrailStage::Input, &GuardrailSubject::Text("x".into()), &cx)
            .await
            .expect_err("tripwire");
        assert!(err.to_string().contains("first"));
    }
}
