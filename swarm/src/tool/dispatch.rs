//! Batch dispatch of model-requested tool calls.
//!
//! The dispatcher enforces the approval policy, executes approved calls
//! either serially or under bounded concurrency, and always emits results
//! in the original request order, irrespective of completion order.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::context::RunContext;
use crate::error::{Error, ErrorKind, Result};
use crate::value::{ToolCall, ToolResult};

use super::ToolRegistry;

/// Default bound on concurrent tool executions.
pub const DEFAULT_TOOL_CONCURRENCY: usize = 5;

/// When tool calls require explicit approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalPolicy {
    /// Auto-approve everything.
    Never,
    /// Every call waits for the approval handler.
    Always,
    /// Calls in the set are auto-approved; everything else waits.
    AllowList(BTreeSet<String>),
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self::Never
    }
}

/// The handler's decision for one gated call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    /// Execute the call.
    Approved,
    /// Skip the call; the reason becomes an error-carrying tool result.
    Rejected(String),
}

/// Reviews gated tool calls.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    /// Decide whether `call` may execute.
    async fn review(&self, call: &ToolCall, cx: &RunContext) -> Result<ApprovalDecision>;
}

/// Observation events emitted while a batch executes.
#[derive(Debug, Clone)]
pub enum ToolDispatchEvent {
    /// A call started executing.
    Started {
        /// Position in the request batch.
        index: usize,
        /// The call being executed.
        call: ToolCall,
    },
    /// A call finished.
    Finished {
        /// Position in the request batch.
        index: usize,
        /// Its result (possibly error-carrying).
        result: ToolResult,
    },
}

type EventSink = Arc<dyn Fn(ToolDispatchEvent) + Send + Sync>;

/// Executes batches of tool calls against a registry.
#[derive(Clone)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    policy: ApprovalPolicy,
    handler: Option<Arc<dyn ApprovalHandler>>,
    parallel: bool,
    max_concurrency: usize,
    on_event: Option<EventSink>,
}

impl std::fmt::Debug for ToolDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDispatcher")
            .field("policy", &self.policy)
            .field("parallel", &self.parallel)
            .field("max_concurrency", &self.max_concurrency)
            .finish_non_exhaustive()
    }
}

impl ToolDispatcher {
    /// Create a serial dispatcher with auto-approval.
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            policy: ApprovalPolicy::Never,
            handler: None,
            parallel: false,
            max_concurrency: DEFAULT_TOOL_CONCURRENCY,
            on_event: None,
        }
    }

    /// Set the approval policy.
    #[must_use]
    pub fn with_policy(mut self, policy: ApprovalPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the approval handler consulted for gated calls.
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn ApprovalHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Enable parallel execution bounded by `max_concurrency`.
    #[must_use]
    pub fn parallel(mut self, max_concurrency: usize) -> Self {
        self.parallel = true;
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Attach an observation sink for per-call events.
    #[must_use]
    pub fn with_event_sink(mut self, sink: EventSink) -> Self {
        self.on_event = Some(sink);
        self
    }

    /// Execute a batch of calls.
    ///
    /// The returned vector has one result per requested call, in request
    /// order. Execution failures become error-carrying results; guardrail
    /// tripwires, cancellation, and timeouts propagate as errors.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] when the run is cancelled mid-batch;
    /// [`Error::GuardrailTripwire`] when a tool guardrail trips.
    pub async fn dispatch(&self, calls: &[ToolCall], cx: &RunContext) -> Result<Vec<ToolResult>> {
        if cx.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut slots: Vec<Option<ToolResult>> = vec![None; calls.len()];
        let mut approved: Vec<(usize, ToolCall)> = Vec::with_capacity(calls.len());

        for (index, call) in calls.iter().enumerate() {
            match self.review(call, cx).await? {
                ApprovalDecision::Approved => approved.push((index, call.clone())),
                ApprovalDecision::Rejected(reason) => {
                    warn!(tool = %call.name, %reason, "tool call rejected");
                    slots[index] = Some(ToolResult::error(call, reason));
                }
            }
        }

        if self.parallel && approved.len() > 1 {
            self.dispatch_parallel(approved, &mut slots, cx).await?;
        } else {
            for (index, call) in approved {
                self.emit(ToolDispatchEvent::Started {
                    index,
                    call: call.clone(),
                });
                let result = tokio::select! {
                    r = self.execute_one(&call, cx) => r?,
                    () = cx.cancel.cancelled() => return Err(Error::Cancelled),
                };
                self.emit(ToolDispatchEvent::Finished {
                    index,
                    result: result.clone(),
                });
                slots[index] = Some(result);
            }
        }

        Ok(slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| ToolResult {
                call_id: None,
                name: String::new(),
                output: crate::value::Value::Null,
                error: Some("call was never dispatched".into()),
            }))
            .collect())
    }

    async fn dispatch_parallel(
        &self,
        approved: Vec<(usize, ToolCall)>,
        slots: &mut [Option<ToolResult>],
        cx: &RunContext,
    ) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut set: JoinSet<(usize, Result<ToolResult>)> = JoinSet::new();

        for (index, call) in approved {
            let registry = Arc::clone(&self.registry);
            let semaphore = Arc::clone(&semaphore);
            let cx = cx.clone();
            let sink = self.on_event.clone();
            set.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return (index, Err(Error::Cancelled));
                };
                if let Some(sink) = &sink {
                    sink(ToolDispatchEvent::Started {
                        index,
                        call: call.clone(),
                    });
                }
                let result = execute_call(&registry, &call, &cx).await;
                if let (Some(sink), Ok(result)) = (&sink, &result) {
                    sink(ToolDispatchEvent::Finished {
                        index,
                        result: result.clone(),
                    });
                }
                (index, result)
            });
        }

        loop {
            let joined = tokio::select! {
                joined = set.join_next() => joined,
                () = cx.cancel.cancelled() => {
                    set.abort_all();
                    return Err(Error::Cancelled);
                }
            };
            let Some(joined) = joined else { break };
            match joined {
                Ok((index, Ok(result))) => slots[index] = Some(result),
                Ok((_, Err(e))) => {
                    set.abort_all();
                    return Err(e);
                }
                Err(join_err) if join_err.is_cancelled() => {
                    set.abort_all();
                    return Err(Error::Cancelled);
                }
                Err(join_err) => {
                    set.abort_all();
                    return Err(Error::tool_execution("<task>", join_err.to_string()));
                }
            }
        }
        Ok(())
    }

    async fn execute_one(&self, call: &ToolCall, cx: &RunContext) -> Result<ToolResult> {
        execute_call(&self.registry, call, cx).await
    }

    async fn review(&self, call: &ToolCall, cx: &RunContext) -> Result<ApprovalDecision> {
        let gated = match &self.policy {
            ApprovalPolicy::Never => false,
            ApprovalPolicy::Always => true,
            ApprovalPolicy::AllowList(allowed) => !allowed.contains(&call.name),
        };
        if !gated {
            return Ok(ApprovalDecision::Approved);
        }
        match &self.handler {
            Some(handler) => handler.review(call, cx).await,
            None => Ok(ApprovalDecision::Rejected(
                "no approval handler configured".into(),
            )),
        }
    }

    fn emit(&self, event: ToolDispatchEvent) {
        if let Some(sink) = &self.on_event {
            sink(event);
        }
    }
}

/// Execute one call, folding tool failures into error-carrying results.
///
/// Guardrail tripwires, cancellation, and timeouts stay errors so the loop
/// can terminate; everything else becomes a `ToolResult` with `error` set.
async fn execute_call(
    registry: &ToolRegistry,
    call: &ToolCall,
    cx: &RunContext,
) -> Result<ToolResult> {
    debug!(tool = %call.name, "dispatching tool call");
    match registry.invoke(&call.name, &call.arguments, cx).await {
        Ok(output) => Ok(ToolResult::ok(call, output)),
        Err(e) => match e.kind() {
            ErrorKind::GuardrailTripwire | ErrorKind::Cancelled | ErrorKind::Timeout => Err(e),
            _ => Ok(ToolResult::error(call, e.to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ParameterType, ToolParameter, ToolSchema};
    use crate::tool::{FnTool, Tool};
    use crate::value::{JsonMap, Value};
    use std::time::Duration;

    struct SleepyTool {
        name: String,
        delay: Duration,
    }

    #[async_trait]
    impl Tool for SleepyTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema::new(&self.name, "Sleeps then returns its name.")
        }

        async fn invoke(&self, _args: &JsonMap<String, Value>, _cx: &RunContext) -> Result<Value> {
            tokio::time::sleep(self.delay).await;
            Ok(Value::String(self.name.clone()))
        }
    }

    fn registry_with_sleepers() -> Arc<ToolRegistry> {
        let registry = Arc::new(ToolRegistry::new());
        // "slow" completes last but was requested first.
        for (name, millis) in [("slow", 40u64), ("medium", 20), ("fast", 1)] {
            registry
                .register(Arc::new(SleepyTool {
                    name: name.into(),
                    delay: Duration::from_millis(millis),
                }))
                .expect("unique");
        }
        registry
    }

    fn call(name: &str) -> ToolCall {
        ToolCall::new(name, JsonMap::new()).with_id(format!("id-{name}"))
    }

    #[tokio::test]
    async fn parallel_results_preserve_request_order() {
        let dispatcher = ToolDispatcher::new(registry_with_sleepers()).parallel(3);
        let cx = RunContext::new("t");
        let calls = vec![call("slow"), call("medium"), call("fast")];
        let results = dispatcher.dispatch(&calls, &cx).await.expect("all succeed");
        let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["slow", "medium", "fast"]);
        assert_eq!(results[0].call_id.as_deref(), Some("id-slow"));
    }

    #[tokio::test]
    async fn serial_dispatch_runs_in_order() {
        let dispatcher = ToolDispatcher::new(registry_with_sleepers());
        let cx = RunContext::new("t");
        let calls = vec![call("fast"), call("slow")];
        let results = dispatcher.dispatch(&calls, &cx).await.expect("ok");
        assert_eq!(results[0].name, "fast");
        assert_eq!(results[1].name, "slow");
    }

    #[tokio::test]
    async fn tool_failure_becomes_error_result() {
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(Arc::new(FnTool::new(
                ToolSchema::new("broken", "Always fails."),
                |_| Err(Error::generation("backend down")),
            )))
            .expect("register");
        let dispatcher = ToolDispatcher::new(registry);
        let cx = RunContext::new("t");
        let results = dispatcher
            .dispatch(&[call("broken")], &cx)
            .await
            .expect("failure folds into result");
        assert!(results[0].is_error());
    }

    struct RejectAll;

    #[async_trait]
    impl ApprovalHandler for RejectAll {
        async fn review(&self, _call: &ToolCall, _cx: &RunContext) -> Result<ApprovalDecision> {
            Ok(ApprovalDecision::Rejected("operator said no".into()))
        }
    }

    #[tokio::test]
    async fn always_policy_routes_through_handler() {
        let dispatcher = ToolDispatcher::new(registry_with_sleepers())
            .with_policy(ApprovalPolicy::Always)
            .with_handler(Arc::new(RejectAll));
        let cx = RunContext::new("t");
        let results = dispatcher
            .dispatch(&[call("fast")], &cx)
            .await
            .expect("rejection is a result, not an error");
        assert!(results[0].is_error());
        assert!(results[0].error.as_deref().unwrap_or("").contains("operator"));
    }

    #[tokio::test]
    async fn allow_list_skips_handler_for_listed_tools() {
        let allowed: BTreeSet<String> = ["fast".to_owned()].into();
        let dispatcher = ToolDispatcher::new(registry_with_sleepers())
            .with_policy(ApprovalPolicy::AllowList(allowed))
            .with_handler(Arc::new(RejectAll));
        let cx = RunContext::new("t");
        let results = dispatcher
            .dispatch(&[call("fast"), call("slow")], &cx)
            .await
            .expect("mixed outcome");
        assert!(!results[0].is_error());
        assert!(results[1].is_error());
    }

    #[tokio::test]
    async fn cancellation_surfaces_cancelled() {
        let dispatcher = ToolDispatcher::new(registry_with_sleepers()).parallel(2);
        let cx = RunContext::new("t");
        cx.cancel.cancel();
        let err = dispatcher
            .dispatch(&[call("slow")], &cx)
            .await
            .expect_err("pre-cancelled");
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn missing_handler_rejects_gated_calls() {
        let dispatcher =
            ToolDispatcher::new(registry_with_sleepers()).with_policy(ApprovalPolicy::Always);
        let cx = RunContext::new("t");
        let results = dispatcher.dispatch(&[call("fast")], &cx).await.expect("ok");
        assert!(results[0].is_error());
    }
}
