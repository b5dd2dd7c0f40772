//! End-to-end agent loop scenarios: membrane budgets, fallbacks,
//! supervision, ordering, and cancellation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use swarm::agent::metadata;
use swarm::membrane::{MEMBRANE_TOOL_NAMES, PlanRequest, PromptPlan, PromptPlanner};
use swarm::memory::{BufferMemory, Memory};
use swarm::message::MemoryMessage;
use swarm::prelude::*;
use swarm::routing::FixedRouter;
use swarm::schema::{ParameterType, ToolParameter};
use swarm::tool::FnTool;
use swarm::value::JsonMap;

fn named_tool(name: &str) -> Arc<dyn Tool> {
    let schema = ToolSchema::new(name, format!("Tool {name}.")).parameter(
        ToolParameter::optional("input", "Free-form input", ParameterType::String),
    );
    let name = name.to_owned();
    Arc::new(FnTool::new(schema, move |_| Ok(json!(format!("{name}-ran")))))
}

#[tokio::test]
async fn strict_budget_membrane_narrows_the_catalog() {
    let memory = Arc::new(BufferMemory::new());
    for i in 0..40 {
        memory
            .append(MemoryMessage::user(format!(
                "turn {i}: {}",
                "context filler ".repeat(120)
            )))
            .await
            .expect("append");
    }

    let provider = Arc::new(MockProvider::new().then_text("planned reply"));
    let membrane = ContextMembrane::new(MembraneConfig::strict_4k());

    let mut builder = Agent::builder("budgeted")
        .provider(Arc::clone(&provider) as Arc<dyn InferenceProvider>)
        .instructions("Answer briefly.")
        .memory(memory)
        .planner(Arc::new(membrane));
    for i in 0..30 {
        builder = builder.tool(named_tool(&format!("tool_{i:02}")));
    }
    let agent = builder.build().expect("valid");

    let result = agent.run("what is the status?").await.expect("completes");
    assert_eq!(result.output, "planned reply");

    let recorded = provider.recorded();
    assert_eq!(recorded.len(), 1);
    let call = &recorded[0];

    // The brute-truncation marker must never appear.
    assert!(!call.prompt.contains("[... context truncated for strict4k budget ...]"));

    // Fewer than the full 30 tools, sorted, with the membrane's four
    // internal tools present.
    assert!(call.tool_names.len() < 30, "got {}", call.tool_names.len());
    let mut sorted = call.tool_names.clone();
    sorted.sort();
    assert_eq!(call.tool_names, sorted, "tool list must be sorted by name");
    for name in MEMBRANE_TOOL_NAMES {
        assert!(
            call.tool_names.iter().any(|n| n == name),
            "missing membrane tool {name}"
        );
    }
    let unique: std::collections::BTreeSet<&String> = call.tool_names.iter().collect();
    assert_eq!(unique.len(), call.tool_names.len(), "names must be unique");
}

#[tokio::test]
async fn membrane_planner_failure_uses_fallback_path() {
    struct ExplodingPlanner;
    impl PromptPlanner for ExplodingPlanner {
        fn plan(&self, _request: &PlanRequest<'_>) -> swarm::Result<PromptPlan> {
            Err(Error::generation("budget solver diverged"))
        }
    }

    let provider = Arc::new(MockProvider::new().then_text("still fine"));
    let agent = Agent::builder("resilient")
        .provider(provider)
        .planner(Arc::new(ExplodingPlanner))
        .build()
        .expect("valid");

    let result = agent.run("hello").await.expect("run must not crash");
    assert_eq!(result.output, "still fine");
    assert_eq!(
        result.metadata_value(metadata::MEMBRANE_FALLBACK_USED),
        Some(&json!(true))
    );
    let error_text = result
        .metadata_value(metadata::MEMBRANE_FALLBACK_ERROR)
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();
    assert!(error_text.contains("budget solver diverged"));
}

#[tokio::test]
async fn supervisor_falls_back_from_interrupted_subagent() {
    let primary = Agent::builder("primary")
        .provider(Arc::new(MockProvider::new().then_text("primary-output")))
        .build()
        .expect("valid");
    primary.set_interrupted(true);

    let fallback = Agent::builder("backup")
        .provider(Arc::new(MockProvider::new().then_text("fallback-output")))
        .build()
        .expect("valid");

    let supervisor = Supervisor::new(Arc::new(FixedRouter("primary".into())))
        .route("primary", primary)
        .fallback(fallback)
        .policy(InterruptionPolicy::Fallback);

    let result = supervisor.run("anything").await.expect("fallback runs");
    assert_eq!(result.output, "fallback-output");
    assert_eq!(
        result.metadata.get(metadata::ROUTING_DECISION),
        Some(&json!("fallback"))
    );
}

struct SleepTool {
    name: String,
    delay: Duration,
}

#[async_trait]
impl Tool for SleepTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(&self.name, "Sleeps, then reports its own name.")
    }

    async fn invoke(&self, _args: &JsonMap<String, Value>, _cx: &RunContext) -> swarm::Result<Value> {
        tokio::time::sleep(self.delay).await;
        Ok(json!(self.name))
    }
}

#[tokio::test]
async fn parallel_tool_results_keep_request_order() {
    let calls = vec![
        ToolCall::new("slowest", JsonMap::new()).with_id("c1"),
        ToolCall::new("middle", JsonMap::new()).with_id("c2"),
        ToolCall::new("fastest", JsonMap::new()).with_id("c3"),
    ];
    let provider = Arc::new(MockProvider::new().then_calls(calls).then_text("done"));

    let agent = Agent::builder("parallel")
        .provider(provider)
        .tool(Arc::new(SleepTool {
            name: "slowest".into(),
            delay: Duration::from_millis(50),
        }))
        .tool(Arc::new(SleepTool {
            name: "middle".into(),
            delay: Duration::from_millis(25),
        }))
        .tool(Arc::new(SleepTool {
            name: "fastest".into(),
            delay: Duration::from_millis(1),
        }))
        .parallel_tool_calls(true)
        .build()
        .expect("valid");

    let result = agent.run("race").await.expect("completes");
    let names: Vec<&str> = result.tool_results.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(
        names,
        ["slowest", "middle", "fastest"],
        "results must follow request order, not completion order"
    );
}

#[tokio::test]
async fn cancellation_produces_exactly_one_cancelled_outcome() {
    let provider = Arc::new(
        MockProvider::new()
            .then_calls(vec![ToolCall::new("napper", JsonMap::new())])
            .then_text("unreachable"),
    );
    let agent = Agent::builder("cancellable")
        .provider(provider)
        .tool(Arc::new(SleepTool {
            name: "napper".into(),
            delay: Duration::from_secs(30),
        }))
        .build()
        .expect("valid");

    let running = agent.clone();
    let task = tokio::spawn(async move { running.run("begin").await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    agent.cancel();

    let outcome = task.await.expect("join");
    let err = outcome.expect_err("cancelled mid-tool");
    assert_eq!(err.kind(), ErrorKind::Cancelled);
}

#[tokio::test]
async fn run_timeout_maps_to_timeout_error() {
    let provider = Arc::new(
        MockProvider::new()
            .then_calls(vec![ToolCall::new("napper", JsonMap::new())])
            .then_text("unreachable"),
    );
    let agent = Agent::builder("deadline")
        .provider(provider)
        .tool(Arc::new(SleepTool {
            name: "napper".into(),
            delay: Duration::from_secs(30),
        }))
        .timeout(Duration::from_millis(50))
        .build()
        .expect("valid");

    let err = agent.run("begin").await.expect_err("times out");
    assert_eq!(err.kind(), ErrorKind::Timeout);
}

#[tokio::test]
async fn memory_round_trip_after_clear() {
    let memory: Arc<dyn Memory> = Arc::new(BufferMemory::new());
    memory
        .append(MemoryMessage::user("remember me"))
        .await
        .expect("append");
    assert_eq!(memory.count().await.expect("count"), 1);

    memory.clear().await.expect("clear");
    assert_eq!(memory.count().await.expect("count"), 0);
    assert_eq!(memory.context("anything", 512).await.expect("context"), "");
}

#[tokio::test]
async fn rate_limiter_zero_configs_acquire_promptly() {
    for limiter in [
        RateLimiter::per_minute(0),
        RateLimiter::with_refill_rate(1.0, 0.0),
    ] {
        tokio::time::timeout(Duration::from_secs(1), limiter.acquire())
            .await
            .expect("acquire completes within one second");
    }
}

#[tokio::test]
async fn workflow_agent_steps_compose_with_handoffs() {
    // A workflow step runs a triage agent that hands off to a billing
    // agent; the workflow sees only the final output.
    let billing = Agent::builder("billing")
        .provider(Arc::new(MockProvider::new().then_text("refund issued")))
        .build()
        .expect("valid");

    let mut args = JsonMap::new();
    args.insert("input".into(), json!("refund please"));
    let triage = Agent::builder("triage")
        .provider(Arc::new(
            MockProvider::new().then_calls(vec![ToolCall::new("handoff_to_billing", args)]),
        ))
        .handoff(Handoff::to(billing))
        .build()
        .expect("valid");

    let workflow = Workflow::new(
        "support",
        Step::sequential(
            "main",
            vec![
                Step::transform("intake", |x| format!("ticket: {x}")),
                Step::agent_run("triage", triage),
                Step::transform("close", |x| format!("{x} (closed)")),
            ],
        ),
    )
    .expect("valid");

    let engine = WorkflowEngine::in_memory();
    let output = engine
        .run(&workflow, "customer asks for refund")
        .await
        .expect("completes");
    assert_eq!(output, "refund issued (closed)");
}
