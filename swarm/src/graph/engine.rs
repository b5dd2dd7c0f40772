//! The workflow engine: cooperative execution with checkpointing,
//! interruption, and resume.
//!
//! One step executes (or awaits) at a time per workflow; `Parallel` and
//! `DAG` introduce bounded structured concurrency internally. Each step
//! reads its input from the dataflow and writes its output channel
//! atomically. Interrupt steps pause the workflow behind a single-use
//! [`InterruptHandle`]; resumption replays from recorded channel values,
//! substituting the payload at the interrupt point.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use futures::future::BoxFuture;
use serde_json::json;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::{Error, ExternalWriteError, ResumeError, Result};
use crate::routing::Supervisor;
use crate::value::Value;

use super::channel::{ChannelScope, ExternalWrite, UpdatePolicy, ValueType};
use super::checkpoint::{
    CheckpointState, CheckpointStore, EVENT_SCHEMA_VERSION, INPUT_CHANNEL, MemoryCheckpointStore,
    OUTPUT_CHANNEL,
};
use super::compile::{Workflow, channel_path};
use super::replay::TranscriptEvent;
use super::resume::InterruptHandle;
use super::{MergeStrategy, ParallelErrorHandling, Step};

/// When the engine writes checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointPolicy {
    /// Never checkpoint (interrupts still do).
    Disabled,
    /// Checkpoint after every completed step.
    EveryStep,
    /// Checkpoint after every `n` completed steps.
    EveryNSteps(usize),
    /// Checkpoint only when an interrupt pauses the workflow.
    OnInterrupt,
}

/// The outcome of one workflow execution.
#[derive(Debug)]
pub enum WorkflowOutcome {
    /// The workflow ran to completion.
    Completed(String),
    /// The workflow paused; resume with the handle.
    Interrupted(InterruptHandle),
}

impl WorkflowOutcome {
    /// The completed output, when the workflow finished.
    #[must_use]
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::Completed(output) => Some(output),
            Self::Interrupted(_) => None,
        }
    }

    /// The interrupt handle, when the workflow paused.
    #[must_use]
    pub fn into_interrupted(self) -> Option<InterruptHandle> {
        match self {
            Self::Completed(_) => None,
            Self::Interrupted(handle) => Some(handle),
        }
    }
}

struct PendingInterrupt {
    interrupt_id: String,
    step_path: String,
}

struct ThreadState {
    workflow: Workflow,
    channels: BTreeMap<String, Value>,
    transcript: Vec<TranscriptEvent>,
    pending_interrupt: Option<PendingInterrupt>,
    single_written: BTreeSet<String>,
    sequence: u64,
}

/// Executes workflows against a checkpoint store.
///
/// Threads are keyed by workflow id: one engine thread holds the channel
/// values, transcript, and pending interrupt of one workflow.
pub struct WorkflowEngine {
    store: Arc<dyn CheckpointStore>,
    policy: CheckpointPolicy,
    max_concurrency: usize,
    threads: StdMutex<HashMap<String, ThreadState>>,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("policy", &self.policy)
            .field("max_concurrency", &self.max_concurrency)
            .finish_non_exhaustive()
    }
}

impl WorkflowEngine {
    /// Default bound on concurrent branches inside `Parallel` and `DAG`.
    pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

    /// Create an engine over `store`, checkpointing every step.
    #[must_use]
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            store,
            policy: CheckpointPolicy::EveryStep,
            max_concurrency: Self::DEFAULT_MAX_CONCURRENCY,
            threads: StdMutex::new(HashMap::new()),
        }
    }

    /// An engine over an in-memory store, for tests and ephemeral runs.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCheckpointStore::new()))
    }

    /// Set the checkpoint policy. `EveryNSteps(0)` is sanitized to
    /// `EveryStep`.
    #[must_use]
    pub fn with_policy(mut self, policy: CheckpointPolicy) -> Self {
        self.policy = match policy {
            CheckpointPolicy::EveryNSteps(0) => {
                warn!("EveryNSteps(0) sanitized to EveryStep");
                CheckpointPolicy::EveryStep
            }
            other => other,
        };
        self
    }

    /// Bound the concurrency inside `Parallel` and `DAG` groups.
    #[must_use]
    pub fn with_max_concurrency(mut self, bound: usize) -> Self {
        self.max_concurrency = bound.max(1);
        self
    }

    /// The engine's checkpoint store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Run a workflow to its outcome, throwing on interruption.
    ///
    /// # Errors
    ///
    /// [`Error::WorkflowInterrupted`] when the workflow pauses; any step
    /// error otherwise.
    #[instrument(skip(self, workflow, input), fields(workflow = %workflow.id))]
    pub async fn run(&self, workflow: &Workflow, input: &str) -> Result<String> {
        match self.run_with_outcome(workflow, input).await? {
            WorkflowOutcome::Completed(output) => Ok(output),
            WorkflowOutcome::Interrupted(handle) => Err(Error::WorkflowInterrupted {
                reason: handle.reason,
            }),
        }
    }

    /// Run a workflow, returning an interrupt handle instead of throwing
    /// when it pauses.
    ///
    /// # Errors
    ///
    /// Step errors and checkpoint-store failures.
    #[instrument(skip(self, workflow, input), fields(workflow = %workflow.id))]
    pub async fn run_with_outcome(
        &self,
        workflow: &Workflow,
        input: &str,
    ) -> Result<WorkflowOutcome> {
        let exec = Exec::fresh(self, workflow, input).await;
        self.drive(workflow, exec, input.to_owned()).await
    }

    /// Resume a paused workflow with an optional payload.
    ///
    /// The handle is consumed atomically: a second resume with the same
    /// handle fails with [`ResumeError::NoInterruptToResume`].
    ///
    /// # Errors
    ///
    /// The [`ResumeError`] taxonomy, plus any step error raised while
    /// replaying.
    #[instrument(skip(self, handle, payload), fields(workflow = %handle.workflow_id))]
    pub async fn resume(
        &self,
        handle: &InterruptHandle,
        payload: Option<&str>,
    ) -> Result<WorkflowOutcome> {
        // Validate against the pending interrupt before consuming, so a
        // mismatched handle is not burned.
        let (workflow, channels, transcript, sequence) = {
            let threads = self.lock_threads();
            let thread = threads
                .get(&handle.thread_id)
                .ok_or(ResumeError::NoCheckpointToResume)?;
            let pending = thread
                .pending_interrupt
                .as_ref()
                .ok_or(ResumeError::NoInterruptToResume)?;
            if pending.interrupt_id != handle.interrupt_id {
                return Err(ResumeError::ResumeInterruptMismatch.into());
            }
            if handle.checkpoint.event_schema_version != EVENT_SCHEMA_VERSION {
                return Err(ResumeError::IncompatibleSchemaVersion {
                    expected: EVENT_SCHEMA_VERSION.to_owned(),
                    found: handle.checkpoint.event_schema_version.clone(),
                }
                .into());
            }
            (
                thread.workflow.clone(),
                thread.channels.clone(),
                thread.transcript.clone(),
                thread.sequence,
            )
        };

        handle.consume()?;
        {
            let mut threads = self.lock_threads();
            if let Some(thread) = threads.get_mut(&handle.thread_id) {
                thread.pending_interrupt = None;
            }
        }

        let input = channels
            .get(INPUT_CHANNEL)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let exec = Exec::resuming(
            self,
            &workflow,
            channels,
            transcript,
            sequence,
            ResumeTarget {
                step_path: handle.checkpoint.frontier.first().cloned().unwrap_or_default(),
                payload: payload.map(str::to_owned),
            },
        );
        self.drive(&workflow, exec, input).await
    }

    /// Apply out-of-band channel writes between steps.
    ///
    /// Validation is all-or-nothing: when any write fails, none commit.
    ///
    /// # Errors
    ///
    /// The [`ExternalWriteError`] taxonomy; [`Error::Configuration`] for
    /// an unknown thread.
    pub fn apply_external_writes(&self, thread_id: &str, writes: &[ExternalWrite]) -> Result<()> {
        let mut threads = self.lock_threads();
        let thread = threads.get_mut(thread_id).ok_or_else(|| {
            Error::configuration(format!("no workflow thread '{thread_id}'"))
        })?;
        if thread.pending_interrupt.is_some() {
            return Err(ExternalWriteError::InterruptPending.into());
        }

        let mut staged: Vec<(String, Value, UpdatePolicy)> = Vec::with_capacity(writes.len());
        let mut staged_names: BTreeSet<&str> = BTreeSet::new();
        for write in writes {
            let spec = thread
                .workflow
                .channels
                .get(&write.channel)
                .ok_or_else(|| ExternalWriteError::UnknownChannel(write.channel.clone()))?;
            if write.scope == ChannelScope::TaskLocal && spec.scope == ChannelScope::Global {
                return Err(
                    ExternalWriteError::TaskLocalWriteNotAllowed(write.channel.clone()).into(),
                );
            }
            if !spec.value_type.matches(&write.value) {
                return Err(ExternalWriteError::ChannelTypeMismatch {
                    channel: write.channel.clone(),
                    expected: spec.value_type.describe().to_owned(),
                    found: ValueType::of(&write.value).to_owned(),
                }
                .into());
            }
            if spec.update == UpdatePolicy::Single
                && (thread.single_written.contains(&write.channel)
                    || staged_names.contains(write.channel.as_str()))
            {
                return Err(ExternalWriteError::UpdatePolicyViolation(write.channel.clone()).into());
            }
            staged_names.insert(write.channel.as_str());
            staged.push((
                write.channel.clone(),
                spec.value_type.normalize(write.value.clone()),
                spec.update,
            ));
        }

        for (name, value, update) in staged {
            if update == UpdatePolicy::Single {
                thread.single_written.insert(name.clone());
            }
            thread.channels.insert(name, value);
        }
        Ok(())
    }

    /// The transcript recorded for a thread so far.
    #[must_use]
    pub fn transcript(&self, thread_id: &str) -> Vec<TranscriptEvent> {
        self.lock_threads()
            .get(thread_id)
            .map(|t| t.transcript.clone())
            .unwrap_or_default()
    }

    /// A snapshot of a thread's channel values.
    #[must_use]
    pub fn final_state(&self, thread_id: &str) -> BTreeMap<String, Value> {
        self.lock_threads()
            .get(thread_id)
            .map(|t| t.channels.clone())
            .unwrap_or_default()
    }

    async fn drive(
        &self,
        workflow: &Workflow,
        exec: Exec,
        input: String,
    ) -> Result<WorkflowOutcome> {
        let flow = exec.exec(&workflow.root, input, "").await;

        match flow {
            Ok(Flow::Continue(output)) => {
                exec.push_event("workflow_completed", None, json!({ "output": output.clone() }))
                    .await;
                self.persist_thread(workflow, &exec, None).await;
                Ok(WorkflowOutcome::Completed(output))
            }
            Ok(Flow::Interrupted { step_path, reason }) => {
                exec.push_event(
                    "workflow_interrupted",
                    Some(&step_path),
                    json!({ "reason": reason.clone() }),
                )
                .await;
                // Interrupts checkpoint regardless of policy.
                let checkpoint = exec
                    .checkpoint_state(Some(reason.clone()), std::slice::from_ref(&step_path))
                    .await;
                self.store.save(&checkpoint).await?;
                let checkpoint_id = checkpoint.checkpoint_id()?;
                let interrupt_id = Uuid::new_v4().to_string();

                self.persist_thread(
                    workflow,
                    &exec,
                    Some(PendingInterrupt {
                        interrupt_id: interrupt_id.clone(),
                        step_path,
                    }),
                )
                .await;

                Ok(WorkflowOutcome::Interrupted(InterruptHandle::new(
                    workflow.id.clone(),
                    workflow.id.clone(),
                    interrupt_id,
                    checkpoint_id,
                    checkpoint,
                    reason,
                )))
            }
            Err(e) => {
                exec.push_event("workflow_failed", None, json!({ "error": e.to_string() }))
                    .await;
                self.persist_thread(workflow, &exec, None).await;
                Err(e)
            }
        }
    }

    async fn persist_thread(
        &self,
        workflow: &Workflow,
        exec: &Exec,
        pending: Option<PendingInterrupt>,
    ) {
        let channels = exec.channels.lock().await.clone();
        let transcript = exec.events.lock().await.clone();
        let sequence = exec.seq.load(Ordering::SeqCst);
        let mut threads = self.lock_threads();
        let thread = threads
            .entry(workflow.id.clone())
            .or_insert_with(|| ThreadState {
                workflow: workflow.clone(),
                channels: BTreeMap::new(),
                transcript: Vec::new(),
                pending_interrupt: None,
                single_written: BTreeSet::new(),
                sequence: 0,
            });
        thread.workflow = workflow.clone();
        thread.channels = channels;
        thread.transcript = transcript;
        thread.pending_interrupt = pending;
        thread.sequence = sequence;
    }

    fn lock_threads(&self) -> std::sync::MutexGuard<'_, HashMap<String, ThreadState>> {
        self.threads
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[derive(Debug, Clone)]
struct ResumeTarget {
    step_path: String,
    payload: Option<String>,
}

enum Flow {
    Continue(String),
    Interrupted { step_path: String, reason: String },
}

/// Per-run execution context; cheap to clone into branch tasks.
#[derive(Clone)]
struct Exec {
    workflow_id: String,
    run_id: String,
    channels: Arc<Mutex<BTreeMap<String, Value>>>,
    events: Arc<Mutex<Vec<TranscriptEvent>>>,
    seq: Arc<AtomicU64>,
    steps_done: Arc<AtomicUsize>,
    max_concurrency: usize,
    store: Arc<dyn CheckpointStore>,
    policy: CheckpointPolicy,
    replaying: bool,
    resume: Option<Arc<ResumeTarget>>,
    // Branch tasks run quiet: the parent records their completion events
    // in declaration order so transcripts stay deterministic.
    quiet: bool,
}

impl Exec {
    async fn fresh(engine: &WorkflowEngine, workflow: &Workflow, input: &str) -> Self {
        let mut channels = BTreeMap::new();
        channels.insert(INPUT_CHANNEL.to_owned(), Value::String(input.to_owned()));
        let exec = Self {
            workflow_id: workflow.id.clone(),
            run_id: Uuid::new_v4().to_string(),
            channels: Arc::new(Mutex::new(channels)),
            events: Arc::new(Mutex::new(Vec::new())),
            seq: Arc::new(AtomicU64::new(0)),
            steps_done: Arc::new(AtomicUsize::new(0)),
            max_concurrency: engine.max_concurrency,
            store: Arc::clone(&engine.store),
            policy: engine.policy,
            replaying: false,
            resume: None,
            quiet: false,
        };
        exec.push_event("workflow_started", None, json!({ "input": input }))
            .await;
        exec
    }

    fn resuming(
        engine: &WorkflowEngine,
        workflow: &Workflow,
        channels: BTreeMap<String, Value>,
        transcript: Vec<TranscriptEvent>,
        sequence: u64,
        target: ResumeTarget,
    ) -> Self {
        Self {
            workflow_id: workflow.id.clone(),
            run_id: Uuid::new_v4().to_string(),
            channels: Arc::new(Mutex::new(channels)),
            events: Arc::new(Mutex::new(transcript)),
            seq: Arc::new(AtomicU64::new(sequence)),
            steps_done: Arc::new(AtomicUsize::new(0)),
            max_concurrency: engine.max_concurrency,
            store: Arc::clone(&engine.store),
            policy: engine.policy,
            replaying: true,
            resume: Some(Arc::new(target)),
            quiet: false,
        }
    }

    fn branch_context(&self) -> Self {
        let mut child = self.clone();
        child.quiet = true;
        child
    }

    fn exec<'a>(&'a self, step: &'a Step, input: String, prefix: &'a str) -> BoxFuture<'a, Result<Flow>> {
        Box::pin(self.exec_inner(step, input, prefix))
    }

    async fn exec_inner(&self, step: &Step, input: String, prefix: &str) -> Result<Flow> {
        let path = channel_path(prefix, step.name());

        // Replay: completed steps return their recorded output without
        // re-executing.
        if self.replaying {
            let recorded = self
                .channels
                .lock()
                .await
                .get(&path)
                .and_then(Value::as_str)
                .map(str::to_owned);
            if let Some(output) = recorded {
                debug!(step = %path, "replay: using recorded output");
                return Ok(Flow::Continue(output));
            }
        }

        let flow = match step {
            Step::Sequential { steps, .. } => {
                let mut current = input;
                for child in steps {
                    match self.exec(child, current, &path).await? {
                        Flow::Continue(output) => current = output,
                        interrupted @ Flow::Interrupted { .. } => return Ok(interrupted),
                    }
                }
                Flow::Continue(current)
            }

            Step::Parallel {
                steps,
                error_handling,
                merge,
                ..
            } => {
                self.exec_parallel(steps, &input, &path, *error_handling, *merge)
                    .await?
            }

            Step::Dag { nodes, .. } => self.exec_dag(nodes, &input, &path).await?,

            Step::Router {
                strategy,
                routes,
                fallback,
                policy,
                ..
            } => {
                let mut supervisor = Supervisor::new(Arc::clone(strategy)).policy(*policy);
                for (name, agent) in routes {
                    supervisor = supervisor.route(name.clone(), agent.clone());
                }
                if let Some(agent) = fallback {
                    supervisor = supervisor.fallback(agent.clone());
                }
                let result = supervisor.run(&input).await?;
                Flow::Continue(result.output)
            }

            Step::Branch {
                predicate,
                then_step,
                else_step,
                ..
            } => {
                if predicate(&input) {
                    match self.exec(then_step, input, &path).await? {
                        Flow::Continue(output) => Flow::Continue(output),
                        interrupted @ Flow::Interrupted { .. } => return Ok(interrupted),
                    }
                } else if let Some(else_step) = else_step {
                    match self.exec(else_step, input, &path).await? {
                        Flow::Continue(output) => Flow::Continue(output),
                        interrupted @ Flow::Interrupted { .. } => return Ok(interrupted),
                    }
                } else {
                    Flow::Continue(input)
                }
            }

            Step::RepeatWhile {
                body,
                predicate,
                max_iterations,
                ..
            } => {
                let mut current = input;
                let mut iteration = 0usize;
                while iteration < *max_iterations && predicate(&current) {
                    let iter_prefix = format!("{path}#{iteration}");
                    match self.exec(body, current.clone(), &iter_prefix).await? {
                        Flow::Continue(output) => current = output,
                        interrupted @ Flow::Interrupted { .. } => return Ok(interrupted),
                    }
                    iteration += 1;
                }
                Flow::Continue(current)
            }

            Step::Transform { transform, .. } => Flow::Continue(transform(input)),

            Step::Guard { name, check, .. } => {
                check(&input).map_err(|e| {
                    warn!(guard = %name, error = %e, "guard rejected the dataflow value");
                    e
                })?;
                Flow::Continue(input)
            }

            Step::HumanApproval { prompt, .. } => {
                self.interrupt_or_resume(&path, prompt, input).await
            }

            Step::Interrupt { reason, .. } => {
                self.interrupt_or_resume(&path, reason, input).await
            }

            Step::AgentRun { agent, .. } => {
                let result = agent.run(input).await?;
                Flow::Continue(result.output)
            }
        };

        match flow {
            Flow::Continue(output) => {
                self.record_step(&path, &output).await?;
                Ok(Flow::Continue(output))
            }
            interrupted @ Flow::Interrupted { .. } => Ok(interrupted),
        }
    }

    /// Interrupt steps pause the first time through and pass the dataflow
    /// value through once resumed; the resume payload lands on the step's
    /// payload channel.
    async fn interrupt_or_resume(&self, path: &str, reason: &str, input: String) -> Flow {
        if let Some(target) = &self.resume {
            if target.step_path == path {
                if let Some(payload) = &target.payload {
                    self.channels.lock().await.insert(
                        format!("{path}.payload"),
                        Value::String(payload.clone()),
                    );
                }
                return Flow::Continue(input);
            }
        }
        Flow::Interrupted {
            step_path: path.to_owned(),
            reason: reason.to_owned(),
        }
    }

    async fn exec_parallel(
        &self,
        steps: &[Step],
        input: &str,
        path: &str,
        error_handling: ParallelErrorHandling,
        merge: MergeStrategy,
    ) -> Result<Flow> {
        // The bound is per group so nested groups cannot starve each
        // other of permits.
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut set: JoinSet<(usize, Result<Flow>)> = JoinSet::new();
        for (index, child) in steps.iter().enumerate() {
            let exec = self.branch_context();
            let child = child.clone();
            let input = input.to_owned();
            let prefix = path.to_owned();
            let semaphore = Arc::clone(&semaphore);
            set.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return (index, Err(Error::Cancelled));
                };
                let flow = exec.exec(&child, input, &prefix).await;
                (index, flow)
            });
        }

        let mut slots: Vec<Option<Result<Flow>>> = Vec::new();
        slots.resize_with(steps.len(), || None);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, flow)) => slots[index] = Some(flow),
                Err(join_err) => return Err(Error::generation(join_err.to_string())),
            }
        }

        let mut outputs: Vec<(usize, String)> = Vec::new();
        for (index, slot) in slots.into_iter().enumerate() {
            let flow = slot.unwrap_or_else(|| Err(Error::Cancelled));
            match flow {
                Ok(Flow::Continue(output)) => outputs.push((index, output)),
                Ok(interrupted @ Flow::Interrupted { .. }) => return Ok(interrupted),
                Err(e) => match error_handling {
                    ParallelErrorHandling::FailFast => return Err(e),
                    ParallelErrorHandling::ContinueOnError => {
                        warn!(branch = index, error = %e, "parallel branch dropped");
                    }
                },
            }
        }

        // Branches ran quiet; record their completions deterministically.
        for (index, output) in &outputs {
            let child_path = channel_path(path, steps[*index].name());
            self.push_event("step_completed", Some(&child_path), json!({ "output": output }))
                .await;
        }

        let merged = match merge {
            MergeStrategy::Concat => outputs
                .iter()
                .map(|(_, output)| output.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
            MergeStrategy::Last => outputs
                .last()
                .map(|(_, output)| output.clone())
                .unwrap_or_default(),
        };
        Ok(Flow::Continue(merged))
    }

    async fn exec_dag(
        &self,
        nodes: &[super::DagNode],
        input: &str,
        path: &str,
    ) -> Result<Flow> {
        let mut completed: BTreeMap<String, String> = BTreeMap::new();
        let mut remaining: Vec<usize> = (0..nodes.len()).collect();
        let mut completion_order: Vec<usize> = Vec::new();

        while !remaining.is_empty() {
            // Next wave: nodes whose dependencies are all satisfied, in
            // declaration order.
            let wave: Vec<usize> = remaining
                .iter()
                .copied()
                .filter(|&i| {
                    nodes[i]
                        .depends_on
                        .iter()
                        .all(|dep| completed.contains_key(dep))
                })
                .collect();
            // Validation rejected cycles, so an empty wave is impossible.
            debug_assert!(!wave.is_empty());
            if wave.is_empty() {
                return Err(Error::generation("dag scheduling stalled"));
            }

            let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
            let mut set: JoinSet<(usize, Result<Flow>)> = JoinSet::new();
            for &i in &wave {
                let node = &nodes[i];
                let node_input = if node.depends_on.is_empty() {
                    input.to_owned()
                } else {
                    node.depends_on
                        .iter()
                        .filter_map(|dep| completed.get(dep).map(String::as_str))
                        .collect::<Vec<_>>()
                        .join("\n")
                };
                let exec = self.branch_context();
                let child = node.step.clone();
                let prefix = path.to_owned();
                let semaphore = Arc::clone(&semaphore);
                set.spawn(async move {
                    let Ok(_permit) = semaphore.acquire().await else {
                        return (i, Err(Error::Cancelled));
                    };
                    let flow = exec.exec(&child, node_input, &prefix).await;
                    (i, flow)
                });
            }

            let mut wave_results: BTreeMap<usize, Result<Flow>> = BTreeMap::new();
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((i, flow)) => {
                        wave_results.insert(i, flow);
                    }
                    Err(join_err) => return Err(Error::generation(join_err.to_string())),
                }
            }

            for &i in &wave {
                match wave_results.remove(&i) {
                    Some(Ok(Flow::Continue(output))) => {
                        let node_path = channel_path(path, &nodes[i].name);
                        self.push_event(
                            "step_completed",
                            Some(&node_path),
                            json!({ "output": output }),
                        )
                        .await;
                        completed.insert(nodes[i].name.clone(), output);
                        completion_order.push(i);
                    }
                    Some(Ok(interrupted @ Flow::Interrupted { .. })) => return Ok(interrupted),
                    Some(Err(e)) => return Err(e),
                    None => return Err(Error::Cancelled),
                }
            }
            remaining.retain(|i| !wave.contains(i));
        }

        // Sink outputs, in topological traversal order. Order among
        // parallel sinks within a wave follows declaration order and is
        // not part of the contract.
        let depended_on: BTreeSet<&str> = nodes
            .iter()
            .flat_map(|n| n.depends_on.iter().map(String::as_str))
            .collect();
        let sink_outputs: Vec<&str> = completion_order
            .iter()
            .filter(|&&i| !depended_on.contains(nodes[i].name.as_str()))
            .filter_map(|&i| completed.get(&nodes[i].name).map(String::as_str))
            .collect();
        Ok(Flow::Continue(sink_outputs.join("\n")))
    }

    async fn record_step(&self, path: &str, output: &str) -> Result<()> {
        {
            let mut channels = self.channels.lock().await;
            channels.insert(path.to_owned(), Value::String(output.to_owned()));
            if !self.quiet {
                channels.insert(OUTPUT_CHANNEL.to_owned(), Value::String(output.to_owned()));
            }
        }
        if !self.quiet {
            self.push_event("step_completed", Some(path), json!({ "output": output }))
                .await;
        }

        let done = self.steps_done.fetch_add(1, Ordering::SeqCst) + 1;
        let checkpoint_now = match self.policy {
            CheckpointPolicy::EveryStep => true,
            CheckpointPolicy::EveryNSteps(n) => done % n.max(1) == 0,
            CheckpointPolicy::Disabled | CheckpointPolicy::OnInterrupt => false,
        };
        if checkpoint_now {
            let frontier = [path.to_owned()];
            let state = self.checkpoint_state(None, &frontier).await;
            self.store.save(&state).await?;
        }
        Ok(())
    }

    async fn checkpoint_state(
        &self,
        interruption_reason: Option<String>,
        frontier: &[String],
    ) -> CheckpointState {
        CheckpointState {
            workflow_id: self.workflow_id.clone(),
            run_id: self.run_id.clone(),
            step_index: self.steps_done.load(Ordering::SeqCst),
            frontier: frontier.to_vec(),
            channel_values: self.channels.lock().await.clone(),
            interruption_reason,
            event_schema_version: EVENT_SCHEMA_VERSION.to_owned(),
        }
    }

    async fn push_event(&self, kind: &str, step: Option<&str>, payload: Value) {
        let sequence = self.seq.fetch_add(1, Ordering::SeqCst);
        self.events.lock().await.push(TranscriptEvent {
            sequence,
            kind: kind.to_owned(),
            step: step.map(str::to_owned),
            payload,
            schema_version: EVENT_SCHEMA_VERSION.to_owned(),
        });
    }
}
