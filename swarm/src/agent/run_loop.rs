//! The tool-using loop state machine.
//!
//! One iteration: plan the prompt (membrane, with a naive fallback),
//! call the model, then either finish with text (through output
//! guardrails) or dispatch the requested tool calls (approval-gated,
//! order-preserving) and merge the results back into the conversation.
//! Handoff tools are intercepted before ordinary dispatch.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use serde_json::json;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, instrument, warn};

use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::guardrail::{GuardrailStage, GuardrailSubject};
use crate::membrane::{MEMBRANE_TOOL_NAMES, PlanRequest};
use crate::message::{MemoryMessage, StreamChunk, ToolCallAccumulator};
use crate::provider::{FinishReason, ProviderResponse};
use crate::resilience::with_timeout;
use crate::schema::ToolSchema;
use crate::tool::{ToolDispatchEvent, ToolDispatcher};
use crate::usage::TokenUsage;
use crate::value::Value;

use super::events::AgentEvent;
use super::result::metadata;
use super::{Agent, AgentEventStream, AgentResult};

impl Agent {
    /// Run the agent to completion on `input`.
    ///
    /// # Errors
    ///
    /// See the crate error taxonomy; notably
    /// [`Error::MaxIterationsReached`], [`Error::GuardrailTripwire`],
    /// [`Error::Timeout`], and [`Error::Cancelled`].
    #[instrument(skip(self, input), fields(agent = %self.core.config.name))]
    pub async fn run(&self, input: impl Into<String>) -> Result<AgentResult> {
        let input = input.into();
        match self.core.config.timeout {
            Some(t) => with_timeout(t, self.run_inner(input, None)).await,
            None => self.run_inner(input, None).await,
        }
    }

    /// Run the agent, yielding observation events as they happen.
    ///
    /// The stream always terminates with exactly one
    /// [`AgentEvent::Completed`] or [`AgentEvent::Failed`].
    #[instrument(skip(self, input), fields(agent = %self.core.config.name))]
    pub fn stream(&self, input: impl Into<String>) -> AgentEventStream {
        let agent = self.clone();
        let input = input.into();
        Box::pin(async_stream::stream! {
            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
            let timeout = agent.core.config.timeout;
            let runner = tokio::spawn(async move {
                match timeout {
                    Some(t) => with_timeout(t, agent.run_inner(input, Some(tx))).await,
                    None => agent.run_inner(input, Some(tx)).await,
                }
            });
            while let Some(event) = rx.recv().await {
                yield event;
            }
            match runner.await {
                Ok(Ok(result)) => yield AgentEvent::Completed(Box::new(result)),
                Ok(Err(e)) => yield AgentEvent::Failed(e.to_string()),
                Err(join_err) => yield AgentEvent::Failed(join_err.to_string()),
            }
        })
    }

    pub(crate) fn run_inner(
        &self,
        input: String,
        events: Option<UnboundedSender<AgentEvent>>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<AgentResult>> + Send + '_>> {
        Box::pin(async move { self.run_inner_impl(input, events).await })
    }

    async fn run_inner_impl(
        &self,
        input: String,
        events: Option<UnboundedSender<AgentEvent>>,
    ) -> Result<AgentResult> {
        let core = &self.core;
        let started = Instant::now();
        core.cancel.reset();
        let cx = RunContext::with_cancel(&core.config.name, core.cancel.clone());
        let _registry_guard = core.registry.run_guard();

        emit(&events, AgentEvent::Started {
            run_id: cx.run_id.clone(),
        });
        for hook in &core.hooks {
            hook.on_run_started(&cx).await;
        }

        // Input guardrails gate everything else.
        let input_subject = GuardrailSubject::Text(input.clone());
        if let Err(e) = core
            .guardrails
            .run(GuardrailStage::Input, &input_subject, &cx)
            .await
        {
            emit_guardrail(&events, &e);
            return Err(e);
        }

        let mut history = self.load_history().await?;
        let mut metadata_map = crate::value::JsonMap::new();
        let mut all_calls = Vec::new();
        let mut all_results = Vec::new();
        let mut usage: Option<TokenUsage> = None;
        let options = core.config.inference_options();

        let enabled_handoffs: Vec<_> = core.handoffs.iter().filter(|h| h.enabled()).collect();

        let mut dispatcher = ToolDispatcher::new(Arc::clone(&core.registry))
            .with_policy(core.approval_policy.clone());
        if let Some(handler) = &core.approval_handler {
            dispatcher = dispatcher.with_handler(Arc::clone(handler));
        }
        if core.config.parallel_tool_calls {
            dispatcher = dispatcher.parallel(core.config.tool_concurrency);
        }
        if let Some(tx) = &events {
            dispatcher = dispatcher.with_event_sink(dispatch_sink(tx.clone()));
        }

        let mut iterations = 0usize;

        loop {
            if cx.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            emit(&events, AgentEvent::IterationStarted {
                iteration: iterations + 1,
            });
            for hook in &core.hooks {
                hook.on_iteration_started(&cx, iterations + 1).await;
            }

            let (prompt, exposed) = self.plan_turn(&input, &history, &mut metadata_map);

            let response = self.call_model(&prompt, &exposed, &options, &cx, &events).await?;
            usage = TokenUsage::merge(usage, response.usage);

            if response.tool_calls.is_empty() {
                let output = match response.finish_reason {
                    FinishReason::Cancelled => return Err(Error::Cancelled),
                    FinishReason::ContentFilter => {
                        return Err(Error::generation("response suppressed by content filter"));
                    }
                    reason => {
                        if reason != FinishReason::Completed {
                            metadata_map.insert(
                                metadata::FINISH_REASON.into(),
                                json!(format!("{reason:?}")),
                            );
                        }
                        response.content.unwrap_or_default()
                    }
                };

                let output_subject = GuardrailSubject::Text(output.clone());
                if let Err(e) = core
                    .guardrails
                    .run(GuardrailStage::Output, &output_subject, &cx)
                    .await
                {
                    emit_guardrail(&events, &e);
                    return Err(e);
                }

                let result = AgentResult {
                    output,
                    tool_calls: all_calls,
                    tool_results: all_results,
                    iterations,
                    duration: started.elapsed(),
                    usage,
                    metadata: metadata_map,
                };
                self.write_back(&input, &result).await?;
                for hook in &core.hooks {
                    hook.on_run_completed(&cx, &result).await;
                }
                return Ok(result);
            }

            // Handoff interception comes before ordinary dispatch: the
            // model chose to transfer, not to execute.
            let intercepted = response.tool_calls.iter().find_map(|call| {
                enabled_handoffs
                    .iter()
                    .find(|h| h.effective_tool_name() == call.name)
                    .map(|h| (call, *h))
            });
            if let Some((call, handoff)) = intercepted {
                let raw = call
                    .arguments
                    .get("input")
                    .and_then(Value::as_str)
                    .unwrap_or(&input);
                let filtered = handoff.filter_input(raw);
                handoff.notify(&filtered);
                emit(&events, AgentEvent::Handoff {
                    from: core.config.name.clone(),
                    to: handoff.target().name().to_owned(),
                });
                debug!(target = %handoff.target().name(), "handoff intercepted");
                metadata_map.insert(
                    metadata::HANDOFF_TARGET.into(),
                    json!(handoff.target().name()),
                );

                // Boxed and type-erased to keep the recursive future sized.
                let target = handoff.target().clone();
                let fut: std::pin::Pin<
                    Box<dyn std::future::Future<Output = Result<AgentResult>> + Send>,
                > = Box::pin(async move { target.run(filtered).await });
                let target_result = fut.await?;
                usage = TokenUsage::merge(usage, target_result.usage);

                if handoff.is_nested() {
                    history.push(MemoryMessage::assistant_with_calls(
                        String::new(),
                        vec![call.clone()],
                    ));
                    history.push(MemoryMessage::tool(
                        call.id.clone().unwrap_or_else(|| call.name.clone()),
                        target_result.output,
                    ));
                    iterations += 1;
                    emit(&events, AgentEvent::IterationCompleted {
                        iteration: iterations,
                    });
                    if iterations >= core.config.max_iterations {
                        return Err(Error::MaxIterationsReached(core.config.max_iterations));
                    }
                    continue;
                }

                let output_subject = GuardrailSubject::Text(target_result.output.clone());
                if let Err(e) = core
                    .guardrails
                    .run(GuardrailStage::Output, &output_subject, &cx)
                    .await
                {
                    emit_guardrail(&events, &e);
                    return Err(e);
                }
                let result = AgentResult {
                    output: target_result.output,
                    tool_calls: all_calls,
                    tool_results: all_results,
                    iterations,
                    duration: started.elapsed(),
                    usage,
                    metadata: metadata_map,
                };
                self.write_back(&input, &result).await?;
                for hook in &core.hooks {
                    hook.on_run_completed(&cx, &result).await;
                }
                return Ok(result);
            }

            // Iteration budget: a fresh batch of tool work needs a fresh
            // iteration.
            if iterations >= core.config.max_iterations {
                return Err(Error::MaxIterationsReached(core.config.max_iterations));
            }

            for call in &response.tool_calls {
                for hook in &core.hooks {
                    hook.on_tool_call(&cx, call).await;
                }
            }

            let results = match dispatcher.dispatch(&response.tool_calls, &cx).await {
                Ok(results) => results,
                Err(e) => {
                    emit_guardrail(&events, &e);
                    return Err(e);
                }
            };

            history.push(MemoryMessage::assistant_with_calls(
                response.content.unwrap_or_default(),
                response.tool_calls.clone(),
            ));
            for (call, result) in response.tool_calls.iter().zip(&results) {
                for hook in &core.hooks {
                    hook.on_tool_result(&cx, result).await;
                }
                if let Some(planner) = &core.planner {
                    planner.note_tool_used(&call.name);
                }
                history.push(MemoryMessage::tool(
                    result
                        .call_id
                        .clone()
                        .unwrap_or_else(|| call.name.clone()),
                    result.render(),
                ));
            }
            all_calls.extend(response.tool_calls);
            all_results.extend(results.iter().cloned());

            if core.config.stop_on_tool_error {
                if let Some(failed) = results.iter().find(|r| r.is_error()) {
                    warn!(tool = %failed.name, "stopping on tool error");
                    return Err(Error::tool_execution(
                        &failed.name,
                        failed.error.clone().unwrap_or_default(),
                    ));
                }
            }

            iterations += 1;
            emit(&events, AgentEvent::IterationCompleted {
                iteration: iterations,
            });
        }
    }

    /// Plan the turn's prompt and exposed catalog, falling back to a
    /// naive prompt when the planner fails. The run must not crash on a
    /// planner error.
    fn plan_turn(
        &self,
        input: &str,
        history: &[MemoryMessage],
        metadata_map: &mut crate::value::JsonMap<String, Value>,
    ) -> (String, Vec<ToolSchema>) {
        let core = &self.core;
        let catalog: Vec<ToolSchema> = core
            .registry
            .schemas()
            .into_iter()
            .filter(|s| !MEMBRANE_TOOL_NAMES.contains(&s.name.as_str()))
            .collect();

        let (prompt, mut exposed) = match &core.planner {
            Some(planner) => {
                let request = PlanRequest {
                    instructions: &core.instructions,
                    input,
                    history,
                    catalog: &catalog,
                };
                match planner.plan(&request) {
                    Ok(plan) => (plan.prompt, plan.exposed),
                    Err(e) => {
                        warn!(error = %e, "membrane planner failed, using naive prompt");
                        metadata_map
                            .insert(metadata::MEMBRANE_FALLBACK_USED.into(), json!(true));
                        metadata_map.insert(
                            metadata::MEMBRANE_FALLBACK_ERROR.into(),
                            json!(e.to_string()),
                        );
                        (naive_prompt(&core.instructions, history, input), catalog)
                    }
                }
            }
            None => (naive_prompt(&core.instructions, history, input), catalog),
        };

        for handoff in core.handoffs.iter().filter(|h| h.enabled()) {
            exposed.push(handoff.schema());
        }
        exposed.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
        exposed.dedup_by(|a, b| a.name == b.name);
        (prompt, exposed)
    }

    async fn call_model(
        &self,
        prompt: &str,
        exposed: &[ToolSchema],
        options: &crate::provider::InferenceOptions,
        cx: &RunContext,
        events: &Option<UnboundedSender<AgentEvent>>,
    ) -> Result<ProviderResponse> {
        let provider = &self.core.provider;
        if exposed.is_empty() {
            // Stream text when someone is listening, otherwise one shot.
            if let Some(tx) = events {
                let mut stream = tokio::select! {
                    r = provider.stream(prompt, options) => r?,
                    () = cx.cancel.cancelled() => return Err(Error::Cancelled),
                };
                let mut text = String::new();
                loop {
                    let chunk = tokio::select! {
                        chunk = stream.next() => chunk,
                        () = cx.cancel.cancelled() => return Err(Error::Cancelled),
                    };
                    match chunk {
                        Some(Ok(piece)) => {
                            let _ = tx.send(AgentEvent::OutputToken(piece.clone()));
                            text.push_str(&piece);
                        }
                        Some(Err(e)) => return Err(e),
                        None => break,
                    }
                }
                return Ok(ProviderResponse::text(text));
            }
            let text = tokio::select! {
                r = provider.generate(prompt, options) => r?,
                () = cx.cancel.cancelled() => return Err(Error::Cancelled),
            };
            return Ok(ProviderResponse::text(text));
        }

        if self.core.config.streaming {
            if let Some(response) = self
                .stream_tool_response(prompt, exposed, options, cx, events)
                .await?
            {
                return Ok(response);
            }
        }

        tokio::select! {
            r = provider.generate_with_tools(prompt, exposed, options) => r,
            () = cx.cancel.cancelled() => Err(Error::Cancelled),
        }
    }

    /// Drive the provider's optional tool-call streaming surface,
    /// reassembling split argument deltas. Returns `None` when the
    /// provider lacks the capability so the caller can fall back.
    async fn stream_tool_response(
        &self,
        prompt: &str,
        exposed: &[ToolSchema],
        options: &crate::provider::InferenceOptions,
        cx: &RunContext,
        events: &Option<UnboundedSender<AgentEvent>>,
    ) -> Result<Option<ProviderResponse>> {
        let provider = &self.core.provider;
        let opened = tokio::select! {
            r = provider.stream_with_tools(prompt, exposed, options) => r,
            () = cx.cancel.cancelled() => return Err(Error::Cancelled),
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                debug!(error = %e, "tool-call streaming unavailable, falling back");
                return Ok(None);
            }
        };

        let mut acc = ToolCallAccumulator::new();
        loop {
            let chunk = tokio::select! {
                chunk = stream.next() => chunk,
                () = cx.cancel.cancelled() => return Err(Error::Cancelled),
            };
            match chunk {
                Some(Ok(chunk)) => {
                    match &chunk {
                        StreamChunk::TextDelta(text) => {
                            emit(events, AgentEvent::OutputToken(text.clone()));
                        }
                        StreamChunk::ToolCallDelta(delta) => {
                            emit(events, AgentEvent::ToolCallPartial {
                                id: delta.id.clone(),
                                name: delta.name.clone().unwrap_or_default(),
                                arguments: delta.arguments.clone(),
                            });
                        }
                        StreamChunk::Done => {}
                    }
                    let done = matches!(chunk, StreamChunk::Done);
                    acc.push(&chunk)?;
                    if done {
                        break;
                    }
                }
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }

        let (text, calls) = acc.finish()?;
        let finish_reason = if calls.is_empty() {
            FinishReason::Completed
        } else {
            FinishReason::ToolCall
        };
        Ok(Some(ProviderResponse {
            content: if text.is_empty() { None } else { Some(text) },
            tool_calls: calls,
            finish_reason,
            usage: None,
        }))
    }

    async fn load_history(&self) -> Result<Vec<MemoryMessage>> {
        let Some(memory) = &self.core.memory else {
            return Ok(Vec::new());
        };
        let mut messages = memory.all_messages().await?;
        if let Some(limit) = self.core.config.history_limit {
            let len = messages.len();
            if len > limit {
                messages.drain(..len - limit);
            }
        }
        Ok(messages)
    }

    async fn write_back(&self, input: &str, result: &AgentResult) -> Result<()> {
        let Some(memory) = &self.core.memory else {
            return Ok(());
        };
        memory.append(MemoryMessage::user(input)).await?;
        for (call, tool_result) in result.tool_calls.iter().zip(&result.tool_results) {
            memory
                .append(MemoryMessage::assistant_with_calls(
                    String::new(),
                    vec![call.clone()],
                ))
                .await?;
            memory
                .append(MemoryMessage::tool(
                    tool_result
                        .call_id
                        .clone()
                        .unwrap_or_else(|| call.name.clone()),
                    tool_result.render(),
                ))
                .await?;
        }
        memory
            .append(MemoryMessage::assistant(result.output.clone()))
            .await?;
        Ok(())
    }
}

fn naive_prompt(instructions: &str, history: &[MemoryMessage], input: &str) -> String {
    let mut prompt = String::new();
    if !instructions.is_empty() {
        prompt.push_str(instructions);
        prompt.push_str("\n\n");
    }
    for message in history {
        prompt.push_str(&format!("{}: {}\n", message.role, message.content));
    }
    if !history.is_empty() {
        prompt.push('\n');
    }
    prompt.push_str("user: ");
    prompt.push_str(input);
    prompt
}

fn emit(events: &Option<UnboundedSender<AgentEvent>>, event: AgentEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

fn emit_guardrail(events: &Option<UnboundedSender<AgentEvent>>, error: &Error) {
    if let Error::GuardrailTripwire {
        guardrail, stage, ..
    } = error
    {
        emit(events, AgentEvent::GuardrailTriggered {
            guardrail: guardrail.clone(),
            stage: *stage,
        });
    }
}

fn dispatch_sink(
    tx: UnboundedSender<AgentEvent>,
) -> Arc<dyn Fn(ToolDispatchEvent) + Send + Sync> {
    Arc::new(move |event| {
        let mapped = match event {
            ToolDispatchEvent::Started { call, .. } => AgentEvent::ToolCallStarted {
                id: call.id,
                name: call.name,
            },
            ToolDispatchEvent::Finished { result, .. } => {
                if result.is_error() {
                    AgentEvent::ToolCallFailed {
                        id: result.call_id,
                        name: result.name,
                        error: result.error.unwrap_or_default(),
                    }
                } else {
                    AgentEvent::ToolCallCompleted {
                        id: result.call_id,
                        name: result.name,
                        output: result.output,
                    }
                }
            }
        };
        let _ = tx.send(mapped);
    })
}
