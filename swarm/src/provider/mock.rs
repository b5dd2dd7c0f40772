//! Mock provider for tests.
//!
//! Returns a scripted sequence of responses and records what it was asked,
//! so tests can assert on rendered prompts and exposed tool catalogs
//! without a network.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::message::{StreamChunk, ToolCallDelta};
use crate::schema::ToolSchema;
use crate::usage::TokenUsage;
use crate::value::ToolCall;

use super::{ChunkStream, FinishReason, InferenceOptions, InferenceProvider, ProviderResponse};

/// One scripted turn.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Reply with text.
    Text(String),
    /// Request these tool calls.
    Calls(Vec<ToolCall>),
    /// Fail with a generation error.
    Failure(String),
}

/// What the provider observed for one call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// The rendered prompt it received.
    pub prompt: String,
    /// Names of the exposed tool schemas, in the order received.
    pub tool_names: Vec<String>,
}

/// A provider that replays a script and records its inputs.
#[derive(Debug, Default)]
pub struct MockProvider {
    script: Mutex<VecDeque<ScriptedResponse>>,
    recorded: Mutex<Vec<RecordedCall>>,
    usage_per_call: Option<TokenUsage>,
}

impl MockProvider {
    /// Create a provider with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a text reply to the script.
    #[must_use]
    pub fn then_text(self, text: impl Into<String>) -> Self {
        self.push(ScriptedResponse::Text(text.into()));
        self
    }

    /// Append a tool-call request to the script.
    #[must_use]
    pub fn then_calls(self, calls: Vec<ToolCall>) -> Self {
        self.push(ScriptedResponse::Calls(calls));
        self
    }

    /// Append a failure to the script.
    #[must_use]
    pub fn then_failure(self, message: impl Into<String>) -> Self {
        self.push(ScriptedResponse::Failure(message.into()));
        self
    }

    /// Report this usage on every scripted response.
    #[must_use]
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage_per_call = Some(usage);
        self
    }

    /// Everything the provider has been asked so far.
    #[must_use]
    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.recorded
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn push(&self, response: ScriptedResponse) {
        self.script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(response);
    }

    fn record(&self, prompt: &str, tools: &[ToolSchema]) {
        self.recorded
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(RecordedCall {
                prompt: prompt.to_owned(),
                tool_names: tools.iter().map(|t| t.name.clone()).collect(),
            });
    }

    fn next(&self) -> Result<ScriptedResponse> {
        self.script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| Error::generation("mock provider script exhausted"))
    }
}

#[async_trait]
impl InferenceProvider for MockProvider {
    async fn generate(&self, prompt: &str, _options: &InferenceOptions) -> Result<String> {
        self.record(prompt, &[]);
        match self.next()? {
            ScriptedResponse::Text(text) => Ok(text),
            ScriptedResponse::Calls(_) => Err(Error::generation(
                "mock script expected a tool-calling turn, got generate()",
            )),
            ScriptedResponse::Failure(message) => Err(Error::generation(message)),
        }
    }

    async fn generate_with_tools(
        &self,
        prompt: &str,
        tools: &[ToolSchema],
        _options: &InferenceOptions,
    ) -> Result<ProviderResponse> {
        self.record(prompt, tools);
        match self.next()? {
            ScriptedResponse::Text(text) => Ok(ProviderResponse {
                content: Some(text),
                tool_calls: Vec::new(),
                finish_reason: FinishReason::Completed,
                usage: self.usage_per_call,
            }),
            ScriptedResponse::Calls(calls) => Ok(ProviderResponse {
                content: None,
                tool_calls: calls,
                finish_reason: FinishReason::ToolCall,
                usage: self.usage_per_call,
            }),
            ScriptedResponse::Failure(message) => Err(Error::generation(message)),
        }
    }

    async fn stream_with_tools(
        &self,
        prompt: &str,
        tools: &[ToolSchema],
        _options: &InferenceOptions,
    ) -> Result<ChunkStream> {
        self.record(prompt, tools);
        let chunks: Vec<Result<StreamChunk>> = match self.next()? {
            ScriptedResponse::Text(text) => {
                vec![Ok(StreamChunk::TextDelta(text)), Ok(StreamChunk::Done)]
            }
            ScriptedResponse::Calls(calls) => {
                let mut chunks = Vec::with_capacity(calls.len() * 2 + 1);
                for (index, call) in calls.into_iter().enumerate() {
                    // Split the argument JSON mid-way so consumers must
                    // reassemble it, the way real providers chunk.
                    let arguments = serde_json::to_string(&call.arguments)?;
                    let mut mid = arguments.len() / 2;
                    while !arguments.is_char_boundary(mid) {
                        mid -= 1;
                    }
                    chunks.push(Ok(StreamChunk::ToolCallDelta(ToolCallDelta {
                        index,
                        id: call.id.clone(),
                        name: Some(call.name.clone()),
                        arguments: arguments[..mid].to_owned(),
                    })));
                    chunks.push(Ok(StreamChunk::ToolCallDelta(ToolCallDelta {
                        index,
                        id: None,
                        name: None,
                        arguments: arguments[mid..].to_owned(),
                    })));
                }
                chunks.push(Ok(StreamChunk::Done));
                chunks
            }
            ScriptedResponse::Failure(message) => vec![Err(Error::generation(message))],
        };
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::JsonMap;

    #[tokio::test]
    async fn script_plays_in_order() {
        let provider = MockProvider::new()
            .then_calls(vec![ToolCall::new("lookup", JsonMap::new())])
            .then_text("done");

        let first = provider
            .generate_with_tools("p1", &[], &InferenceOptions::new())
            .await
            .expect("scripted");
        assert_eq!(first.finish_reason, FinishReason::ToolCall);

        let second = provider
            .generate_with_tools("p2", &[], &InferenceOptions::new())
            .await
            .expect("scripted");
        assert_eq!(second.content.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn exhausted_script_errors() {
        let provider = MockProvider::new();
        let err = provider
            .generate("p", &InferenceOptions::new())
            .await
            .expect_err("nothing scripted");
        assert!(err.to_string().contains("exhausted"));
    }

    #[tokio::test]
    async fn streamed_calls_split_argument_json() {
        use futures::StreamExt;
        use crate::message::StreamChunk;

        let mut args = JsonMap::new();
        args.insert("query".into(), serde_json::json!("rust"));
        let provider =
            MockProvider::new().then_calls(vec![ToolCall::new("search", args).with_id("c1")]);

        let mut stream = provider
            .stream_with_tools("p", &[], &InferenceOptions::new())
            .await
            .expect("stream opens");

        let mut deltas = Vec::new();
        while let Some(chunk) = stream.next().await {
            deltas.push(chunk.expect("scripted chunk"));
        }
        assert!(matches!(deltas.last(), Some(StreamChunk::Done)));

        // Reassembling the fragments yields the original call.
        let mut acc = crate::message::ToolCallAccumulator::new();
        for chunk in &deltas {
            acc.push(chunk).expect("valid protocol");
        }
        let (_, calls) = acc.finish().expect("complete call");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "search");
        assert_eq!(calls[0].arguments["query"], "rust");
        assert_eq!(calls[0].id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn records_prompts_and_tool_names() {
        let provider = MockProvider::new().then_text("hi");
        let tools = vec![ToolSchema::new("alpha", "a"), ToolSchema::new("beta", "b")];
        provider
            .generate_with_tools("the prompt", &tools, &InferenceOptions::new())
            .await
            .expect("scripted");
        let recorded = provider.recorded();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].prompt, "the prompt");
        assert_eq!(recorded[0].tool_names, ["alpha", "beta"]);
    }
}
