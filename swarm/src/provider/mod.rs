//! The inference provider seam.
//!
//! Concrete HTTP clients live outside this crate; the engine only needs
//! the [`InferenceProvider`] capability: submit a rendered prompt plus
//! optional tool schemas, receive text, a token stream, or parsed tool
//! calls with a finish reason.

mod mock;

pub use mock::{MockProvider, RecordedCall, ScriptedResponse};

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::message::StreamChunk;
use crate::schema::ToolSchema;
use crate::usage::TokenUsage;
use crate::value::{JsonMap, ToolCall, Value};

/// How the model may use the exposed tools.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    /// The model decides.
    #[default]
    Auto,
    /// Tools are exposed but must not be called.
    None,
    /// The model must call some tool.
    Required,
    /// The model must call this specific tool.
    Specific(String),
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of a text response.
    Completed,
    /// The model requested tool calls.
    ToolCall,
    /// The token limit cut generation short.
    MaxTokens,
    /// A provider-side content filter intervened.
    ContentFilter,
    /// The request was cancelled.
    Cancelled,
}

/// Options for one model call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferenceOptions {
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Maximum tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Nucleus sampling parameter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Top-k sampling parameter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Presence penalty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    /// Frequency penalty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    /// Stop sequences.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
    /// Tool selection constraint.
    #[serde(default)]
    pub tool_choice: ToolChoice,
    /// Sampling seed for reproducible runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Whether the provider may return several tool calls at once.
    #[serde(default)]
    pub parallel_tool_calls: bool,
    /// Provider-specific settings passed through opaquely.
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub provider_settings: JsonMap<String, Value>,
}

impl InferenceOptions {
    /// Create default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sampling temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the maximum number of generated tokens.
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the tool selection constraint.
    #[must_use]
    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = tool_choice;
        self
    }

    /// Set the sampling seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// A parsed tool-calling response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Text content, when the model produced any.
    pub content: Option<String>,
    /// Parsed tool calls, empty for plain text responses.
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// Why generation stopped.
    pub finish_reason: FinishReason,
    /// Token accounting, when the provider reports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl ProviderResponse {
    /// A plain text response.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Completed,
            usage: None,
        }
    }

    /// A response requesting tool calls.
    #[must_use]
    pub fn calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: None,
            tool_calls,
            finish_reason: FinishReason::ToolCall,
            usage: None,
        }
    }

    /// Attach token usage.
    #[must_use]
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// A lazy stream of text chunks.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A lazy stream of tool-calling chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// The capability to run model inference.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Generate a complete text response.
    async fn generate(&self, prompt: &str, options: &InferenceOptions) -> Result<String>;

    /// Stream a text response chunk by chunk.
    ///
    /// The default implementation generates the full response and yields
    /// it as a single chunk.
    ///
    /// # Errors
    ///
    /// Propagates [`InferenceProvider::generate`] failures.
    async fn stream(&self, prompt: &str, options: &InferenceOptions) -> Result<TextStream> {
        let text = self.generate(prompt, options).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(text) })))
    }

    /// Generate a response that may contain parsed tool calls.
    async fn generate_with_tools(
        &self,
        prompt: &str,
        tools: &[ToolSchema],
        options: &InferenceOptions,
    ) -> Result<ProviderResponse>;

    /// Stream a tool-calling response as deltas.
    ///
    /// Optional; the default reports the capability as unsupported.
    ///
    /// # Errors
    ///
    /// [`Error::Generation`] when unsupported.
    async fn stream_with_tools(
        &self,
        _prompt: &str,
        _tools: &[ToolSchema],
        _options: &InferenceOptions,
    ) -> Result<ChunkStream> {
        Err(Error::generation("tool-call streaming is not supported by this provider"))
    }
}
