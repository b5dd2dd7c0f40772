//! Conversation messages and streaming deltas.
//!
//! [`MemoryMessage`] is the unit of session history. Streaming providers
//! emit [`StreamChunk`]s whose tool-call deltas may split argument JSON
//! across chunks; [`ToolCallAccumulator`] reassembles them into complete
//! [`ToolCall`]s.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::value::{JsonMap, ToolCall, Value};

/// The author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// System instructions.
    System,
    /// End-user input.
    User,
    /// Model output.
    Assistant,
    /// Tool result, always linked to a call id.
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// One message of session history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryMessage {
    /// Unique message id.
    pub id: Uuid,
    /// Who authored the message.
    pub role: Role,
    /// Message text.
    pub content: String,
    /// When the message was created.
    pub timestamp: SystemTime,
    /// Free-form metadata.
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub metadata: JsonMap<String, Value>,
    /// For tool messages: the call this message answers. Never null for
    /// [`Role::Tool`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// For assistant messages that requested tools: the requested calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl MemoryMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: SystemTime::now(),
            metadata: JsonMap::new(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    /// A system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// A user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// An assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// An assistant message that requested tool calls.
    #[must_use]
    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::new(Role::Assistant, content);
        msg.tool_calls = Some(calls);
        msg
    }

    /// A tool result message linked to `call_id`.
    #[must_use]
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::new(Role::Tool, content);
        msg.tool_call_id = Some(call_id.into());
        msg
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A fragment of a streamed tool call.
///
/// Providers may split the argument JSON of one call across many deltas;
/// `index` identifies which in-flight call a fragment belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Index of the call this fragment extends.
    pub index: usize,
    /// Call id, usually present only on the first fragment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Tool name, usually present only on the first fragment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// A fragment of the argument JSON.
    #[serde(default)]
    pub arguments: String,
}

/// One chunk of a streamed tool-calling response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamChunk {
    /// Incremental text content.
    TextDelta(String),
    /// A fragment of a tool call.
    ToolCallDelta(ToolCallDelta),
    /// End of stream.
    Done,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Assembles streamed [`ToolCallDelta`]s into complete calls.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: Vec<PartialCall>,
    text: String,
}

impl ToolCallAccumulator {
    /// Create an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk.
    ///
    /// # Errors
    ///
    /// A [`StreamChunk::ToolCallDelta`] without a name, for an index that
    /// never received one, is a protocol violation and fails with
    /// [`Error::Generation`].
    pub fn push(&mut self, chunk: &StreamChunk) -> Result<()> {
        match chunk {
            StreamChunk::TextDelta(text) => self.text.push_str(text),
            StreamChunk::ToolCallDelta(delta) => {
                while self.calls.len() <= delta.index {
                    self.calls.push(PartialCall::default());
                }
                let call = &mut self.calls[delta.index];
                if let Some(id) = &delta.id {
                    call.id = Some(id.clone());
                }
                if let Some(name) = &delta.name {
                    call.name = Some(name.clone());
                }
                if call.name.is_none() {
                    return Err(Error::generation(format!(
                        "tool call delta at index {} arrived without a name",
                        delta.index
                    )));
                }
                call.arguments.push_str(&delta.arguments);
            }
            StreamChunk::Done => {}
        }
        Ok(())
    }

    /// Accumulated text content so far.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Finish the stream, parsing each call's accumulated argument JSON.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Generation`] when an argument fragment sequence
    /// does not form a JSON object.
    pub fn finish(self) -> Result<(String, Vec<ToolCall>)> {
        let mut calls = Vec::with_capacity(self.calls.len());
        for partial in self.calls {
            let Some(name) = partial.name else {
                // Unreachable via push(), but a hole in the index space
                // (e.g. only index 1 was ever sent) lands here.
                return Err(Error::generation("tool call stream left an unnamed call"));
            };
            let arguments: JsonMap<String, Value> = if partial.arguments.trim().is_empty() {
                JsonMap::new()
            } else {
                serde_json::from_str(&partial.arguments).map_err(|e| {
                    Error::generation(format!("malformed tool call arguments for '{name}': {e}"))
                })?
            };
            let mut call = ToolCall::new(name, arguments);
            call.id = partial.id;
            calls.push(call);
        }
        Ok((self.text, calls))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn delta(index: usize, name: Option<&str>, arguments: &str) -> StreamChunk {
        StreamChunk::ToolCallDelta(ToolCallDelta {
            index,
            id: None,
            name: name.map(str::to_owned),
            arguments: arguments.to_owned(),
        })
    }

    #[test]
    fn tool_messages_carry_call_ids() {
        let msg = MemoryMessage::tool("call-1", "42");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call-1"));
    }

    #[test]
    fn accumulator_reassembles_split_arguments() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(&delta(0, Some("search"), r#"{"qu"#)).expect("first fragment");
        acc.push(&delta(0, None, r#"ery": "rust"}"#)).expect("second fragment");
        acc.push(&StreamChunk::Done).expect("done");
        let (_, calls) = acc.finish().expect("complete call");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "search");
        assert_eq!(calls[0].arguments["query"], "rust");
    }

    #[test]
    fn interleaved_indices_accumulate_independently() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(&delta(0, Some("alpha"), r#"{"a":"#)).expect("alpha open");
        acc.push(&delta(1, Some("beta"), "{}")).expect("beta complete");
        acc.push(&delta(0, None, "1}")).expect("alpha close");
        let (_, calls) = acc.finish().expect("both calls");
        assert_eq!(calls[0].name, "alpha");
        assert_eq!(calls[1].name, "beta");
    }

    #[test]
    fn nameless_delta_is_a_protocol_violation() {
        let mut acc = ToolCallAccumulator::new();
        let err = acc
            .push(&delta(0, None, "{}"))
            .expect_err("no name ever arrived for index 0");
        assert_eq!(err.kind(), ErrorKind::Generation);
    }

    #[test]
    fn text_deltas_concatenate() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(&StreamChunk::TextDelta("Hello, ".into())).expect("text");
        acc.push(&StreamChunk::TextDelta("world".into())).expect("text");
        let (text, calls) = acc.finish().expect("no calls");
        assert_eq!(text, "Hello, world");
        assert!(calls.is_empty());
    }
}
