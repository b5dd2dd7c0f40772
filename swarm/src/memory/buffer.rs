//! In-memory buffers backed by `tokio::sync::RwLock`.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::message::MemoryMessage;

use super::Memory;

// Rough chars-per-token estimate used to honor token limits without a
// tokenizer dependency.
const CHARS_PER_TOKEN: usize = 4;

/// Unbounded in-memory history.
///
/// Concurrent readers may retrieve history simultaneously; writes acquire
/// exclusive access. All data is lost when the value is dropped.
#[derive(Debug, Default)]
pub struct BufferMemory {
    messages: RwLock<Vec<MemoryMessage>>,
}

impl BufferMemory {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer pre-populated with `messages`.
    #[must_use]
    pub fn with_messages(messages: Vec<MemoryMessage>) -> Self {
        Self {
            messages: RwLock::new(messages),
        }
    }
}

#[async_trait]
impl Memory for BufferMemory {
    async fn append(&self, message: MemoryMessage) -> Result<()> {
        self.messages.write().await.push(message);
        Ok(())
    }

    async fn context(&self, _query: &str, token_limit: usize) -> Result<String> {
        let messages = self.messages.read().await;
        Ok(render_bounded(&messages, token_limit))
    }

    async fn all_messages(&self) -> Result<Vec<MemoryMessage>> {
        Ok(self.messages.read().await.clone())
    }

    async fn clear(&self) -> Result<()> {
        self.messages.write().await.clear();
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.messages.read().await.len())
    }
}

/// History that retains only the most recent `window` messages.
#[derive(Debug)]
pub struct WindowBufferMemory {
    window: usize,
    messages: RwLock<Vec<MemoryMessage>>,
}

impl WindowBufferMemory {
    /// Create a window of the given size. A zero window is treated as 1.
    #[must_use]
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            messages: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Memory for WindowBufferMemory {
    async fn append(&self, message: MemoryMessage) -> Result<()> {
        let mut messages = self.messages.write().await;
        messages.push(message);
        let len = messages.len();
        if len > self.window {
            messages.drain(..len - self.window);
        }
        Ok(())
    }

    async fn context(&self, _query: &str, token_limit: usize) -> Result<String> {
        let messages = self.messages.read().await;
        Ok(render_bounded(&messages, token_limit))
    }

    async fn all_messages(&self) -> Result<Vec<MemoryMessage>> {
        Ok(self.messages.read().await.clone())
    }

    async fn clear(&self) -> Result<()> {
        self.messages.write().await.clear();
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.messages.read().await.len())
    }
}

/// Render newest-last lines within the budget, dropping whole messages
/// from the front when the rendered form would exceed it.
fn render_bounded(messages: &[MemoryMessage], token_limit: usize) -> String {
    let char_budget = token_limit.saturating_mul(CHARS_PER_TOKEN);
    let mut lines: Vec<String> = Vec::new();
    let mut used = 0;
    for message in messages.iter().rev() {
        let line = format!("{}: {}", message.role, message.content);
        let cost = line.len() + 1;
        if used + cost > char_budget {
            break;
        }
        used += cost;
        lines.push(line);
    }
    lines.reverse();
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clear_resets_count_and_context() {
        let memory = BufferMemory::new();
        memory.append(MemoryMessage::user("hello")).await.expect("append");
        memory.append(MemoryMessage::assistant("hi")).await.expect("append");
        assert_eq!(memory.count().await.expect("count"), 2);

        memory.clear().await.expect("clear");
        assert_eq!(memory.count().await.expect("count"), 0);
        assert_eq!(memory.context("anything", 1000).await.expect("context"), "");
    }

    #[tokio::test]
    async fn context_respects_token_limit() {
        let memory = BufferMemory::new();
        for i in 0..50 {
            memory
                .append(MemoryMessage::user(format!("message number {i}")))
                .await
                .expect("append");
        }
        let context = memory.context("q", 10).await.expect("context");
        assert!(context.len() <= 10 * CHARS_PER_TOKEN);
        // The newest message survives truncation from the front.
        assert!(context.contains("49"));
    }

    #[tokio::test]
    async fn window_drops_oldest_messages() {
        let memory = WindowBufferMemory::new(3);
        for i in 0..5 {
            memory
                .append(MemoryMessage::user(format!("m{i}")))
                .await
                .expect("append");
        }
        let messages = memory.all_messages().await.expect("messages");
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["m2", "m3", "m4"]);
    }
}
