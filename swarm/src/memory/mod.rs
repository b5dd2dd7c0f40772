//! Session memory.
//!
//! Memory implementations serialize access internally; the public API is
//! atomic `append`, bounded `context`, and `clear`. A cleared memory
//! immediately reports a zero count and produces empty context.

mod buffer;

pub use buffer::{BufferMemory, WindowBufferMemory};

use async_trait::async_trait;

use crate::error::Result;
use crate::message::MemoryMessage;

/// The capability to persist and summarize session history.
#[async_trait]
pub trait Memory: Send + Sync {
    /// Append one message.
    async fn append(&self, message: MemoryMessage) -> Result<()>;

    /// Produce a bounded textual context for `query`.
    ///
    /// `token_limit` bounds the rendered size; implementations may use a
    /// rough chars-per-token estimate.
    async fn context(&self, query: &str, token_limit: usize) -> Result<String>;

    /// All retained messages, oldest first.
    async fn all_messages(&self) -> Result<Vec<MemoryMessage>>;

    /// Drop all retained messages.
    async fn clear(&self) -> Result<()>;

    /// Number of retained messages.
    async fn count(&self) -> Result<usize> {
        Ok(self.all_messages().await?.len())
    }
}
