//! Per-run pointer table for oversized content.
//!
//! Pointers are monotonic within a run (`ptr-1`, `ptr-2`, …); they are not
//! collision-resistant across runs and do not need to be. The planner is
//! the single producer; the `resolve_pointer` tool is a concurrent reader.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// A reference record substituted for oversized content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPointer {
    /// Pointer id, unique within the run.
    pub pointer_id: String,
    /// The first characters of the original content.
    pub preview: String,
    /// Size of the original content in bytes.
    pub size: usize,
}

/// Stores original content keyed by pointer id.
#[derive(Debug, Default)]
pub struct PointerTable {
    entries: Mutex<HashMap<String, String>>,
    counter: AtomicU64,
}

impl PointerTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `content`, returning its pointer record.
    pub fn intern(&self, content: &str, preview_max_chars: usize) -> ContentPointer {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let pointer_id = format!("ptr-{n}");
        let preview: String = content.chars().take(preview_max_chars).collect();
        let pointer = ContentPointer {
            pointer_id: pointer_id.clone(),
            preview,
            size: content.len(),
        };
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(pointer_id, content.to_owned());
        pointer
    }

    /// Retrieve the original content for `pointer_id`.
    #[must_use]
    pub fn resolve(&self, pointer_id: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(pointer_id)
            .cloned()
    }

    /// Number of interned entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointers_are_monotonic_and_resolvable() {
        let table = PointerTable::new();
        let big = "x".repeat(5000);
        let p1 = table.intern(&big, 32);
        let p2 = table.intern("other content", 32);
        assert_eq!(p1.pointer_id, "ptr-1");
        assert_eq!(p2.pointer_id, "ptr-2");
        assert_eq!(p1.size, 5000);
        assert_eq!(p1.preview.len(), 32);
        assert_eq!(table.resolve("ptr-1").expect("interned"), big);
        assert!(table.resolve("ptr-99").is_none());
    }

    #[test]
    fn preview_counts_chars_not_bytes() {
        let table = PointerTable::new();
        let content = "é".repeat(100);
        let pointer = table.intern(&content, 10);
        assert_eq!(pointer.preview.chars().count(), 10);
        assert_eq!(pointer.size, 200);
    }
}
