//! Token usage accounting.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

/// Token usage statistics from a model call.
///
/// The total is always computed from the two counters rather than stored,
/// so merged values can never drift out of agreement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the input/prompt.
    pub input_tokens: u32,
    /// Number of tokens in the output/completion.
    pub output_tokens: u32,
}

impl TokenUsage {
    /// Create new token usage with the given counts.
    #[must_use]
    pub const fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Total tokens used (input + output).
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    /// Merge two optional usages, summing when both are present.
    #[must_use]
    pub fn merge(a: Option<Self>, b: Option<Self>) -> Option<Self> {
        match (a, b) {
            (Some(a), Some(b)) => Some(a + b),
            (Some(v), None) | (None, Some(v)) => Some(v),
            (None, None) => None,
        }
    }
}

impl Add for TokenUsage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_is_computed() {
        let usage = TokenUsage::new(120, 30);
        assert_eq!(usage.total(), 150);
    }

    #[test]
    fn merge_handles_missing_sides() {
        let some = Some(TokenUsage::new(10, 5));
        assert_eq!(TokenUsage::merge(some, None), some);
        assert_eq!(TokenUsage::merge(None, some), some);
        assert_eq!(TokenUsage::merge(None, None), None);
        assert_eq!(
            TokenUsage::merge(some, some).map(|u| u.total()),
            Some(30)
        );
    }
}
