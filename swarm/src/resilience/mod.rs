//! Resilience: retry, circuit breaking, rate limiting, fallback, timeout.
//!
//! Each primitive composes around any failable async operation; the agent
//! loop and graph engine wrap provider and tool calls with them. Inputs
//! outside valid ranges are sanitized to safe defaults rather than
//! allowed to hang.

mod breaker;
mod fallback;
mod rate_limit;
mod retry;
mod timeout;

pub use breaker::{BreakerState, CircuitBreaker};
pub use fallback::{FallbackChain, FallbackStep};
pub use rate_limit::RateLimiter;
pub use retry::{BackoffStrategy, RetryPolicy};
pub use timeout::with_timeout;
