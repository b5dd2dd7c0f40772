//! Error types for the swarm framework.
//!
//! One crate-level [`Error`] carries the whole taxonomy so callers can match
//! on a single type; [`ResumeError`] and [`ExternalWriteError`] are nested
//! because they form closed sub-taxonomies of their own. Errors are
//! equatable by [`ErrorKind`]; display messages are human-readable and not
//! part of any stability contract.

use std::time::Duration;

use serde_json::Value;

use crate::graph::GraphViolation;
use crate::guardrail::GuardrailStage;

/// A type alias for `Result<T, Error>`.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The main error type for swarm operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid configuration values rejected at construction.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration issue.
        message: String,
    },

    /// A step tree failed graph validation.
    #[error("invalid graph: {0}")]
    InvalidGraph(GraphViolation),

    /// Tool arguments did not match the tool's parameter schema.
    #[error("invalid arguments for tool '{tool}': {message}")]
    InvalidToolArguments {
        /// Name of the tool whose schema was violated.
        tool: String,
        /// What was missing or mismatched.
        message: String,
    },

    /// A tool with this name is already registered.
    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),

    /// A call targeted a name absent from the registry.
    #[error("tool '{0}' not found")]
    ToolNotFound(String),

    /// A tool execution failed.
    #[error("tool '{tool}' failed: {message}")]
    ToolExecutionFailed {
        /// Name of the tool that failed.
        tool: String,
        /// The underlying failure.
        message: String,
    },

    /// No inference provider is resolvable.
    #[error("no inference provider available")]
    ProviderUnavailable,

    /// The provider surfaced an error, or the requested capability is
    /// unsupported (e.g. tool-call streaming).
    #[error("generation failed: {message}")]
    Generation {
        /// The provider-side reason.
        message: String,
    },

    /// The agent loop exhausted its iteration budget.
    #[error("maximum iterations reached ({0})")]
    MaxIterationsReached(usize),

    /// A guardrail tripwire fired. Terminal; never recovered locally.
    #[error("guardrail '{guardrail}' tripped at {stage}: {message}")]
    GuardrailTripwire {
        /// Name of the guardrail that tripped.
        guardrail: String,
        /// Which phase it was inspecting.
        stage: GuardrailStage,
        /// The tripwire message.
        message: String,
        /// Optional structured diagnostic payload.
        info: Option<Value>,
    },

    /// The run was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// An operation exceeded its time budget.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// A workflow paused for an interrupt while running through `run()`.
    ///
    /// `run_with_outcome()` returns the interrupt handle instead of this.
    #[error("workflow interrupted: {reason}")]
    WorkflowInterrupted {
        /// The recorded interruption reason.
        reason: String,
    },

    /// A resume attempt was rejected.
    #[error(transparent)]
    Resume(#[from] ResumeError),

    /// An out-of-band channel write was rejected.
    #[error(transparent)]
    ExternalWrite(#[from] ExternalWriteError),

    /// The circuit breaker is open and rejecting calls.
    #[error("circuit breaker is open")]
    CircuitBreakerOpen,

    /// All retry attempts were exhausted.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The error from the final attempt.
        last: Box<Error>,
    },

    /// Every step of a fallback chain failed.
    #[error("all {} fallbacks failed", .0.len())]
    AllFallbacksFailed(Vec<Error>),

    /// A rate limit rejected the request outright.
    #[error("rate limit exceeded")]
    RateLimitExceeded,

    /// JSON serialization/deserialization error.
    #[error("json error: {message}")]
    Json {
        /// The underlying error message.
        message: String,
    },

    /// Checkpoint store I/O failure.
    #[error("checkpoint store error: {message}")]
    CheckpointStore {
        /// The underlying store failure.
        message: String,
    },
}

/// Why a resume attempt was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ResumeError {
    /// No interrupt is pending, or the handle was already consumed.
    #[error("no interrupt to resume")]
    NoInterruptToResume,

    /// The handle's interrupt id does not match the pending interrupt.
    #[error("resume handle does not match the pending interrupt")]
    ResumeInterruptMismatch,

    /// No checkpoint exists for the workflow being resumed.
    #[error("no checkpoint to resume from")]
    NoCheckpointToResume,

    /// The checkpoint was written by a different event-schema version.
    #[error("incompatible event schema version: expected {expected}, found {found}")]
    IncompatibleSchemaVersion {
        /// The version this engine speaks.
        expected: String,
        /// The version recorded in the checkpoint.
        found: String,
    },

    /// The checkpoint failed to deserialize or is internally inconsistent.
    #[error("checkpoint corrupt: {message}")]
    CheckpointCorrupt {
        /// What failed while decoding the checkpoint.
        message: String,
    },
}

/// Why an out-of-band channel write was rejected.
///
/// Validation is all-or-nothing: a batch containing any rejected write
/// commits nothing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ExternalWriteError {
    /// The named channel is not declared by the workflow.
    #[error("unknown channel '{0}'")]
    UnknownChannel(String),

    /// A task-local write targeted a shared (global) channel.
    #[error("task-local write not allowed on shared channel '{0}'")]
    TaskLocalWriteNotAllowed(String),

    /// The value does not match the channel's declared type.
    #[error("type mismatch on channel '{channel}': expected {expected}, found {found}")]
    ChannelTypeMismatch {
        /// The channel that rejected the write.
        channel: String,
        /// The declared value type.
        expected: String,
        /// The type of the offered value.
        found: String,
    },

    /// A `single` update-policy channel was already written this turn.
    #[error("channel '{0}' only accepts a single write per turn")]
    UpdatePolicyViolation(String),

    /// A pending interrupt blocks external writes.
    #[error("external writes are blocked while an interrupt is pending")]
    InterruptPending,
}

/// Coarse classification of an [`Error`], used for equatable-by-kind
/// comparisons in tests and retry predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// [`Error::Configuration`].
    Configuration,
    /// [`Error::InvalidGraph`].
    InvalidGraph,
    /// [`Error::InvalidToolArguments`].
    InvalidToolArguments,
    /// [`Error::DuplicateTool`].
    DuplicateTool,
    /// [`Error::ToolNotFound`].
    ToolNotFound,
    /// [`Error::ToolExecutionFailed`].
    ToolExecutionFailed,
    /// [`Error::ProviderUnavailable`].
    ProviderUnavailable,
    /// [`Error::Generation`].
    Generation,
    /// [`Error::MaxIterationsReached`].
    MaxIterationsReached,
    /// [`Error::GuardrailTripwire`].
    GuardrailTripwire,
    /// [`Error::Cancelled`].
    Cancelled,
    /// [`Error::Timeout`].
    Timeout,
    /// [`Error::WorkflowInterrupted`].
    WorkflowInterrupted,
    /// [`Error::Resume`].
    Resume,
    /// [`Error::ExternalWrite`].
    ExternalWrite,
    /// [`Error::CircuitBreakerOpen`].
    CircuitBreakerOpen,
    /// [`Error::RetriesExhausted`].
    RetriesExhausted,
    /// [`Error::AllFallbacksFailed`].
    AllFallbacksFailed,
    /// [`Error::RateLimitExceeded`].
    RateLimitExceeded,
    /// [`Error::Json`].
    Json,
    /// [`Error::CheckpointStore`].
    CheckpointStore,
}

impl Error {
    /// The coarse kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::InvalidGraph(_) => ErrorKind::InvalidGraph,
            Self::InvalidToolArguments { .. } => ErrorKind::InvalidToolArguments,
            Self::DuplicateTool(_) => ErrorKind::DuplicateTool,
            Self::ToolNotFound(_) => ErrorKind::ToolNotFound,
            Self::ToolExecutionFailed { .. } => ErrorKind::ToolExecutionFailed,
            Self::ProviderUnavailable => ErrorKind::ProviderUnavailable,
            Self::Generation { .. } => ErrorKind::Generation,
            Self::MaxIterationsReached(_) => ErrorKind::MaxIterationsReached,
            Self::GuardrailTripwire { .. } => ErrorKind::GuardrailTripwire,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::WorkflowInterrupted { .. } => ErrorKind::WorkflowInterrupted,
            Self::Resume(_) => ErrorKind::Resume,
            Self::ExternalWrite(_) => ErrorKind::ExternalWrite,
            Self::CircuitBreakerOpen => ErrorKind::CircuitBreakerOpen,
            Self::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            Self::AllFallbacksFailed(_) => ErrorKind::AllFallbacksFailed,
            Self::RateLimitExceeded => ErrorKind::RateLimitExceeded,
            Self::Json { .. } => ErrorKind::Json,
            Self::CheckpointStore { .. } => ErrorKind::CheckpointStore,
        }
    }

    /// Create a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new generation error.
    #[must_use]
    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
        }
    }

    /// Create a new tool execution error.
    #[must_use]
    pub fn tool_execution(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecutionFailed {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a new invalid-arguments error.
    #[must_use]
    pub fn invalid_arguments(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidToolArguments {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a new checkpoint store error.
    #[must_use]
    pub fn checkpoint_store(message: impl Into<String>) -> Self {
        Self::CheckpointStore {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}
