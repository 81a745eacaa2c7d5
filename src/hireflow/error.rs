//! Error types for the conversation flow engine.
//!
//! Two sums cover everything the engine can fail with: [`LlmError`] is the
//! closed taxonomy of gateway failures that the retry logic pattern-matches
//! on, and [`FlowError`] wraps it together with the non-LLM failure modes
//! (unknown node names, invalid contexts, repository errors).
//!
//! The engine never inspects provider-specific error strings; a gateway
//! implementation is responsible for mapping its provider's failures onto
//! the [`LlmError`] variants before they reach a node.

use std::error::Error;
use std::fmt;

/// A failure raised by the LLM gateway.
///
/// The split matters for retry behaviour: [`LlmError::is_transient`] returns
/// `true` for the variants where a second attempt can plausibly succeed
/// (rate limits, timeouts, transport 5xx, and malformed output, where the next
/// sample may be in-spec). Authentication and request-validation failures
/// are permanent and are never retried.
#[derive(Debug, Clone)]
pub enum LlmError {
    /// Authentication or authorization failure (401/403). Permanent.
    Authentication(String),
    /// The provider signalled a rate limit (429), optionally with a
    /// retry-after hint in seconds.
    RateLimited {
        message: String,
        retry_after_secs: Option<u64>,
    },
    /// The request did not complete within the gateway's deadline.
    Timeout {
        message: String,
        timeout_secs: Option<f64>,
    },
    /// Transport-level failure: connection errors and HTTP 5xx responses.
    Transport {
        status: Option<u16>,
        message: String,
    },
    /// The request itself was invalid (bad parameters, unknown scene).
    /// Permanent.
    Validation(String),
    /// The LLM answered, but the answer could not be parsed into the shape
    /// the scene declares: broken JSON, a missing field, or a value outside
    /// its closed set. The raw output is kept for observability.
    ResponseFormat {
        message: String,
        raw_response: String,
    },
}

impl LlmError {
    /// Whether a retry is worth attempting for this error.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RateLimited { .. }
            | LlmError::Timeout { .. }
            | LlmError::Transport { .. }
            | LlmError::ResponseFormat { .. } => true,
            LlmError::Authentication(_) | LlmError::Validation(_) => false,
        }
    }
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::Authentication(msg) => write!(f, "authentication failed: {}", msg),
            LlmError::RateLimited {
                message,
                retry_after_secs,
            } => match retry_after_secs {
                Some(secs) => write!(f, "rate limited (retry after {}s): {}", secs, message),
                None => write!(f, "rate limited: {}", message),
            },
            LlmError::Timeout {
                message,
                timeout_secs,
            } => match timeout_secs {
                Some(secs) => write!(f, "request timed out after {}s: {}", secs, message),
                None => write!(f, "request timed out: {}", message),
            },
            LlmError::Transport { status, message } => match status {
                Some(code) => write!(f, "transport error (status {}): {}", code, message),
                None => write!(f, "transport error: {}", message),
            },
            LlmError::Validation(msg) => write!(f, "invalid request: {}", msg),
            LlmError::ResponseFormat { message, .. } => {
                write!(f, "response format error: {}", message)
            }
        }
    }
}

impl Error for LlmError {}

/// Any failure surfaced by the engine itself.
#[derive(Debug)]
pub enum FlowError {
    /// An LLM gateway failure that survived (or bypassed) the retry loop.
    Llm(LlmError),
    /// A node name was requested that the factory does not know.
    UnknownNode(String),
    /// A [`ConversationContext`](crate::hireflow::model::ConversationContext)
    /// violated its construction invariants.
    InvalidContext(String),
    /// A repository port failed. The engine has no local fallback for
    /// data-layer failures; these propagate to the caller.
    Repository(String),
    /// A spawned node task panicked or was cancelled before completion.
    TaskJoin(String),
}

impl FlowError {
    /// Short stable tag used in fallback reasons and logs, e.g.
    /// `"RepositoryError: connection refused"`.
    pub fn kind(&self) -> &'static str {
        match self {
            FlowError::Llm(_) => "LlmError",
            FlowError::UnknownNode(_) => "UnknownNodeError",
            FlowError::InvalidContext(_) => "InvalidContextError",
            FlowError::Repository(_) => "RepositoryError",
            FlowError::TaskJoin(_) => "TaskJoinError",
        }
    }
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowError::Llm(err) => write!(f, "{}", err),
            FlowError::UnknownNode(name) => write!(f, "unknown node: {}", name),
            FlowError::InvalidContext(msg) => write!(f, "invalid context: {}", msg),
            FlowError::Repository(msg) => write!(f, "repository error: {}", msg),
            FlowError::TaskJoin(msg) => write!(f, "task join error: {}", msg),
        }
    }
}

impl Error for FlowError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            FlowError::Llm(err) => Some(err),
            _ => None,
        }
    }
}

impl From<LlmError> for FlowError {
    fn from(err: LlmError) -> Self {
        FlowError::Llm(err)
    }
}
