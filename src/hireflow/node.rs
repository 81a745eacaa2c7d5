//! The node abstraction and its execution driver.
//!
//! A node is the smallest executable unit of the flow: one LLM scene or one
//! pure-DB decision, mapped to a [`NodeResult`]. Implementations provide
//! [`Node::do_execute`] (and usually override [`Node::fallback`]); the
//! provided [`Node::execute`] wraps every run with the common machinery:
//!
//! 1. wall-clock timing stamped into `execution_time_ms`;
//! 2. a bounded retry loop over *transient* LLM failures (rate limits,
//!    timeouts, transport 5xx, malformed output) with `2^attempt`-second
//!    exponential backoff, capped at [`BACKOFF_CAP_SECS`];
//! 3. the node's domain-safe fallback once retries are exhausted, stamped
//!    with `is_fallback` and a technical `fallback_reason`.
//!
//! Non-LLM errors (repository failures, programmer errors) are never
//! retried and propagate to the caller. Nodes hold no per-turn state
//! (everything they need arrives on the [`ConversationContext`]), so a
//! single instance is safely shared across concurrent turns.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::hireflow::error::{FlowError, LlmError};
use crate::hireflow::gateway::{LlmGateway, LlmResponse};
use crate::hireflow::knowledge::KnowledgeSearch;
use crate::hireflow::model::{ConversationContext, NodeAction, NodeResult};
use crate::hireflow::repo::{ConversationRepo, JobQuestionRepo, QuestionTrackingRepo};

/// Default number of attempts per node: one try plus one retry.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// Upper bound on a single backoff sleep, in seconds.
pub const BACKOFF_CAP_SECS: u64 = 8;

/// The external collaborators nodes are built from. Cloned freely; every
/// field is an `Arc` handle.
#[derive(Clone)]
pub struct FlowDeps {
    pub gateway: Arc<dyn LlmGateway>,
    pub knowledge: Arc<dyn KnowledgeSearch>,
    pub job_questions: Arc<dyn JobQuestionRepo>,
    pub tracking: Arc<dyn QuestionTrackingRepo>,
    pub conversations: Arc<dyn ConversationRepo>,
}

/// A single executable unit of the conversation flow.
#[async_trait]
pub trait Node: Send + Sync {
    /// Stable node name; by convention equal to the LLM scene name.
    fn name(&self) -> &str;

    /// Scene this node calls. Defaults to [`Node::name`].
    fn scene_name(&self) -> &str {
        self.name()
    }

    /// Attempt budget for transient LLM failures.
    fn max_attempts(&self) -> u32 {
        DEFAULT_MAX_ATTEMPTS
    }

    /// The node's core logic. Must not mutate the context; enrich a private
    /// copy instead.
    async fn do_execute(&self, ctx: &ConversationContext) -> Result<NodeResult, FlowError>;

    /// Domain-safe default once retries are exhausted. The base default
    /// suspends the conversation for a human; nodes override this with the
    /// safest action for their role (fail open, assume cooperation, take
    /// the low-risk branch).
    fn fallback(&self, ctx: &ConversationContext, error: &LlmError) -> NodeResult {
        let _ = ctx;
        let mut result = NodeResult::new(self.name(), NodeAction::Suspend)
            .with_reason("system busy, please retry later");
        attach_error_data(&mut result, error);
        result
    }

    /// Run the node with timing, retries, and fallback. This is what the
    /// executor and the groups call; `do_execute` is never invoked directly
    /// from outside.
    async fn execute(&self, ctx: &ConversationContext) -> Result<NodeResult, FlowError> {
        let started = Instant::now();
        let max_attempts = self.max_attempts().max(1);
        let mut last_error: Option<LlmError> = None;

        log::debug!(
            "node {} started (conversation {}, stage {})",
            self.name(),
            ctx.conversation_id,
            ctx.stage.as_str()
        );

        for attempt in 0..max_attempts {
            match self.do_execute(ctx).await {
                Ok(mut result) => {
                    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                    result.execution_time_ms = Some(elapsed_ms);
                    log::info!(
                        "node {} completed: action={:?} attempt={} elapsed={:.1}ms",
                        self.name(),
                        result.action,
                        attempt + 1,
                        elapsed_ms
                    );
                    return Ok(result);
                }
                Err(FlowError::Llm(err)) if err.is_transient() => {
                    if attempt + 1 < max_attempts {
                        let wait_secs = (1u64 << attempt).min(BACKOFF_CAP_SECS);
                        log::warn!(
                            "node {} transient LLM failure (attempt {}/{}), retrying in {}s: {}",
                            self.name(),
                            attempt + 1,
                            max_attempts,
                            wait_secs,
                            err
                        );
                        tokio::time::sleep(Duration::from_secs(wait_secs)).await;
                    } else {
                        log::error!(
                            "node {} exhausted {} attempts: {}",
                            self.name(),
                            max_attempts,
                            err
                        );
                    }
                    last_error = Some(err);
                }
                Err(other) => {
                    log::error!(
                        "node {} failed with non-retryable error: {}",
                        self.name(),
                        other
                    );
                    return Err(other);
                }
            }
        }

        let error = match last_error {
            Some(error) => error,
            // max_attempts >= 1 guarantees at least one loop iteration, and
            // every iteration either returns or records the error.
            None => LlmError::Transport {
                status: None,
                message: "node produced neither a result nor an error".into(),
            },
        };

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let mut result = self.fallback(ctx, &error);
        result.is_fallback = true;
        if result.fallback_reason.is_none() {
            result.fallback_reason = Some(error.to_string());
        }
        result.execution_time_ms = Some(elapsed_ms);
        log::warn!(
            "node {} fallback engaged after {} attempts: action={:?} ({})",
            self.name(),
            max_attempts,
            result.action,
            error
        );
        Ok(result)
    }
}

/// Call the node's scene with the context's template variables.
pub(crate) async fn call_llm(
    gateway: &Arc<dyn LlmGateway>,
    ctx: &ConversationContext,
    scene_name: &str,
) -> Result<LlmResponse, FlowError> {
    let template_vars = ctx.template_vars();
    gateway
        .call_with_scene(scene_name, &template_vars, None)
        .await
        .map_err(FlowError::Llm)
}

/// Build the conformance error for an LLM answer that is missing a field or
/// carries a value outside its closed set. Transient: the next sample may
/// be in-spec, so the driver grants one more attempt before falling back.
pub(crate) fn conformance_error(
    message: impl Into<String>,
    response: &LlmResponse,
) -> FlowError {
    FlowError::Llm(LlmError::ResponseFormat {
        message: message.into(),
        raw_response: response.raw_string(),
    })
}

/// Record the technical failure on a fallback result's `data` for
/// observability. The raw LLM output rides along when the failure was a
/// conformance error.
pub(crate) fn attach_error_data(result: &mut NodeResult, error: &LlmError) {
    result
        .data
        .insert("internal_error".into(), Value::String(error.to_string()));
    if let LlmError::ResponseFormat { raw_response, .. } = error {
        result
            .data
            .insert("raw_response".into(), Value::String(raw_response.clone()));
    }
    result.fallback_reason = Some(error.to_string());
}

/// Extract a string field from a JSON response, trimmed and uppercased for
/// closed-set matching.
pub(crate) fn field_upper(response: &LlmResponse, key: &str) -> Option<String> {
    response
        .as_json()
        .and_then(|value| value.get(key))
        .and_then(|value| value.as_str())
        .map(|value| value.trim().to_uppercase())
}

/// Extract a string field verbatim.
pub(crate) fn field_string(response: &LlmResponse, key: &str) -> Option<String> {
    response
        .as_json()
        .and_then(|value| value.get(key))
        .and_then(|value| value.as_str())
        .map(|value| value.to_string())
}

/// Extract an integer field, tolerating models that quote their numbers.
pub(crate) fn field_i64(response: &LlmResponse, key: &str) -> Option<i64> {
    let value = response.as_json()?.get(key)?;
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    value.as_str()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_helpers_tolerate_shapes() {
        let response = LlmResponse::Json(json!({
            "transfer": "  yes ",
            "分数": "2",
            "score": 3,
            "answer": "好的"
        }));
        assert_eq!(field_upper(&response, "transfer").as_deref(), Some("YES"));
        assert_eq!(field_i64(&response, "分数"), Some(2));
        assert_eq!(field_i64(&response, "score"), Some(3));
        assert_eq!(field_string(&response, "answer").as_deref(), Some("好的"));
        assert_eq!(field_upper(&response, "missing"), None);

        let text = LlmResponse::Text("not json".into());
        assert_eq!(field_upper(&text, "transfer"), None);
    }

    #[test]
    fn conformance_error_keeps_raw_response() {
        let response = LlmResponse::Json(json!({"unexpected": true}));
        let err = conformance_error("missing transfer field", &response);
        match err {
            FlowError::Llm(LlmError::ResponseFormat { raw_response, .. }) => {
                assert!(raw_response.contains("unexpected"));
            }
            other => panic!("unexpected error shape: {:?}", other),
        }
    }
}
