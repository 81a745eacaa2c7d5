//! The LLM gateway port.
//!
//! The engine never talks to a provider directly. Every LLM interaction
//! goes through [`LlmGateway::call_with_scene`]: the *scene name* selects a
//! prompt template together with a pre-declared model, temperature, top-p,
//! and output-parsing policy, all of which live on the gateway side. A node
//! contributes only the template variables derived from the
//! [`ConversationContext`](crate::hireflow::model::ConversationContext) and
//! pattern-matches the parsed result.
//!
//! Implementations must be `Send + Sync` so a single gateway instance can be
//! shared across concurrently executing turns, and must map their provider's
//! failures onto the [`LlmError`](crate::hireflow::error::LlmError) taxonomy
//! since the engine's retry logic keys off that sum, never off provider strings.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::hireflow::error::LlmError;

/// Stable scene names the engine calls. The external scene registry must
/// provide a template and model configuration for each of these.
///
/// Node names and scene names coincide by convention (one node, one scene),
/// so these constants double as node names throughout the crate. Selection
/// logic always compares against these constants, never against legacy
/// short codes.
pub mod scenes {
    /// `{"transfer": "YES"|"NO"}`: did the candidate ask for a human?
    pub const TRANSFER_HUMAN_INTENT: &str = "transfer_human_intent";
    /// `{"分数": 0..3, "原因": string}`: sentiment score for the last turns.
    pub const CANDIDATE_EMOTION: &str = "candidate_emotion";
    /// `{"willing": "YES"|"NO"}`: does the candidate want to keep talking?
    pub const CONTINUE_CONVERSATION: &str = "continue_conversation_with_candidate";
    /// `{"result": "YES"|"NO"}`: did the last message contain a question?
    pub const CANDIDATE_ASK_QUESTION: &str = "candidate_ask_question";
    /// Raw string; the literal `"not_found"` means the knowledge base had
    /// no usable answer.
    pub const ANSWER_BASED_ON_KNOWLEDGE: &str = "answer_based_on_knowledge";
    /// `{"answer": string, "issue_class"?: string}`: free-form reply when
    /// the knowledge base came up empty.
    pub const ANSWER_WITHOUT_KNOWLEDGE: &str = "answer_without_knowledge";
    /// `{"newReply": string}`: small talk.
    pub const CASUAL_CONVERSATION: &str = "casual_conversation";
    /// `{"newReply": string}`: warm closing sentence.
    pub const HIGH_EQ_RESPONSE: &str = "high_eq_response";
    /// Raw string; re-engagement opener used across turns.
    pub const RESUME_CONVERSATION: &str = "resume_conversation";
    /// `{"result": "A".."E"}`: relevance of the answer to the current
    /// assessment question.
    pub const RELEVANCE_REPLY_AND_QUESTION: &str = "relevance_reply_and_question";
    /// `{"result": "YES"|"NO"|"QUESTION"}`: does the answer satisfy the
    /// evaluation criteria?
    pub const REPLY_MATCH_QUESTION_REQUIREMENT: &str = "reply_match_question_requirement";
    /// `{"result": "YES"|"NO"}`: willingness for a non-assessment question.
    pub const QUESTION_WILLINGNESS: &str = "candidate_communication_willingness_for_question";
    /// Pure-DB node, registered for uniformity; no prompt template exists.
    pub const INFORMATION_GATHERING_QUESTION: &str = "information_gathering_question";
}

/// What a scene call produced: parsed JSON for scenes configured with
/// `json_output = true`, the raw completion text otherwise.
#[derive(Debug, Clone)]
pub enum LlmResponse {
    Json(Value),
    Text(String),
}

impl LlmResponse {
    /// Borrow the parsed JSON value, if this is a JSON response.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            LlmResponse::Json(value) => Some(value),
            LlmResponse::Text(_) => None,
        }
    }

    /// Borrow the raw text, if this is a text response.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            LlmResponse::Text(text) => Some(text),
            LlmResponse::Json(_) => None,
        }
    }

    /// Render the response back to a string for observability (fallback
    /// `data`, logs). Never shown to the candidate.
    pub fn raw_string(&self) -> String {
        match self {
            LlmResponse::Json(value) => value.to_string(),
            LlmResponse::Text(text) => text.clone(),
        }
    }
}

/// Per-call overrides for a scene's pre-declared configuration.
///
/// The engine itself always passes `None` (model choice and sampling
/// parameters belong to the scene registry), but callers embedding the
/// engine can use this to pin a model or force raw-text output for a
/// one-off call.
#[derive(Debug, Clone, Default)]
pub struct SceneOverrides {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_completion_tokens: Option<u32>,
    pub system_prompt: Option<String>,
    pub parse_json: Option<bool>,
}

/// Provider-agnostic LLM gateway the engine depends on.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Render the scene's prompt template with `template_vars`, call the
    /// configured model, and return the parsed result.
    ///
    /// Implementations should honour task cancellation at their I/O awaits:
    /// when a speculative branch is abandoned the engine aborts the task
    /// without waiting for the in-flight request.
    async fn call_with_scene(
        &self,
        scene_name: &str,
        template_vars: &Map<String, Value>,
        overrides: Option<&SceneOverrides>,
    ) -> Result<LlmResponse, LlmError>;
}
