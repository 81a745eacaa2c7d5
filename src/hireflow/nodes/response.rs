//! Response-group nodes: the conversational reply path.
//!
//! Willingness gate → question detection → knowledge answer / free-form
//! fallback / small talk. The knowledge node is the only one here that
//! touches an external service besides the gateway; it enriches a *copy*
//! of the context with its search hits so the sibling branch racing it in
//! parallel never observes them.

use async_trait::async_trait;
use std::sync::Arc;

use crate::hireflow::error::{FlowError, LlmError};
use crate::hireflow::gateway::{scenes, LlmGateway, LlmResponse};
use crate::hireflow::knowledge::{KnowledgeSearch, DEFAULT_TOP_K};
use crate::hireflow::model::{ConversationContext, NodeAction, NodeResult};
use crate::hireflow::node::{
    attach_error_data, call_llm, conformance_error, field_string, field_upper, Node,
};

/// Fixed candidate-safe reply when even the free-form answer scene fails.
pub const APOLOGY_REPLY: &str = "抱歉，这个问题我需要进一步确认，稍后给您答复。";

/// Does the candidate want to keep talking?
///
/// Scene output: `{"willing": "YES"|"NO"}`. Skipped entirely by the group
/// once the conversation is past the greeting stage.
pub struct ContinueConversationNode {
    gateway: Arc<dyn LlmGateway>,
}

impl ContinueConversationNode {
    pub fn new(gateway: Arc<dyn LlmGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Node for ContinueConversationNode {
    fn name(&self) -> &str {
        scenes::CONTINUE_CONVERSATION
    }

    async fn do_execute(&self, ctx: &ConversationContext) -> Result<NodeResult, FlowError> {
        let response = call_llm(&self.gateway, ctx, self.scene_name()).await?;

        let willing = match field_upper(&response, "willing") {
            Some(value) => value,
            None => return Err(conformance_error("missing willing field", &response)),
        };

        match willing.as_str() {
            "YES" => Ok(NodeResult::new(self.name(), NodeAction::NextNode)
                .with_next(&[scenes::CANDIDATE_ASK_QUESTION])
                .with_data("willing", true)),
            "NO" => Ok(NodeResult::new(self.name(), NodeAction::NextNode)
                .with_next(&[scenes::HIGH_EQ_RESPONSE])
                .with_reason("candidate shows little interest in continuing")
                .with_data("willing", false)),
            other => Err(conformance_error(
                format!("willing value out of range: {}", other),
                &response,
            )),
        }
    }

    /// Assume cooperation; a dead classifier must not end the conversation.
    fn fallback(&self, _ctx: &ConversationContext, error: &LlmError) -> NodeResult {
        let mut result = NodeResult::new(self.name(), NodeAction::NextNode)
            .with_next(&[scenes::CANDIDATE_ASK_QUESTION])
            .with_data("willing", true);
        attach_error_data(&mut result, error);
        result
    }
}

/// Did the last candidate message contain a question?
///
/// Scene output: `{"result": "YES"|"NO"}`.
pub struct AskQuestionNode {
    gateway: Arc<dyn LlmGateway>,
}

impl AskQuestionNode {
    pub fn new(gateway: Arc<dyn LlmGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Node for AskQuestionNode {
    fn name(&self) -> &str {
        scenes::CANDIDATE_ASK_QUESTION
    }

    async fn do_execute(&self, ctx: &ConversationContext) -> Result<NodeResult, FlowError> {
        let response = call_llm(&self.gateway, ctx, self.scene_name()).await?;

        let result = match field_upper(&response, "result") {
            Some(value) => value,
            None => return Err(conformance_error("missing result field", &response)),
        };

        if result == "YES" || result.contains("YES") {
            return Ok(NodeResult::new(self.name(), NodeAction::NextNode)
                .with_next(&[scenes::ANSWER_BASED_ON_KNOWLEDGE])
                .with_data("is_question", true));
        }
        if result == "NO" || result.contains("NO") {
            return Ok(NodeResult::new(self.name(), NodeAction::NextNode)
                .with_next(&[scenes::CASUAL_CONVERSATION])
                .with_data("is_question", false));
        }

        Err(conformance_error(
            format!("question detection value out of range: {}", result),
            &response,
        ))
    }

    /// Assume "not a question": small talk is safer than a hallucinated
    /// answer.
    fn fallback(&self, _ctx: &ConversationContext, error: &LlmError) -> NodeResult {
        let mut result = NodeResult::new(self.name(), NodeAction::NextNode)
            .with_next(&[scenes::CASUAL_CONVERSATION])
            .with_data("is_question", false);
        attach_error_data(&mut result, error);
        result
    }
}

/// Answer the candidate from the curated knowledge base.
///
/// Searches first; with no hits (or the scene's literal `"not_found"`)
/// yields `Continue` with `data.found = false` so the group can fall back
/// to the free-form answer.
pub struct KnowledgeAnswerNode {
    gateway: Arc<dyn LlmGateway>,
    knowledge: Arc<dyn KnowledgeSearch>,
}

impl KnowledgeAnswerNode {
    pub fn new(gateway: Arc<dyn LlmGateway>, knowledge: Arc<dyn KnowledgeSearch>) -> Self {
        Self { gateway, knowledge }
    }
}

#[async_trait]
impl Node for KnowledgeAnswerNode {
    fn name(&self) -> &str {
        scenes::ANSWER_BASED_ON_KNOWLEDGE
    }

    async fn do_execute(&self, ctx: &ConversationContext) -> Result<NodeResult, FlowError> {
        let hits = self
            .knowledge
            .search(
                &ctx.last_candidate_message,
                ctx.job_id,
                ctx.tenant_id,
                Some(ctx.conversation_id),
                DEFAULT_TOP_K,
            )
            .await?;

        if hits.is_empty() {
            return Ok(NodeResult::new(self.name(), NodeAction::Continue)
                .with_data("found", false)
                .with_data("reason", "no_knowledge_found"));
        }

        // Enrich a private copy; the original context is shared with the
        // question-detection branch running concurrently.
        let hit_count = hits.len();
        let enriched = ctx.with_knowledge_results(hits);
        let response = call_llm(&self.gateway, &enriched, self.scene_name()).await?;

        let content = match &response {
            LlmResponse::Text(text) => text.trim().to_string(),
            LlmResponse::Json(value) => match value.as_str() {
                Some(text) => text.trim().to_string(),
                None => {
                    return Err(conformance_error(
                        "knowledge answer scene must produce text",
                        &response,
                    ))
                }
            },
        };

        if content.to_lowercase().contains("not_found") {
            return Ok(NodeResult::new(self.name(), NodeAction::Continue)
                .with_data("found", false)
                .with_data("reason", "llm_not_found"));
        }

        Ok(NodeResult::send_message(self.name(), content)
            .with_data("found", true)
            .with_data("knowledge_count", hit_count as i64))
    }
}

/// Free-form reply when the knowledge base has nothing.
///
/// Scene output: `{"answer": string, "issue_class"?: string}`. Always a
/// `SendMessage`; if even this scene cannot be parsed, the fallback emits a
/// fixed apology instead of suspending.
pub struct FallbackAnswerNode {
    gateway: Arc<dyn LlmGateway>,
}

impl FallbackAnswerNode {
    pub fn new(gateway: Arc<dyn LlmGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Node for FallbackAnswerNode {
    fn name(&self) -> &str {
        scenes::ANSWER_WITHOUT_KNOWLEDGE
    }

    async fn do_execute(&self, ctx: &ConversationContext) -> Result<NodeResult, FlowError> {
        let response = call_llm(&self.gateway, ctx, self.scene_name()).await?;

        let answer = match field_string(&response, "answer") {
            Some(answer) => answer.trim().to_string(),
            None => return Err(conformance_error("missing answer field", &response)),
        };
        let issue_class = field_string(&response, "issue_class");

        let mut result = NodeResult::send_message(self.name(), answer.clone())
            .with_data("message", answer);
        if let Some(issue_class) = issue_class {
            result = result.with_data("issue_class", issue_class);
        }
        Ok(result)
    }

    /// Candidate-safe apology; the conversation keeps moving.
    fn fallback(&self, _ctx: &ConversationContext, error: &LlmError) -> NodeResult {
        let mut result = NodeResult::send_message(self.name(), APOLOGY_REPLY);
        attach_error_data(&mut result, error);
        result
    }
}

/// Small talk to keep a non-asking candidate engaged.
///
/// Scene output: `{"newReply": string}`.
pub struct CasualChatNode {
    gateway: Arc<dyn LlmGateway>,
}

impl CasualChatNode {
    pub fn new(gateway: Arc<dyn LlmGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Node for CasualChatNode {
    fn name(&self) -> &str {
        scenes::CASUAL_CONVERSATION
    }

    async fn do_execute(&self, ctx: &ConversationContext) -> Result<NodeResult, FlowError> {
        let response = call_llm(&self.gateway, ctx, self.scene_name()).await?;

        let content = match field_string(&response, "newReply") {
            Some(content) => content.trim().to_string(),
            None => return Err(conformance_error("missing newReply field", &response)),
        };

        Ok(NodeResult::send_message(self.name(), content.clone()).with_data("message", content))
    }
}
