//! Question-stage nodes: the assessment state machine's moving parts.
//!
//! The picker is the one pure-DB node in the crate; the other three each
//! classify one aspect of the candidate's answer to the current question.

use async_trait::async_trait;
use std::sync::Arc;

use crate::hireflow::error::{FlowError, LlmError};
use crate::hireflow::gateway::{scenes, LlmGateway};
use crate::hireflow::model::{ConversationContext, NodeAction, NodeResult};
use crate::hireflow::node::{attach_error_data, call_llm, conformance_error, field_upper, Node};
use crate::hireflow::repo::{QuestionStatus, QuestionTrackingRepo};

/// Pick the next question to ask. No LLM involved.
///
/// Among tracking rows in `{ongoing, pending}`, an `ongoing` row wins over
/// a `pending` one; ties break on catalog sort order. A freshly picked
/// `pending` row is promoted to `ongoing` before the question goes out.
/// With nothing left to ask, returns `None` as the signal that the stage
/// can advance.
pub struct QuestionHandlerNode {
    tracking: Arc<dyn QuestionTrackingRepo>,
}

impl QuestionHandlerNode {
    pub fn new(tracking: Arc<dyn QuestionTrackingRepo>) -> Self {
        Self { tracking }
    }
}

#[async_trait]
impl Node for QuestionHandlerNode {
    fn name(&self) -> &str {
        scenes::INFORMATION_GATHERING_QUESTION
    }

    async fn do_execute(&self, ctx: &ConversationContext) -> Result<NodeResult, FlowError> {
        let next = self
            .tracking
            .get_next_pending(ctx.conversation_id, ctx.tenant_id)
            .await?;

        let row = match next {
            Some(row) => row,
            None => {
                log::info!(
                    "no more questions to ask for conversation {}",
                    ctx.conversation_id
                );
                return Ok(NodeResult::new(self.name(), NodeAction::None)
                    .with_reason("no more questions to ask"));
            }
        };

        if row.status == QuestionStatus::Pending {
            self.tracking
                .update_status(row.id, ctx.tenant_id, QuestionStatus::Ongoing, None)
                .await?;
        }

        log::info!(
            "next question ready for conversation {}: tracking {}",
            ctx.conversation_id,
            row.id
        );

        Ok(NodeResult::send_message(self.name(), row.question.clone())
            .with_data("question_tracking_id", row.id.to_string()))
    }
}

/// How relevant is the candidate's answer to the current question?
///
/// Scene output: `{"result": "A".."E"}`:
/// A refusal, B relevant, C off-topic, D abusive/sensitive, E undetermined.
pub struct RelevanceCheckNode {
    gateway: Arc<dyn LlmGateway>,
}

impl RelevanceCheckNode {
    pub fn new(gateway: Arc<dyn LlmGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Node for RelevanceCheckNode {
    fn name(&self) -> &str {
        scenes::RELEVANCE_REPLY_AND_QUESTION
    }

    async fn do_execute(&self, ctx: &ConversationContext) -> Result<NodeResult, FlowError> {
        let response = call_llm(&self.gateway, ctx, self.scene_name()).await?;

        let relevance = match field_upper(&response, "result") {
            Some(value) => value,
            None => return Err(conformance_error("missing result field", &response)),
        };

        let base = NodeResult::new(self.name(), NodeAction::Suspend)
            .with_data("relevance", relevance.clone());

        match relevance.as_str() {
            "A" => Ok(base.with_reason("candidate refused to answer")),
            "B" => Ok(NodeResult::new(self.name(), NodeAction::NextNode)
                .with_next(&[scenes::REPLY_MATCH_QUESTION_REQUIREMENT])
                .with_reason("candidate answer is relevant, grading it")
                .with_data("relevance", relevance)),
            "C" => Ok(NodeResult::new(self.name(), NodeAction::NextNode)
                .with_next(&[scenes::INFORMATION_GATHERING_QUESTION])
                .with_reason("candidate answer is off-topic, moving on")
                .with_data("relevance", relevance)),
            "D" => Ok(base.with_reason("candidate reply is abusive or contains sensitive content")),
            "E" => Ok(base.with_reason("unable to determine relevance")),
            other => Err(conformance_error(
                format!("relevance value out of range: {}", other),
                &response,
            )),
        }
    }
}

/// Does the answer satisfy the question's evaluation criteria?
///
/// Scene output: `{"result": "YES"|"NO"|"QUESTION"}`. Only YES records a
/// grading outcome (`data.is_satisfied = true`); NO suspends with the
/// tracking row untouched so a human reviewer decides, and QUESTION means
/// the candidate asked something back instead of answering.
pub struct RequirementMatchNode {
    gateway: Arc<dyn LlmGateway>,
}

impl RequirementMatchNode {
    pub fn new(gateway: Arc<dyn LlmGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Node for RequirementMatchNode {
    fn name(&self) -> &str {
        scenes::REPLY_MATCH_QUESTION_REQUIREMENT
    }

    async fn do_execute(&self, ctx: &ConversationContext) -> Result<NodeResult, FlowError> {
        let response = call_llm(&self.gateway, ctx, self.scene_name()).await?;

        let satisfied = match field_upper(&response, "result") {
            Some(value) => value,
            None => return Err(conformance_error("missing result field", &response)),
        };

        if satisfied == "YES" || satisfied.contains("YES") {
            return Ok(NodeResult::new(self.name(), NodeAction::NextNode)
                .with_next(&[scenes::INFORMATION_GATHERING_QUESTION])
                .with_reason("answer satisfies the requirement, moving to the next question")
                .with_data("satisfied", satisfied)
                .with_data("is_satisfied", true));
        }
        if satisfied == "QUESTION" || satisfied.contains("QUESTION") {
            return Ok(NodeResult::new(self.name(), NodeAction::NextNode)
                .with_next(&[scenes::ANSWER_BASED_ON_KNOWLEDGE])
                .with_reason("candidate asked a question instead of answering")
                .with_data("satisfied", satisfied));
        }
        if satisfied == "NO" || satisfied.contains("NO") {
            return Ok(NodeResult::new(self.name(), NodeAction::Suspend)
                .with_reason("answer does not satisfy the requirement")
                .with_data("satisfied", satisfied));
        }

        Err(conformance_error(
            format!("requirement match value out of range: {}", satisfied),
            &response,
        ))
    }
}

/// Willingness check for non-assessment questions.
///
/// Scene output: `{"result": "YES"|"NO"}`.
pub struct QuestionWillingnessNode {
    gateway: Arc<dyn LlmGateway>,
}

impl QuestionWillingnessNode {
    pub fn new(gateway: Arc<dyn LlmGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Node for QuestionWillingnessNode {
    fn name(&self) -> &str {
        scenes::QUESTION_WILLINGNESS
    }

    async fn do_execute(&self, ctx: &ConversationContext) -> Result<NodeResult, FlowError> {
        let response = call_llm(&self.gateway, ctx, self.scene_name()).await?;

        let willing = match field_upper(&response, "result") {
            Some(value) => value,
            None => return Err(conformance_error("missing result field", &response)),
        };

        match willing.as_str() {
            "YES" => Ok(NodeResult::new(self.name(), NodeAction::NextNode)
                .with_next(&[scenes::INFORMATION_GATHERING_QUESTION])
                .with_reason("candidate is engaged, moving to the next question")
                .with_data("willing", true)),
            "NO" => Ok(NodeResult::new(self.name(), NodeAction::Suspend)
                .with_reason("candidate is unwilling to continue with this question")
                .with_data("willing", false)),
            other => Err(conformance_error(
                format!("willingness value out of range: {}", other),
                &response,
            )),
        }
    }

    /// Assume cooperation, like the conversation-level willingness gate.
    fn fallback(&self, _ctx: &ConversationContext, error: &LlmError) -> NodeResult {
        let mut result = NodeResult::new(self.name(), NodeAction::NextNode)
            .with_next(&[scenes::INFORMATION_GATHERING_QUESTION])
            .with_data("willing", true);
        attach_error_data(&mut result, error);
        result
    }
}
