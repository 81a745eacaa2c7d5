//! Pre-check nodes: run before anything else, every turn.
//!
//! Both fail *open*: a broken classifier must not escalate a healthy
//! conversation to a human, so their fallbacks route back into the main
//! flow instead of suspending.

use async_trait::async_trait;
use std::sync::Arc;

use crate::hireflow::error::{FlowError, LlmError};
use crate::hireflow::gateway::{scenes, LlmGateway};
use crate::hireflow::model::{ConversationContext, NodeAction, NodeResult};
use crate::hireflow::node::{
    attach_error_data, call_llm, conformance_error, field_i64, field_string, field_upper, Node,
};

/// Did the candidate explicitly ask to talk to a human?
///
/// Scene output: `{"transfer": "YES"|"NO"}`. YES suspends immediately; NO
/// hands off to sentiment analysis.
pub struct TransferHumanIntentNode {
    gateway: Arc<dyn LlmGateway>,
}

impl TransferHumanIntentNode {
    pub fn new(gateway: Arc<dyn LlmGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Node for TransferHumanIntentNode {
    fn name(&self) -> &str {
        scenes::TRANSFER_HUMAN_INTENT
    }

    async fn do_execute(&self, ctx: &ConversationContext) -> Result<NodeResult, FlowError> {
        let response = call_llm(&self.gateway, ctx, self.scene_name()).await?;

        let transfer = match field_upper(&response, "transfer") {
            Some(value) => value,
            None => return Err(conformance_error("missing transfer field", &response)),
        };

        if transfer == "YES" || transfer.contains("YES") {
            return Ok(NodeResult::new(self.name(), NodeAction::Suspend)
                .with_reason("candidate requested a human recruiter")
                .with_data("transfer", transfer));
        }
        if transfer == "NO" || transfer.contains("NO") {
            return Ok(NodeResult::new(self.name(), NodeAction::NextNode)
                .with_next(&[scenes::CANDIDATE_EMOTION])
                .with_data("transfer", transfer));
        }

        Err(conformance_error(
            format!("transfer value out of range: {}", transfer),
            &response,
        ))
    }

    /// Fail open: an unreadable classifier must not fake an escalation.
    fn fallback(&self, _ctx: &ConversationContext, error: &LlmError) -> NodeResult {
        let mut result = NodeResult::new(self.name(), NodeAction::NextNode)
            .with_next(&[scenes::CANDIDATE_EMOTION]);
        attach_error_data(&mut result, error);
        result
    }
}

/// Sentiment score for the candidate's recent messages.
///
/// Scene output: `{"分数": 0..3, "原因": string}`. 0/1 continue the main
/// flow, 2 triggers a warm close-out, 3 suspends.
pub struct EmotionAnalysisNode {
    gateway: Arc<dyn LlmGateway>,
}

impl EmotionAnalysisNode {
    pub fn new(gateway: Arc<dyn LlmGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Node for EmotionAnalysisNode {
    fn name(&self) -> &str {
        scenes::CANDIDATE_EMOTION
    }

    async fn do_execute(&self, ctx: &ConversationContext) -> Result<NodeResult, FlowError> {
        let response = call_llm(&self.gateway, ctx, self.scene_name()).await?;

        let score = match field_i64(&response, "分数") {
            Some(score) => score,
            None => return Err(conformance_error("missing or non-numeric 分数 field", &response)),
        };
        let reason = field_string(&response, "原因").unwrap_or_default();

        let base = NodeResult::new(self.name(), NodeAction::NextNode)
            .with_data("emotion_score", score)
            .with_data("emotion_reason", reason.clone());

        match score {
            3 => Ok(NodeResult::new(self.name(), NodeAction::Suspend)
                .with_reason(format!(
                    "candidate sentiment is very negative (score=3): {}",
                    reason
                ))
                .with_data("emotion_score", score)
                .with_data("emotion_reason", reason)),
            2 => Ok(base
                .with_next(&[scenes::HIGH_EQ_RESPONSE])
                .with_reason("candidate sentiment is cooling off, sending a warm close-out")),
            0 | 1 => Ok(base
                .with_next(&[scenes::CONTINUE_CONVERSATION, "information_gathering"])
                .with_reason(format!("candidate sentiment is fine (score={})", score))),
            other => Err(conformance_error(
                format!("emotion score out of range: {}", other),
                &response,
            )),
        }
    }

    /// Assume a mildly positive candidate and stay in the main flow.
    fn fallback(&self, _ctx: &ConversationContext, error: &LlmError) -> NodeResult {
        let mut result = NodeResult::new(self.name(), NodeAction::NextNode)
            .with_next(&[scenes::CONTINUE_CONVERSATION, "information_gathering"])
            .with_data("emotion_score", 1);
        attach_error_data(&mut result, error);
        result
    }
}
