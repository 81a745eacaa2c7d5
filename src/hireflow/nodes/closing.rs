//! Closing nodes: warm exits and re-engagement.

use async_trait::async_trait;
use std::sync::Arc;

use crate::hireflow::error::FlowError;
use crate::hireflow::gateway::{scenes, LlmGateway, LlmResponse};
use crate::hireflow::model::{ConversationContext, NodeResult};
use crate::hireflow::node::{call_llm, conformance_error, field_string, Node};

/// Warm closing sentence for a candidate who is disengaging.
///
/// Scene output: `{"newReply": string}`, though a raw-text completion is
/// accepted too.
pub struct HighEqResponseNode {
    gateway: Arc<dyn LlmGateway>,
}

impl HighEqResponseNode {
    pub fn new(gateway: Arc<dyn LlmGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Node for HighEqResponseNode {
    fn name(&self) -> &str {
        scenes::HIGH_EQ_RESPONSE
    }

    async fn do_execute(&self, ctx: &ConversationContext) -> Result<NodeResult, FlowError> {
        let response = call_llm(&self.gateway, ctx, self.scene_name()).await?;

        let content = match &response {
            LlmResponse::Text(text) => text.trim().to_string(),
            LlmResponse::Json(_) => match field_string(&response, "newReply") {
                Some(content) => content.trim().to_string(),
                None => return Err(conformance_error("missing newReply field", &response)),
            },
        };

        Ok(NodeResult::send_message(self.name(), content.clone()).with_data("message", content))
    }
}

/// Re-engagement opener used across turns when a conversation went quiet.
/// Raw-text scene; not routed by any group, callers invoke it directly
/// through the executor.
pub struct ResumeConversationNode {
    gateway: Arc<dyn LlmGateway>,
}

impl ResumeConversationNode {
    pub fn new(gateway: Arc<dyn LlmGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Node for ResumeConversationNode {
    fn name(&self) -> &str {
        scenes::RESUME_CONVERSATION
    }

    async fn do_execute(&self, ctx: &ConversationContext) -> Result<NodeResult, FlowError> {
        let response = call_llm(&self.gateway, ctx, self.scene_name()).await?;

        let content = match &response {
            LlmResponse::Text(text) => text.trim().to_string(),
            LlmResponse::Json(value) => match value.as_str() {
                Some(text) => text.trim().to_string(),
                None => {
                    return Err(conformance_error(
                        "resume conversation scene must produce text",
                        &response,
                    ))
                }
            },
        };

        Ok(NodeResult::send_message(self.name(), content)
            .with_data("type", "resume_conversation"))
    }
}
