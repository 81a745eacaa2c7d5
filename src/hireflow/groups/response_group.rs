//! The response group: willingness gate → question detection →
//! knowledge answer / free-form fallback / small talk.
//!
//! The knowledge lookup is latency-dominant and usually useful, so it is
//! started *speculatively*, in parallel with the question classifier.
//! When the classifier comes back with "not a question" the knowledge
//! reply is simply discarded; a few wasted tokens buy one whole LLM round
//! trip of latency.

use async_trait::async_trait;

use crate::hireflow::error::FlowError;
use crate::hireflow::gateway::scenes;
use crate::hireflow::model::{ConversationContext, ConversationStage, NodeAction, NodeResult};
use crate::hireflow::node::{FlowDeps, Node};
use crate::hireflow::executor::DynamicExecutor;

/// Registry name of this group.
pub const NODE_NAME: &str = "response_group";

/// Orchestrates the conversational reply path. Returns the terminal inner
/// node's result, with the visited-node trail in `executed`.
pub struct ResponseGroup {
    executor: DynamicExecutor,
}

impl ResponseGroup {
    pub fn new(deps: FlowDeps) -> Self {
        Self {
            executor: DynamicExecutor::new(deps),
        }
    }
}

#[async_trait]
impl Node for ResponseGroup {
    fn name(&self) -> &str {
        NODE_NAME
    }

    async fn do_execute(&self, ctx: &ConversationContext) -> Result<NodeResult, FlowError> {
        let mut executed: Vec<String> = Vec::new();

        // Step 1: willingness gate. Once the conversation is deep enough to
        // be asking questions (or probing intent) the candidate has already
        // demonstrated willingness, so skip the classifier.
        let willing = match ctx.stage {
            ConversationStage::Questioning | ConversationStage::Intention => {
                log::debug!(
                    "skipping willingness gate in stage {}",
                    ctx.stage.as_str()
                );
                true
            }
            _ => {
                executed.push(scenes::CONTINUE_CONVERSATION.to_string());
                let gate = self
                    .executor
                    .execute(scenes::CONTINUE_CONVERSATION, ctx)
                    .await?;
                gate.data_bool("willing").unwrap_or(true)
            }
        };

        if !willing {
            log::info!("candidate unwilling to continue, sending a warm close-out");
            executed.push(scenes::HIGH_EQ_RESPONSE.to_string());
            let mut closing = self.executor.execute(scenes::HIGH_EQ_RESPONSE, ctx).await?;
            closing.executed = executed;
            return Ok(closing);
        }

        // Step 2: speculative parallel. Classify the message while the
        // knowledge pipeline (search + answer scene) is already running.
        executed.push(scenes::CANDIDATE_ASK_QUESTION.to_string());
        executed.push(scenes::ANSWER_BASED_ON_KNOWLEDGE.to_string());
        let (ask, knowledge) = futures_util::try_join!(
            self.executor.execute(scenes::CANDIDATE_ASK_QUESTION, ctx),
            self.executor.execute(scenes::ANSWER_BASED_ON_KNOWLEDGE, ctx),
        )?;

        let is_question = ask.data_bool("is_question").unwrap_or(false);
        log::debug!(
            "classifier: is_question={} knowledge_found={:?}",
            is_question,
            knowledge.data_bool("found")
        );

        // Step 3: pick the reply strategy.
        let mut result = if is_question {
            if knowledge.node_name == scenes::ANSWER_BASED_ON_KNOWLEDGE
                && knowledge.action == NodeAction::SendMessage
            {
                log::info!("answering from the knowledge base");
                knowledge
            } else {
                log::info!("knowledge base came up empty, using the free-form answer");
                executed.push(scenes::ANSWER_WITHOUT_KNOWLEDGE.to_string());
                self.executor
                    .execute(scenes::ANSWER_WITHOUT_KNOWLEDGE, ctx)
                    .await?
            }
        } else {
            log::info!("not a question, keeping the small talk going");
            executed.push(scenes::CASUAL_CONVERSATION.to_string());
            self.executor
                .execute(scenes::CASUAL_CONVERSATION, ctx)
                .await?
        };

        result.executed = executed;
        Ok(result)
    }
}
