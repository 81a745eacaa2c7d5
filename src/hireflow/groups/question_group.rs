//! The question group: drives the assessment-question state machine.
//!
//! Stage 1 bootstraps the question list (bulk-creating tracking rows and
//! advancing the conversation to stage 2); stage 2 evaluates the
//! candidate's answer to the current question and walks to the next one.
//! Any other stage is a no-op.

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::hireflow::error::FlowError;
use crate::hireflow::executor::DynamicExecutor;
use crate::hireflow::gateway::scenes;
use crate::hireflow::model::{
    ConversationContext, ConversationStage, Message, NodeAction, NodeResult, Sender,
};
use crate::hireflow::node::{FlowDeps, Node};
use crate::hireflow::repo::{
    ConversationRepo, JobQuestion, JobQuestionRepo, QuestionStatus, QuestionTracking,
    QuestionTrackingRepo, QuestionType,
};

/// Registry name of this group.
pub const NODE_NAME: &str = "question_group";

// Stuck-conversation guard. The thresholds are a product choice: when the
// AI last sent the current question STUCK_SKIP_AFTER..STUCK_RESEND_AFTER
// turn blocks ago (the exchange has drifted without an accepted answer),
// yield the turn to the response group; from STUCK_RESEND_AFTER blocks on,
// re-send the question text once instead. The scan never looks further
// back than STUCK_SCAN_TURNS turn blocks.
pub const STUCK_SKIP_AFTER: u32 = 3;
pub const STUCK_RESEND_AFTER: u32 = 5;
pub const STUCK_SCAN_TURNS: u32 = 5;

/// Orchestrates the question stage. Returns the terminal inner node's
/// result (or its own `NONE`/`SEND_MESSAGE` for the guard paths), with the
/// visited-node trail in `executed`.
pub struct QuestionGroup {
    executor: DynamicExecutor,
    job_questions: Arc<dyn JobQuestionRepo>,
    tracking: Arc<dyn QuestionTrackingRepo>,
    conversations: Arc<dyn ConversationRepo>,
}

impl QuestionGroup {
    pub fn new(deps: FlowDeps) -> Self {
        Self {
            job_questions: deps.job_questions.clone(),
            tracking: deps.tracking.clone(),
            conversations: deps.conversations.clone(),
            executor: DynamicExecutor::new(deps),
        }
    }

    /// Stage 1: initialize the question list and ask the first question.
    async fn handle_greeting(&self, ctx: &ConversationContext) -> Result<NodeResult, FlowError> {
        let questions = self
            .job_questions
            .list_by_job(ctx.job_id, ctx.tenant_id)
            .await?;

        if questions.is_empty() {
            self.conversations
                .update_stage(ctx.conversation_id, ctx.tenant_id, ConversationStage::Intention)
                .await?;
            log::info!(
                "job {} has no configured questions, conversation {} moves to the intention stage",
                ctx.job_id,
                ctx.conversation_id
            );
            return Ok(NodeResult::new(NODE_NAME, NodeAction::None)
                .with_reason("job has no configured questions, moving to the intention stage"));
        }

        self.tracking
            .bulk_create(
                ctx.conversation_id,
                ctx.job_id,
                ctx.resume_id,
                ctx.tenant_id,
                ctx.user_id,
                &questions,
            )
            .await?;
        self.conversations
            .update_stage(ctx.conversation_id, ctx.tenant_id, ConversationStage::Questioning)
            .await?;
        log::info!(
            "initialized {} tracking rows for conversation {}",
            questions.len(),
            ctx.conversation_id
        );

        let mut executed = Vec::new();
        self.ask_next_question(ctx, &mut executed).await
    }

    /// Stage 2: evaluate the answer to the current question and move on.
    async fn handle_questioning(&self, ctx: &ConversationContext) -> Result<NodeResult, FlowError> {
        let mut executed: Vec<String> = Vec::new();

        let current = self.current_question(ctx).await?;
        let (row, catalog_question) = match current {
            Some(pair) => pair,
            None => {
                // First answer of a freshly entered question stage: nothing
                // is ongoing yet, so just ask the first question.
                return self.ask_next_question(ctx, &mut executed).await;
            }
        };

        if let Some(turns) = same_question_turns_interval(&row.question, &ctx.history) {
            if turns >= STUCK_SKIP_AFTER && turns < STUCK_RESEND_AFTER {
                log::info!(
                    "question last asked {} turn blocks ago without an answer, yielding this turn",
                    turns
                );
                return Ok(NodeResult::new(NODE_NAME, NodeAction::None)
                    .with_reason("question drifted without an answer, yielding this turn"));
            }
            if turns >= STUCK_RESEND_AFTER {
                log::info!(
                    "question last asked {} turn blocks ago, re-sending it verbatim",
                    turns
                );
                return Ok(NodeResult::send_message(NODE_NAME, row.question.clone())
                    .with_data("question_tracking_id", row.id.to_string()));
            }
        }

        // Focus a private copy of the context on the current question; the
        // response group shares the original concurrently.
        let criteria = catalog_question
            .as_ref()
            .and_then(|question| question.evaluation_criteria.clone());
        let question_ctx = ctx.with_current_question(row.question_id, row.question.clone(), criteria);

        let graded = catalog_question
            .map(|question| question.question_type == QuestionType::Assessment && question.is_required)
            .unwrap_or(false);

        let chosen = if graded {
            // Speculative pair: the requirement grade is only valid when the
            // relevance check lands on "B", but running both costs one round
            // trip instead of two.
            executed.push(scenes::RELEVANCE_REPLY_AND_QUESTION.to_string());
            executed.push(scenes::REPLY_MATCH_QUESTION_REQUIREMENT.to_string());
            let (relevance, requirement) = futures_util::try_join!(
                self.executor
                    .execute(scenes::RELEVANCE_REPLY_AND_QUESTION, &question_ctx),
                self.executor
                    .execute(scenes::REPLY_MATCH_QUESTION_REQUIREMENT, &question_ctx),
            )?;
            if relevance.first_next() == Some(scenes::REPLY_MATCH_QUESTION_REQUIREMENT) {
                requirement
            } else {
                relevance
            }
        } else {
            executed.push(scenes::QUESTION_WILLINGNESS.to_string());
            self.executor
                .execute(scenes::QUESTION_WILLINGNESS, &question_ctx)
                .await?
        };

        self.process_question_status(&chosen, row.id, ctx.tenant_id)
            .await?;

        // Walk NEXT_NODE hand-offs. Only the first target is followed; any
        // further names are informational.
        let mut result = chosen;
        while result.action == NodeAction::NextNode {
            let next = match result.first_next() {
                Some(next) => next.to_string(),
                None => break,
            };
            executed.push(next.clone());
            result = self.executor.execute(&next, &question_ctx).await?;
        }

        result.executed = executed;
        Ok(result)
    }

    /// The `ongoing` tracking row and its catalog question, if any.
    async fn current_question(
        &self,
        ctx: &ConversationContext,
    ) -> Result<Option<(QuestionTracking, Option<JobQuestion>)>, FlowError> {
        let mut ongoing = self
            .tracking
            .list_by_conversation(
                ctx.conversation_id,
                ctx.tenant_id,
                Some(QuestionStatus::Ongoing),
            )
            .await?;
        if ongoing.is_empty() {
            return Ok(None);
        }
        let row = ongoing.remove(0);
        let catalog_question = self
            .job_questions
            .get_by_id(row.question_id, ctx.tenant_id)
            .await?;
        Ok(Some((row, catalog_question)))
    }

    /// Completion bookkeeping for the chosen result.
    ///
    /// A willingness verdict completes the row outright (non-assessment
    /// questions have no grade). A requirement-match verdict completes it
    /// only when a boolean grade was produced, which per the node's
    /// contract means YES; a NO suspends with the row still `ongoing` so a
    /// human reviewer owns the outcome.
    async fn process_question_status(
        &self,
        result: &NodeResult,
        tracking_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<(), FlowError> {
        if result.node_name == scenes::QUESTION_WILLINGNESS {
            self.tracking
                .update_status(tracking_id, tenant_id, QuestionStatus::Completed, None)
                .await?;
            log::info!("question tracking {} completed", tracking_id);
            return Ok(());
        }
        if result.node_name == scenes::REPLY_MATCH_QUESTION_REQUIREMENT {
            if let Some(satisfied) = result.data_bool("is_satisfied") {
                self.tracking
                    .update_status(
                        tracking_id,
                        tenant_id,
                        QuestionStatus::Completed,
                        Some(satisfied),
                    )
                    .await?;
                log::info!(
                    "question tracking {} completed (satisfied={})",
                    tracking_id,
                    satisfied
                );
            }
        }
        Ok(())
    }

    /// Ask the next question via the picker; an empty catalog answer means
    /// the question stage is over and the conversation advances to stage 3.
    async fn ask_next_question(
        &self,
        ctx: &ConversationContext,
        executed: &mut Vec<String>,
    ) -> Result<NodeResult, FlowError> {
        executed.push(scenes::INFORMATION_GATHERING_QUESTION.to_string());
        let mut result = self
            .executor
            .execute(scenes::INFORMATION_GATHERING_QUESTION, ctx)
            .await?;
        if result.action == NodeAction::None {
            self.conversations
                .update_stage(ctx.conversation_id, ctx.tenant_id, ConversationStage::Intention)
                .await?;
        }
        result.executed = executed.clone();
        Ok(result)
    }
}

#[async_trait]
impl Node for QuestionGroup {
    fn name(&self) -> &str {
        NODE_NAME
    }

    async fn do_execute(&self, ctx: &ConversationContext) -> Result<NodeResult, FlowError> {
        log::debug!("question group started in stage {}", ctx.stage.as_str());
        match ctx.stage {
            ConversationStage::Greeting => self.handle_greeting(ctx).await,
            ConversationStage::Questioning => self.handle_questioning(ctx).await,
            other => Ok(NodeResult::new(NODE_NAME, NodeAction::None).with_reason(format!(
                "not a question stage (current: {})",
                other.as_str()
            ))),
        }
    }
}

/// How many turn blocks back the AI last sent `question`, scanning at most
/// [`STUCK_SCAN_TURNS`] blocks. `None` when the question text does not
/// appear in an AI message within the window.
///
/// A "turn block" is a maximal run of messages by one sender; the count is
/// anchored on the most recent message's sender, so with strict
/// candidate/AI alternation each full exchange adds one block. A question
/// asked in the immediately preceding AI turn yields `1`.
fn same_question_turns_interval(question: &str, history: &[Message]) -> Option<u32> {
    if history.is_empty() {
        return None;
    }
    let mut talk_turns: u32 = 0;
    let mut current_role: Option<Sender> = None;
    let mut last_msg_role: Option<Sender> = None;
    for msg in history.iter().rev() {
        if current_role.is_none() {
            current_role = Some(msg.sender);
            last_msg_role = Some(msg.sender);
            talk_turns += 1;
        }
        if Some(msg.sender) != current_role {
            current_role = Some(msg.sender);
            if Some(msg.sender) == last_msg_role {
                talk_turns += 1;
            }
        }
        if msg.sender == Sender::Ai && msg.content.contains(question) {
            return Some(talk_turns);
        }
        if talk_turns > STUCK_SCAN_TURNS {
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    /// AI asks `question`, then `drift` full exchanges happen on other
    /// topics, ending with a candidate message.
    fn drifted_history(question: &str, drift: usize) -> Vec<Message> {
        let mut history = vec![Message::ai(question)];
        for idx in 0..drift {
            history.push(Message::candidate(format!("candidate aside {}", idx)));
            if idx + 1 < drift {
                history.push(Message::ai(format!("hr aside {}", idx)));
            }
        }
        history
    }

    #[test]
    fn question_in_previous_ai_turn_counts_one_block() {
        let history = vec![
            Message::ai("请问您有几年Python经验？"),
            Message::candidate("三年"),
        ];
        assert_eq!(
            same_question_turns_interval("请问您有几年Python经验？", &history),
            Some(1)
        );
    }

    #[test]
    fn drifting_exchanges_push_the_question_further_back() {
        let question = "请问您有几年Python经验？";
        assert_eq!(
            same_question_turns_interval(question, &drifted_history(question, 3)),
            Some(3)
        );
    }

    #[test]
    fn question_absent_from_window_returns_none() {
        let history = drifted_history("别的问题", 2);
        assert_eq!(same_question_turns_interval("请问加班多吗", &history), None);
    }

    #[test]
    fn empty_history_returns_none() {
        assert_eq!(same_question_turns_interval("任何问题", &[]), None);
    }
}
