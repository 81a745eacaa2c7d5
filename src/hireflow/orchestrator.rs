//! The top-level flow orchestrator.
//!
//! One call in, one decision out:
//!
//! ```text
//! Orchestrator::execute(ctx)
//!   ├─ Phase A  pre-checks, in parallel
//!   │     transfer_human_intent ──┐ SUSPEND?  → short-circuit
//!   │     candidate_emotion ──────┘ score 3?  → short-circuit
//!   │                               score 2?  → high_eq_response
//!   ├─ Phase B  groups, speculatively in parallel
//!   │     response_group           (always)
//!   │     question_group           (stage 2 only)
//!   └─ Phase C  deterministic action selection → FlowResult
//! ```
//!
//! In stage 2 both groups run even though usually only one of them is the
//! natural source of truth; which one is not knowable until both have been
//! evaluated, and running them concurrently makes the slow path no slower
//! than the slowest group. The selection policy is a pure function of the
//! two results, so completion order never influences the outcome.

use std::sync::Arc;
use std::time::Instant;

use crate::hireflow::error::FlowError;
use crate::hireflow::gateway::scenes;
use crate::hireflow::groups::{QuestionGroup, ResponseGroup};
use crate::hireflow::model::{
    ConversationContext, ConversationStage, FlowMetadata, FlowResult, NodeAction, NodeResult,
};
use crate::hireflow::node::{FlowDeps, Node};
use crate::hireflow::nodes::{EmotionAnalysisNode, HighEqResponseNode, TransferHumanIntentNode};

/// Emotion score at which the candidate gets a polite close-out instead of
/// the main flow.
const EMOTION_CLOSING_SCORE: i64 = 2;

/// Evaluates one candidate turn. Stateless across turns; safe to share
/// behind an `Arc` and call concurrently for different conversations.
pub struct Orchestrator {
    transfer_node: Arc<dyn Node>,
    emotion_node: Arc<dyn Node>,
    high_eq_node: Arc<dyn Node>,
    response_group: Arc<dyn Node>,
    question_group: Arc<dyn Node>,
}

impl Orchestrator {
    pub fn new(deps: FlowDeps) -> Self {
        let orchestrator = Self {
            transfer_node: Arc::new(TransferHumanIntentNode::new(deps.gateway.clone())),
            emotion_node: Arc::new(EmotionAnalysisNode::new(deps.gateway.clone())),
            high_eq_node: Arc::new(HighEqResponseNode::new(deps.gateway.clone())),
            response_group: Arc::new(ResponseGroup::new(deps.clone())),
            question_group: Arc::new(QuestionGroup::new(deps)),
        };
        log::info!("conversation flow orchestrator initialized");
        orchestrator
    }

    /// Run the full flow for one turn.
    ///
    /// Fallbacks absorb LLM failures inside the nodes; an error here means
    /// something non-recoverable (repository failure, task death,
    /// programmer error) and is the caller's to convert into its own 5xx /
    /// retry handling.
    pub async fn execute(&self, ctx: &ConversationContext) -> Result<FlowResult, FlowError> {
        let started = Instant::now();
        let mut execution_path: Vec<String> = Vec::new();

        log::info!(
            "flow execution started: conversation={} stage={} message_len={}",
            ctx.conversation_id,
            ctx.stage.as_str(),
            ctx.last_candidate_message.len()
        );

        // ---- Phase A: pre-checks, in parallel ----
        let (transfer, emotion) = futures_util::try_join!(
            self.transfer_node.execute(ctx),
            self.emotion_node.execute(ctx),
        )?;
        execution_path.push(transfer.node_name.clone());
        execution_path.push(emotion.node_name.clone());

        if transfer.action == NodeAction::Suspend {
            log::info!("short-circuit: candidate requested a human");
            return Ok(build_flow_result(transfer, execution_path, started));
        }
        if emotion.action == NodeAction::Suspend {
            log::info!("short-circuit: candidate sentiment too negative to automate");
            return Ok(build_flow_result(emotion, execution_path, started));
        }
        if emotion.data_i64("emotion_score") == Some(EMOTION_CLOSING_SCORE) {
            log::info!("candidate sentiment is cooling off, sending a close-out");
            let closing = self.high_eq_node.execute(ctx).await?;
            execution_path.push(closing.node_name.clone());
            return Ok(build_flow_result(closing, execution_path, started));
        }

        // ---- Phase B: groups, speculatively in parallel ----
        let (response_result, question_result) = if ctx.stage == ConversationStage::Questioning {
            log::info!("stage 2: running response and question groups in parallel");
            let (response, question) = futures_util::try_join!(
                self.response_group.execute(ctx),
                self.question_group.execute(ctx),
            )?;
            (response, Some(question))
        } else {
            log::info!("stage {}: running response group only", ctx.stage.as_str());
            (self.response_group.execute(ctx).await?, None)
        };

        extend_path(&mut execution_path, &response_result);
        if let Some(question_result) = &question_result {
            extend_path(&mut execution_path, question_result);
        }

        // ---- Phase C: action selection ----
        let chosen = select_result(ctx.stage, response_result, question_result);
        let flow_result = build_flow_result(chosen, execution_path, started);

        log::info!(
            "flow execution completed: conversation={} action={:?} total={:.1}ms path={:?}",
            ctx.conversation_id,
            flow_result.action,
            flow_result.total_time_ms,
            flow_result.execution_path
        );
        Ok(flow_result)
    }
}

/// Deterministic selection between the two group results.
///
/// Stage 2 priorities:
/// 1. the question group produced a definite action (`SEND_MESSAGE` or
///    `SUSPEND`): the assessment flow owns the turn;
/// 2. the response group answered from the knowledge base: the candidate
///    asked a side-question, answer it even mid-assessment;
/// 3. the question group ran out of questions (`NONE`, stage already
///    advanced): the response group owns the turn;
/// 4. otherwise the question group's result stands.
///
/// Every other stage: the response group's result, unconditionally.
fn select_result(
    stage: ConversationStage,
    response_result: NodeResult,
    question_result: Option<NodeResult>,
) -> NodeResult {
    if stage != ConversationStage::Questioning {
        return response_result;
    }

    let question_result = match question_result {
        Some(result) => result,
        None => {
            log::warn!("stage 2 without a question group result, using the response group");
            return response_result;
        }
    };

    if matches!(
        question_result.action,
        NodeAction::SendMessage | NodeAction::Suspend
    ) {
        log::debug!("selection: question group has a definite action");
        return question_result;
    }
    if response_result.node_name == scenes::ANSWER_BASED_ON_KNOWLEDGE
        && response_result.action == NodeAction::SendMessage
    {
        log::debug!("selection: knowledge answer wins the turn");
        return response_result;
    }
    if question_result.action == NodeAction::None {
        log::debug!("selection: question stage exhausted, response group owns the turn");
        return response_result;
    }
    question_result
}

/// Append a result's trail to the execution path: a group contributes the
/// inner nodes it started, a leaf contributes itself.
fn extend_path(path: &mut Vec<String>, result: &NodeResult) {
    if result.executed.is_empty() {
        path.push(result.node_name.clone());
    } else {
        path.extend(result.executed.iter().cloned());
    }
}

fn build_flow_result(
    result: NodeResult,
    execution_path: Vec<String>,
    started: Instant,
) -> FlowResult {
    FlowResult {
        action: result.action,
        message: result.message,
        reason: result.reason,
        metadata: FlowMetadata {
            source_node: result.node_name,
            node_data: result.data,
        },
        execution_path,
        total_time_ms: started.elapsed().as_secs_f64() * 1000.0,
    }
}
