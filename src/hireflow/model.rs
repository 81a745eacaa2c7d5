//! Core value types for the conversation flow engine.
//!
//! A turn flows through three shapes: the immutable [`ConversationContext`]
//! the caller assembles, the [`NodeResult`]s individual nodes and groups
//! produce, and the single [`FlowResult`] the orchestrator hands back.
//!
//! The context is deliberately cheap to clone: message bodies are stored as
//! `Arc<str>`, so the structural copies made by speculative branches (e.g.
//! the knowledge node attaching search hits) share the underlying history
//! text instead of duplicating it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::hireflow::error::FlowError;
use crate::hireflow::knowledge::KnowledgeEntry;

/// How many history messages are rendered into the `chatHistory` template
/// variable. A prompt-construction concern; the full history stays on the
/// context.
pub const HISTORY_WINDOW: usize = 10;

/// What a node (and ultimately the whole flow) decided to do.
///
/// Only the first four variants are externally observable; `Continue` is an
/// internal hand-off between nodes within a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeAction {
    /// No-op; typically paired with a stage advance already performed.
    None,
    /// Hand off to the node(s) named in `next_node`.
    NextNode,
    /// Deliver `message` to the candidate as the AI turn.
    SendMessage,
    /// Escalate to a human; no message is sent.
    Suspend,
    /// End the conversation. Reserved; not currently produced.
    Terminate,
    /// Internal: the node yielded without a terminal decision.
    Continue,
}

/// Coarse conversation phase. Monotonically non-decreasing across turns;
/// the engine writes the 1→2 and 2→3 transitions through the
/// [`ConversationRepo`](crate::hireflow::repo::ConversationRepo).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStage {
    /// Stage 1: opening pleasantries.
    Greeting,
    /// Stage 2: working through the configured question list.
    Questioning,
    /// Stage 3: probing position intent.
    Intention,
    /// Stage 4: matched, recruiting flow done.
    Matched,
}

impl ConversationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStage::Greeting => "greeting",
            ConversationStage::Questioning => "questioning",
            ConversationStage::Intention => "intention",
            ConversationStage::Matched => "matched",
        }
    }
}

/// Conversation lifecycle status. The engine reads it; it never writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Opened,
    Ongoing,
    Interrupted,
    Ended,
    Deleted,
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    Candidate,
    Ai,
    System,
}

/// One message in the conversation transcript.
#[derive(Debug, Clone)]
pub struct Message {
    pub sender: Sender,
    /// `Arc<str>` so cloning a history is cheap.
    pub content: Arc<str>,
    pub message_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(sender: Sender, content: impl AsRef<str>) -> Self {
        Self {
            sender,
            content: Arc::from(content.as_ref()),
            message_type: None,
            created_at: Utc::now(),
        }
    }

    /// Convenience constructor for a candidate-authored message.
    pub fn candidate(content: impl AsRef<str>) -> Self {
        Self::new(Sender::Candidate, content)
    }

    /// Convenience constructor for an AI (HR side) message.
    pub fn ai(content: impl AsRef<str>) -> Self {
        Self::new(Sender::Ai, content)
    }
}

/// The job position this conversation is about.
#[derive(Debug, Clone)]
pub struct PositionInfo {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub requirements: Option<String>,
}

impl PositionInfo {
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
            requirements: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_requirements(mut self, requirements: impl Into<String>) -> Self {
        self.requirements = Some(requirements.into());
        self
    }

    /// Structured form used for the `jobInfo` template variable.
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id.to_string(),
            "name": self.name,
            "description": self.description.as_deref().unwrap_or(""),
            "requirements": self.requirements.as_deref().unwrap_or(""),
        })
    }
}

/// Everything the engine knows about one candidate turn. Immutable once
/// built; speculative branches that need extra fields clone it via
/// [`ConversationContext::with_knowledge_results`] /
/// [`ConversationContext::with_current_question`].
#[derive(Debug, Clone)]
pub struct ConversationContext {
    pub conversation_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub job_id: Uuid,
    pub resume_id: Uuid,
    pub status: ConversationStatus,
    pub stage: ConversationStage,
    /// The candidate message that triggered this turn. Non-empty after
    /// trimming (enforced at build time).
    pub last_candidate_message: String,
    /// Full transcript, oldest first. May be empty on the very first turn.
    pub history: Vec<Message>,
    pub position_info: PositionInfo,
    /// Search hits attached by the knowledge node on its private copy.
    pub knowledge_base_results: Option<Vec<KnowledgeEntry>>,
    pub current_question_id: Option<Uuid>,
    pub current_question_content: Option<String>,
    pub current_question_requirement: Option<String>,
}

impl ConversationContext {
    /// Start building a context. `build()` validates the invariants.
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    /// A copy of this context with knowledge-base hits attached. The
    /// original is left untouched so sibling branches racing in parallel
    /// never observe the enrichment.
    pub fn with_knowledge_results(&self, results: Vec<KnowledgeEntry>) -> Self {
        let mut copy = self.clone();
        copy.knowledge_base_results = Some(results);
        copy
    }

    /// A copy of this context focused on one assessment question.
    pub fn with_current_question(
        &self,
        question_id: Uuid,
        content: impl Into<String>,
        requirement: Option<String>,
    ) -> Self {
        let mut copy = self.clone();
        copy.current_question_id = Some(question_id);
        copy.current_question_content = Some(content.into());
        copy.current_question_requirement = requirement;
        copy
    }

    /// Flatten the context into the fixed set of template variables the
    /// prompt templates expect. The variable names are a stable contract
    /// with the prompt loader; adding one is a breaking change.
    pub fn template_vars(&self) -> Map<String, Value> {
        let mut vars = Map::new();
        vars.insert(
            "lastCandidateMessage".into(),
            Value::String(self.last_candidate_message.clone()),
        );
        vars.insert("chatHistory".into(), Value::String(self.format_history()));
        vars.insert("jobInfo".into(), self.position_info.to_json());
        vars.insert(
            "jobTitle".into(),
            Value::String(self.position_info.name.clone()),
        );
        vars.insert(
            "jobDescription".into(),
            Value::String(
                self.position_info
                    .description
                    .clone()
                    .unwrap_or_default(),
            ),
        );
        vars.insert(
            "jobRequirement".into(),
            Value::String(
                self.position_info
                    .requirements
                    .clone()
                    .unwrap_or_default(),
            ),
        );
        vars.insert(
            "knowledgeBase".into(),
            Value::String(self.format_knowledge_base()),
        );
        vars.insert(
            "lastHRMessage".into(),
            Value::String(self.last_hr_message()),
        );
        vars.insert(
            "currentQuestion".into(),
            Value::String(self.current_question_content.clone().unwrap_or_default()),
        );
        vars
    }

    /// The last [`HISTORY_WINDOW`] messages, oldest first, one per line,
    /// prefixed with the role label the prompts expect.
    pub fn format_history(&self) -> String {
        let start = self.history.len().saturating_sub(HISTORY_WINDOW);
        self.history[start..]
            .iter()
            .map(|msg| {
                let role = match msg.sender {
                    Sender::Candidate => "候选人",
                    _ => "HR",
                };
                format!("{}: {}", role, msg.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The most recent AI-authored message, or an empty string.
    pub fn last_hr_message(&self) -> String {
        self.history
            .iter()
            .rev()
            .find(|msg| msg.sender == Sender::Ai)
            .map(|msg| msg.content.to_string())
            .unwrap_or_default()
    }

    /// Numbered rendering of the attached knowledge hits; empty string when
    /// none are attached.
    pub fn format_knowledge_base(&self) -> String {
        let entries = match &self.knowledge_base_results {
            Some(entries) if !entries.is_empty() => entries,
            _ => return String::new(),
        };
        let mut lines = Vec::new();
        for (idx, entry) in entries.iter().enumerate() {
            lines.push(format!("知识{}:", idx + 1));
            lines.push(format!("问题: {}", entry.question));
            lines.push(format!("答案: {}", entry.answer));
            lines.push(String::new());
        }
        lines.join("\n")
    }
}

/// Builder for [`ConversationContext`]; `build()` enforces the invariants
/// so a context that exists is a context the engine can run.
#[derive(Debug, Default)]
pub struct ContextBuilder {
    conversation_id: Option<Uuid>,
    tenant_id: Option<Uuid>,
    user_id: Option<Uuid>,
    job_id: Option<Uuid>,
    resume_id: Option<Uuid>,
    status: Option<ConversationStatus>,
    stage: Option<ConversationStage>,
    last_candidate_message: Option<String>,
    history: Vec<Message>,
    position_info: Option<PositionInfo>,
    knowledge_base_results: Option<Vec<KnowledgeEntry>>,
    current_question_id: Option<Uuid>,
    current_question_content: Option<String>,
    current_question_requirement: Option<String>,
}

impl ContextBuilder {
    pub fn conversation_id(mut self, id: Uuid) -> Self {
        self.conversation_id = Some(id);
        self
    }

    pub fn tenant_id(mut self, id: Uuid) -> Self {
        self.tenant_id = Some(id);
        self
    }

    pub fn user_id(mut self, id: Uuid) -> Self {
        self.user_id = Some(id);
        self
    }

    pub fn job_id(mut self, id: Uuid) -> Self {
        self.job_id = Some(id);
        self
    }

    pub fn resume_id(mut self, id: Uuid) -> Self {
        self.resume_id = Some(id);
        self
    }

    pub fn status(mut self, status: ConversationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn stage(mut self, stage: ConversationStage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn last_candidate_message(mut self, message: impl Into<String>) -> Self {
        self.last_candidate_message = Some(message.into());
        self
    }

    pub fn history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn position_info(mut self, info: PositionInfo) -> Self {
        self.position_info = Some(info);
        self
    }

    pub fn knowledge_base_results(mut self, results: Vec<KnowledgeEntry>) -> Self {
        self.knowledge_base_results = Some(results);
        self
    }

    pub fn current_question(
        mut self,
        id: Uuid,
        content: impl Into<String>,
        requirement: Option<String>,
    ) -> Self {
        self.current_question_id = Some(id);
        self.current_question_content = Some(content.into());
        self.current_question_requirement = requirement;
        self
    }

    /// Validate and assemble the context.
    pub fn build(self) -> Result<ConversationContext, FlowError> {
        let conversation_id = require_id(self.conversation_id, "conversation_id")?;
        let tenant_id = require_id(self.tenant_id, "tenant_id")?;
        let user_id = require_id(self.user_id, "user_id")?;
        let job_id = require_id(self.job_id, "job_id")?;
        let resume_id = require_id(self.resume_id, "resume_id")?;

        let status = self
            .status
            .ok_or_else(|| FlowError::InvalidContext("status must be set".into()))?;
        let stage = self
            .stage
            .ok_or_else(|| FlowError::InvalidContext("stage must be set".into()))?;

        let last_candidate_message = self
            .last_candidate_message
            .ok_or_else(|| FlowError::InvalidContext("last_candidate_message must be set".into()))?;
        if last_candidate_message.trim().is_empty() {
            return Err(FlowError::InvalidContext(
                "last_candidate_message must not be blank".into(),
            ));
        }

        let position_info = self
            .position_info
            .ok_or_else(|| FlowError::InvalidContext("position_info must be set".into()))?;

        Ok(ConversationContext {
            conversation_id,
            tenant_id,
            user_id,
            job_id,
            resume_id,
            status,
            stage,
            last_candidate_message,
            history: self.history,
            position_info,
            knowledge_base_results: self.knowledge_base_results,
            current_question_id: self.current_question_id,
            current_question_content: self.current_question_content,
            current_question_requirement: self.current_question_requirement,
        })
    }
}

fn require_id(id: Option<Uuid>, field: &str) -> Result<Uuid, FlowError> {
    match id {
        Some(id) if !id.is_nil() => Ok(id),
        _ => Err(FlowError::InvalidContext(format!(
            "{} must be a non-nil id",
            field
        ))),
    }
}

/// The outcome of executing one node (or one group).
///
/// `message` is only ever present when `action == SendMessage`; the
/// constructors enforce the pairing. `data` carries the parsed model answer
/// for downstream nodes and groups to inspect, never the user-facing
/// message, never error internals (those go to `fallback_reason`).
#[derive(Debug, Clone)]
pub struct NodeResult {
    pub node_name: String,
    pub action: NodeAction,
    pub message: Option<String>,
    /// Targets for `NextNode`. Only the first name is followed; the rest
    /// are informational.
    pub next_node: Option<Vec<String>>,
    pub reason: Option<String>,
    pub data: Map<String, Value>,
    pub execution_time_ms: Option<f64>,
    /// Set when this result came from a fallback path instead of a clean
    /// node execution.
    pub is_fallback: bool,
    /// Technical failure detail for logs and ops. Never surfaced to the
    /// candidate.
    pub fallback_reason: Option<String>,
    /// For group results: every inner node started, in start order, ending
    /// with the terminal node. Leaf nodes leave this empty.
    pub executed: Vec<String>,
}

impl NodeResult {
    /// A result with no message. Use [`NodeResult::send_message`] for
    /// `SendMessage` results.
    pub fn new(node_name: impl Into<String>, action: NodeAction) -> Self {
        Self {
            node_name: node_name.into(),
            action,
            message: None,
            next_node: None,
            reason: None,
            data: Map::new(),
            execution_time_ms: None,
            is_fallback: false,
            fallback_reason: None,
            executed: Vec::new(),
        }
    }

    /// A `SendMessage` result. The only way to attach a message.
    pub fn send_message(node_name: impl Into<String>, message: impl Into<String>) -> Self {
        let mut result = Self::new(node_name, NodeAction::SendMessage);
        result.message = Some(message.into());
        result
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_next(mut self, targets: &[&str]) -> Self {
        self.next_node = Some(targets.iter().map(|name| name.to_string()).collect());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// First `NextNode` target, if any.
    pub fn first_next(&self) -> Option<&str> {
        self.next_node
            .as_ref()
            .and_then(|targets| targets.first())
            .map(|name| name.as_str())
    }

    pub fn data_bool(&self, key: &str) -> Option<bool> {
        self.data.get(key).and_then(|value| value.as_bool())
    }

    pub fn data_i64(&self, key: &str) -> Option<i64> {
        self.data.get(key).and_then(|value| value.as_i64())
    }

    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|value| value.as_str())
    }
}

/// Provenance attached to a [`FlowResult`].
#[derive(Debug, Clone)]
pub struct FlowMetadata {
    /// Name of the node whose result was selected.
    pub source_node: String,
    /// That node's parsed `data` map.
    pub node_data: Map<String, Value>,
}

/// The engine's final decision for one candidate turn.
#[derive(Debug, Clone)]
pub struct FlowResult {
    pub action: NodeAction,
    pub message: Option<String>,
    pub reason: Option<String>,
    pub metadata: FlowMetadata,
    /// Node names in the order they were started, across all phases.
    pub execution_path: Vec<String>,
    pub total_time_ms: f64,
}

impl FlowResult {
    /// Lift a single node's result into a flow result.
    pub fn from_node_result(result: NodeResult) -> Self {
        let path = if result.executed.is_empty() {
            vec![result.node_name.clone()]
        } else {
            result.executed.clone()
        };
        Self {
            action: result.action,
            message: result.message,
            reason: result.reason,
            metadata: FlowMetadata {
                source_node: result.node_name,
                node_data: result.data,
            },
            execution_path: path,
            total_time_ms: result.execution_time_ms.unwrap_or(0.0),
        }
    }
}
