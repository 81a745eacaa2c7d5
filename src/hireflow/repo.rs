//! Repository ports and the persisted entities the engine reads and writes.
//!
//! The engine is testable without a live database: it depends on these
//! traits, supplies `tenant_id` on every call, and leaves tenancy
//! enforcement to the implementation. In-memory reference implementations
//! live in [`stores`](crate::hireflow::stores).
//!
//! Writes the engine performs (stage transitions, tracking-status updates,
//! the bulk creation of tracking rows) always happen strictly before the
//! terminal result of a turn is returned.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hireflow::error::FlowError;
use crate::hireflow::model::ConversationStage;

/// Kind of a catalog question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    /// Information gathering: no grading, the answer is simply collected.
    Information,
    /// Assessment: the answer is graded against `evaluation_criteria`.
    Assessment,
}

/// Catalog lifecycle of a [`JobQuestion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobQuestionStatus {
    Active,
    Deleted,
}

/// Lifecycle of a per-conversation [`QuestionTracking`] row.
///
/// `pending → ongoing` when the engine picks the question to ask;
/// `{pending, ongoing} → completed` once the answer has been evaluated (or
/// a non-assessment question is handled); `skipped` on explicit skips;
/// `deleted` rows are invisible to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionStatus {
    Pending,
    Ongoing,
    Completed,
    Skipped,
    Deleted,
}

/// A question the HR team configured for a job. Read-only for the engine.
#[derive(Debug, Clone)]
pub struct JobQuestion {
    pub id: Uuid,
    pub job_id: Uuid,
    pub question: String,
    pub question_type: QuestionType,
    pub is_required: bool,
    pub evaluation_criteria: Option<String>,
    pub sort_order: i32,
    pub status: JobQuestionStatus,
}

/// Per-(conversation, question) state driving the assessment state machine.
///
/// Carries a redundant copy of the question text so the question stage can
/// run without re-joining the catalog on every turn.
#[derive(Debug, Clone)]
pub struct QuestionTracking {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub question_id: Uuid,
    pub job_id: Uuid,
    pub resume_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub question: String,
    pub status: QuestionStatus,
    /// Set only for assessment questions, and only once an answer has been
    /// graded as satisfying the criteria.
    pub is_satisfied: Option<bool>,
    pub created_at: DateTime<Utc>,
}

/// Read access to the per-job question catalog.
#[async_trait]
pub trait JobQuestionRepo: Send + Sync {
    /// Non-deleted questions for the job, ordered by `sort_order` ascending.
    async fn list_by_job(
        &self,
        job_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Vec<JobQuestion>, FlowError>;

    async fn get_by_id(
        &self,
        id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Option<JobQuestion>, FlowError>;
}

/// Read/write access to the per-conversation question tracking rows.
#[async_trait]
pub trait QuestionTrackingRepo: Send + Sync {
    /// Materialize one `pending` row per catalog question. Called once, when
    /// a conversation first enters the question stage.
    async fn bulk_create(
        &self,
        conversation_id: Uuid,
        job_id: Uuid,
        resume_id: Uuid,
        tenant_id: Uuid,
        user_id: Uuid,
        questions: &[JobQuestion],
    ) -> Result<(), FlowError>;

    /// Tracking rows for a conversation, optionally filtered by status.
    /// `deleted` rows are never returned.
    async fn list_by_conversation(
        &self,
        conversation_id: Uuid,
        tenant_id: Uuid,
        status: Option<QuestionStatus>,
    ) -> Result<Vec<QuestionTracking>, FlowError>;

    /// The next question to ask: among rows in `{ongoing, pending}`, prefer
    /// `ongoing` over `pending`; within the same status, ascending catalog
    /// `sort_order`; first row wins. Ordering is the implementation's job
    /// (SQL-level in production).
    async fn get_next_pending(
        &self,
        conversation_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Option<QuestionTracking>, FlowError>;

    /// Update a row's status, optionally recording the grading outcome.
    /// Returns the updated row, or `None` if it does not exist.
    async fn update_status(
        &self,
        id: Uuid,
        tenant_id: Uuid,
        status: QuestionStatus,
        is_satisfied: Option<bool>,
    ) -> Result<Option<QuestionTracking>, FlowError>;
}

/// Write access to the single conversation field the engine mutates.
#[async_trait]
pub trait ConversationRepo: Send + Sync {
    async fn update_stage(
        &self,
        conversation_id: Uuid,
        tenant_id: Uuid,
        stage: ConversationStage,
    ) -> Result<(), FlowError>;
}
