//! In-memory reference implementations of the engine's ports.
//!
//! Production deployments put SQL behind the repository traits; these
//! implementations keep the same observable semantics (tenancy filters,
//! soft-delete invisibility, the next-question ordering rule) in plain
//! vectors behind async locks. They carry the integration tests and are a
//! convenient starting point for embedders prototyping without a database.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::hireflow::error::FlowError;
use crate::hireflow::knowledge::{KnowledgeEntry, KnowledgeSearch};
use crate::hireflow::model::ConversationStage;
use crate::hireflow::repo::{
    ConversationRepo, JobQuestion, JobQuestionRepo, JobQuestionStatus, QuestionStatus,
    QuestionTracking, QuestionTrackingRepo,
};

/// Catalog of job questions held in memory.
#[derive(Default)]
pub struct InMemoryJobQuestionRepo {
    questions: RwLock<Vec<JobQuestion>>,
}

impl InMemoryJobQuestionRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_questions(questions: Vec<JobQuestion>) -> Self {
        Self {
            questions: RwLock::new(questions),
        }
    }

    pub async fn insert(&self, question: JobQuestion) {
        self.questions.write().await.push(question);
    }
}

#[async_trait]
impl JobQuestionRepo for InMemoryJobQuestionRepo {
    async fn list_by_job(
        &self,
        job_id: Uuid,
        _tenant_id: Uuid,
    ) -> Result<Vec<JobQuestion>, FlowError> {
        let mut matches: Vec<JobQuestion> = self
            .questions
            .read()
            .await
            .iter()
            .filter(|question| {
                question.job_id == job_id && question.status != JobQuestionStatus::Deleted
            })
            .cloned()
            .collect();
        matches.sort_by_key(|question| question.sort_order);
        Ok(matches)
    }

    async fn get_by_id(
        &self,
        id: Uuid,
        _tenant_id: Uuid,
    ) -> Result<Option<JobQuestion>, FlowError> {
        Ok(self
            .questions
            .read()
            .await
            .iter()
            .find(|question| question.id == id)
            .cloned())
    }
}

/// One stored tracking row plus the catalog sort order it inherited at
/// creation time (the production store gets this via a join).
struct TrackedRow {
    row: QuestionTracking,
    sort_order: i32,
}

/// Per-conversation question tracking held in memory.
#[derive(Default)]
pub struct InMemoryQuestionTrackingRepo {
    rows: RwLock<Vec<TrackedRow>>,
}

impl InMemoryQuestionTrackingRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a row directly, bypassing `bulk_create`. Useful for tests that
    /// start mid-conversation.
    pub async fn seed_row(&self, row: QuestionTracking, sort_order: i32) {
        self.rows.write().await.push(TrackedRow { row, sort_order });
    }

    /// Snapshot of all rows for a conversation, unordered.
    pub async fn snapshot(&self, conversation_id: Uuid) -> Vec<QuestionTracking> {
        self.rows
            .read()
            .await
            .iter()
            .filter(|tracked| tracked.row.conversation_id == conversation_id)
            .map(|tracked| tracked.row.clone())
            .collect()
    }
}

#[async_trait]
impl QuestionTrackingRepo for InMemoryQuestionTrackingRepo {
    async fn bulk_create(
        &self,
        conversation_id: Uuid,
        job_id: Uuid,
        resume_id: Uuid,
        tenant_id: Uuid,
        user_id: Uuid,
        questions: &[JobQuestion],
    ) -> Result<(), FlowError> {
        let mut rows = self.rows.write().await;
        for question in questions {
            rows.push(TrackedRow {
                row: QuestionTracking {
                    id: Uuid::new_v4(),
                    conversation_id,
                    question_id: question.id,
                    job_id,
                    resume_id,
                    tenant_id,
                    user_id,
                    question: question.question.clone(),
                    status: QuestionStatus::Pending,
                    is_satisfied: None,
                    created_at: Utc::now(),
                },
                sort_order: question.sort_order,
            });
        }
        Ok(())
    }

    async fn list_by_conversation(
        &self,
        conversation_id: Uuid,
        tenant_id: Uuid,
        status: Option<QuestionStatus>,
    ) -> Result<Vec<QuestionTracking>, FlowError> {
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .filter(|tracked| {
                let row = &tracked.row;
                row.conversation_id == conversation_id
                    && row.tenant_id == tenant_id
                    && row.status != QuestionStatus::Deleted
                    && status.map(|wanted| row.status == wanted).unwrap_or(true)
            })
            .map(|tracked| tracked.row.clone())
            .collect())
    }

    async fn get_next_pending(
        &self,
        conversation_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Option<QuestionTracking>, FlowError> {
        let rows = self.rows.read().await;
        let mut candidates: Vec<&TrackedRow> = rows
            .iter()
            .filter(|tracked| {
                let row = &tracked.row;
                row.conversation_id == conversation_id
                    && row.tenant_id == tenant_id
                    && matches!(row.status, QuestionStatus::Ongoing | QuestionStatus::Pending)
            })
            .collect();
        // Ongoing before pending, then catalog order.
        candidates.sort_by_key(|tracked| {
            let status_rank = match tracked.row.status {
                QuestionStatus::Ongoing => 0,
                _ => 1,
            };
            (status_rank, tracked.sort_order)
        });
        Ok(candidates.first().map(|tracked| tracked.row.clone()))
    }

    async fn update_status(
        &self,
        id: Uuid,
        tenant_id: Uuid,
        status: QuestionStatus,
        is_satisfied: Option<bool>,
    ) -> Result<Option<QuestionTracking>, FlowError> {
        let mut rows = self.rows.write().await;
        for tracked in rows.iter_mut() {
            if tracked.row.id == id && tracked.row.tenant_id == tenant_id {
                tracked.row.status = status;
                if is_satisfied.is_some() {
                    tracked.row.is_satisfied = is_satisfied;
                }
                return Ok(Some(tracked.row.clone()));
            }
        }
        Ok(None)
    }
}

/// Conversation stages held in memory, with the write log kept around so
/// tests can assert on transition counts.
#[derive(Default)]
pub struct InMemoryConversationRepo {
    stages: RwLock<HashMap<Uuid, ConversationStage>>,
    updates: RwLock<Vec<(Uuid, ConversationStage)>>,
}

impl InMemoryConversationRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn stage_of(&self, conversation_id: Uuid) -> Option<ConversationStage> {
        self.stages.read().await.get(&conversation_id).copied()
    }

    /// Every `update_stage` call observed, in order.
    pub async fn stage_updates(&self) -> Vec<(Uuid, ConversationStage)> {
        self.updates.read().await.clone()
    }
}

#[async_trait]
impl ConversationRepo for InMemoryConversationRepo {
    async fn update_stage(
        &self,
        conversation_id: Uuid,
        _tenant_id: Uuid,
        stage: ConversationStage,
    ) -> Result<(), FlowError> {
        self.stages.write().await.insert(conversation_id, stage);
        self.updates.write().await.push((conversation_id, stage));
        log::debug!("conversation {} stage -> {}", conversation_id, stage.as_str());
        Ok(())
    }
}

/// Knowledge search that returns a fixed entry list, truncated to `top_k`.
/// An empty list models "no hit".
#[derive(Default)]
pub struct StaticKnowledgeSearch {
    entries: Vec<KnowledgeEntry>,
}

impl StaticKnowledgeSearch {
    /// A search that never finds anything.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: Vec<KnowledgeEntry>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl KnowledgeSearch for StaticKnowledgeSearch {
    async fn search(
        &self,
        _query: &str,
        _job_id: Uuid,
        _tenant_id: Uuid,
        _conversation_id: Option<Uuid>,
        top_k: usize,
    ) -> Result<Vec<KnowledgeEntry>, FlowError> {
        Ok(self.entries.iter().take(top_k).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hireflow::repo::QuestionType;

    fn job_question(job_id: Uuid, text: &str, sort_order: i32) -> JobQuestion {
        JobQuestion {
            id: Uuid::new_v4(),
            job_id,
            question: text.to_string(),
            question_type: QuestionType::Information,
            is_required: false,
            evaluation_criteria: None,
            sort_order,
            status: JobQuestionStatus::Active,
        }
    }

    #[tokio::test]
    async fn next_question_prefers_ongoing_then_sort_order() {
        let repo = InMemoryQuestionTrackingRepo::new();
        let conversation_id = Uuid::new_v4();
        let tenant_id = Uuid::new_v4();
        let job_id = Uuid::new_v4();

        let questions = vec![
            job_question(job_id, "第一题", 1),
            job_question(job_id, "第二题", 2),
            job_question(job_id, "第三题", 3),
        ];
        repo.bulk_create(
            conversation_id,
            job_id,
            Uuid::new_v4(),
            tenant_id,
            Uuid::new_v4(),
            &questions,
        )
        .await
        .unwrap();

        // All pending: the lowest sort order wins.
        let first = repo
            .get_next_pending(conversation_id, tenant_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.question, "第一题");

        // Mark the *second* question ongoing; it now outranks the first.
        let rows = repo.snapshot(conversation_id).await;
        let second = rows.iter().find(|row| row.question == "第二题").unwrap();
        repo.update_status(second.id, tenant_id, QuestionStatus::Ongoing, None)
            .await
            .unwrap();
        let next = repo
            .get_next_pending(conversation_id, tenant_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.question, "第二题");

        // Complete it; pending rows resume in catalog order.
        repo.update_status(second.id, tenant_id, QuestionStatus::Completed, Some(true))
            .await
            .unwrap();
        let next = repo
            .get_next_pending(conversation_id, tenant_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.question, "第一题");
    }

    #[tokio::test]
    async fn deleted_rows_are_invisible() {
        let repo = InMemoryQuestionTrackingRepo::new();
        let conversation_id = Uuid::new_v4();
        let tenant_id = Uuid::new_v4();
        let job_id = Uuid::new_v4();
        repo.bulk_create(
            conversation_id,
            job_id,
            Uuid::new_v4(),
            tenant_id,
            Uuid::new_v4(),
            &[job_question(job_id, "唯一的问题", 1)],
        )
        .await
        .unwrap();

        let row = repo.snapshot(conversation_id).await.remove(0);
        repo.update_status(row.id, tenant_id, QuestionStatus::Deleted, None)
            .await
            .unwrap();

        assert!(repo
            .list_by_conversation(conversation_id, tenant_id, None)
            .await
            .unwrap()
            .is_empty());
        assert!(repo
            .get_next_pending(conversation_id, tenant_id)
            .await
            .unwrap()
            .is_none());
    }
}
