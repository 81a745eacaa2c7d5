//! The knowledge-base search port.
//!
//! The HR team curates per-job Q&A entries (salary bands, office location,
//! overtime policy, …). When a candidate asks something, the
//! `answer_based_on_knowledge` node queries this port and feeds the hits to
//! its scene as the `knowledgeBase` template variable. The actual retrieval
//! machinery (vector search, BM25, rank fusion) lives behind the trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hireflow::error::FlowError;

/// How many hits the knowledge node requests per candidate question.
pub const DEFAULT_TOP_K: usize = 3;

/// One curated Q&A entry returned by a search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub question: String,
    pub answer: String,
}

impl KnowledgeEntry {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

/// Knowledge-base search service. An empty result means "no hit".
#[async_trait]
pub trait KnowledgeSearch: Send + Sync {
    async fn search(
        &self,
        query: &str,
        job_id: Uuid,
        tenant_id: Uuid,
        conversation_id: Option<Uuid>,
        top_k: usize,
    ) -> Result<Vec<KnowledgeEntry>, FlowError>;
}
