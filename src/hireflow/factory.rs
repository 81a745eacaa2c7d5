//! The node factory: name → shared node instance.
//!
//! Concrete nodes are stateless with respect to the conversation (the
//! context arrives on every call), so one instance per name is enough for
//! the whole process. The factory caches instances behind an async lock
//! with a double-checked lookup; the set of known names is a static table,
//! so [`NodeFactory::has_node`] never touches the lock.
//!
//! The two group executors are registered under `response_group` /
//! `question_group` like any other node.

use lazy_static::lazy_static;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::hireflow::error::FlowError;
use crate::hireflow::gateway::scenes;
use crate::hireflow::groups::{question_group, response_group, QuestionGroup, ResponseGroup};
use crate::hireflow::node::{FlowDeps, Node};
use crate::hireflow::nodes::{
    AskQuestionNode, CasualChatNode, ContinueConversationNode, EmotionAnalysisNode,
    FallbackAnswerNode, HighEqResponseNode, KnowledgeAnswerNode, QuestionHandlerNode,
    QuestionWillingnessNode, RelevanceCheckNode, RequirementMatchNode, ResumeConversationNode,
    TransferHumanIntentNode,
};

/// Registry name of the response group executor.
pub const RESPONSE_GROUP: &str = response_group::NODE_NAME;
/// Registry name of the question group executor.
pub const QUESTION_GROUP: &str = question_group::NODE_NAME;

lazy_static! {
    /// Every node name the factory can build. Registration is static; no
    /// dynamic loading of new node kinds at runtime.
    static ref NODE_NAMES: HashSet<&'static str> = {
        let names: &[&'static str] = &[
            // Pre-check
            scenes::TRANSFER_HUMAN_INTENT,
            scenes::CANDIDATE_EMOTION,
            // Response group members
            scenes::CONTINUE_CONVERSATION,
            scenes::CANDIDATE_ASK_QUESTION,
            scenes::ANSWER_BASED_ON_KNOWLEDGE,
            scenes::ANSWER_WITHOUT_KNOWLEDGE,
            scenes::CASUAL_CONVERSATION,
            // Question stage
            scenes::RELEVANCE_REPLY_AND_QUESTION,
            scenes::REPLY_MATCH_QUESTION_REQUIREMENT,
            scenes::QUESTION_WILLINGNESS,
            scenes::INFORMATION_GATHERING_QUESTION,
            // Closing
            scenes::HIGH_EQ_RESPONSE,
            scenes::RESUME_CONVERSATION,
            // Groups
            RESPONSE_GROUP,
            QUESTION_GROUP,
        ];
        names.iter().copied().collect()
    };
}

/// Builds nodes by name and hands out cached singletons.
pub struct NodeFactory {
    deps: FlowDeps,
    cache: Mutex<HashMap<String, Arc<dyn Node>>>,
}

impl NodeFactory {
    pub fn new(deps: FlowDeps) -> Self {
        Self {
            deps,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Cheap membership check against the static name table.
    pub fn has_node(&self, node_name: &str) -> bool {
        NODE_NAMES.contains(node_name)
    }

    /// All registered node names, for diagnostics.
    pub fn node_names() -> Vec<&'static str> {
        let mut names: Vec<&'static str> = NODE_NAMES.iter().copied().collect();
        names.sort_unstable();
        names
    }

    /// Return the shared instance for `node_name`, building it on first use.
    pub async fn create_node(&self, node_name: &str) -> Result<Arc<dyn Node>, FlowError> {
        if !self.has_node(node_name) {
            return Err(FlowError::UnknownNode(node_name.to_string()));
        }

        let mut cache = self.cache.lock().await;
        if let Some(node) = cache.get(node_name) {
            return Ok(node.clone());
        }

        log::debug!("creating singleton node {}", node_name);
        let node = self.build(node_name)?;
        cache.insert(node_name.to_string(), node.clone());
        Ok(node)
    }

    fn build(&self, node_name: &str) -> Result<Arc<dyn Node>, FlowError> {
        let deps = &self.deps;
        let node: Arc<dyn Node> = match node_name {
            scenes::TRANSFER_HUMAN_INTENT => {
                Arc::new(TransferHumanIntentNode::new(deps.gateway.clone()))
            }
            scenes::CANDIDATE_EMOTION => Arc::new(EmotionAnalysisNode::new(deps.gateway.clone())),
            scenes::CONTINUE_CONVERSATION => {
                Arc::new(ContinueConversationNode::new(deps.gateway.clone()))
            }
            scenes::CANDIDATE_ASK_QUESTION => Arc::new(AskQuestionNode::new(deps.gateway.clone())),
            scenes::ANSWER_BASED_ON_KNOWLEDGE => Arc::new(KnowledgeAnswerNode::new(
                deps.gateway.clone(),
                deps.knowledge.clone(),
            )),
            scenes::ANSWER_WITHOUT_KNOWLEDGE => {
                Arc::new(FallbackAnswerNode::new(deps.gateway.clone()))
            }
            scenes::CASUAL_CONVERSATION => Arc::new(CasualChatNode::new(deps.gateway.clone())),
            scenes::RELEVANCE_REPLY_AND_QUESTION => {
                Arc::new(RelevanceCheckNode::new(deps.gateway.clone()))
            }
            scenes::REPLY_MATCH_QUESTION_REQUIREMENT => {
                Arc::new(RequirementMatchNode::new(deps.gateway.clone()))
            }
            scenes::QUESTION_WILLINGNESS => {
                Arc::new(QuestionWillingnessNode::new(deps.gateway.clone()))
            }
            scenes::INFORMATION_GATHERING_QUESTION => {
                Arc::new(QuestionHandlerNode::new(deps.tracking.clone()))
            }
            scenes::HIGH_EQ_RESPONSE => Arc::new(HighEqResponseNode::new(deps.gateway.clone())),
            scenes::RESUME_CONVERSATION => {
                Arc::new(ResumeConversationNode::new(deps.gateway.clone()))
            }
            RESPONSE_GROUP => Arc::new(ResponseGroup::new(deps.clone())),
            QUESTION_GROUP => Arc::new(QuestionGroup::new(deps.clone())),
            other => return Err(FlowError::UnknownNode(other.to_string())),
        };
        Ok(node)
    }
}
