// src/lib.rs

// Import the top-level `hireflow` module.
pub mod hireflow;

// Re-export the submodules at the crate root so embedders (and the
// integration tests) can write `hireflow::gateway::scenes` instead of
// `hireflow::hireflow::gateway::scenes`.
pub use hireflow::{
    error, executor, factory, gateway, groups, knowledge, model, node, nodes, orchestrator, repo,
    stores,
};

// Re-exporting key items for easier external access, so callers can write
// `hireflow::Orchestrator` instead of navigating the whole hierarchy.
pub use hireflow::error::{FlowError, LlmError};
pub use hireflow::executor::DynamicExecutor;
pub use hireflow::factory::NodeFactory;
pub use hireflow::gateway::{LlmGateway, LlmResponse, SceneOverrides};
pub use hireflow::knowledge::{KnowledgeEntry, KnowledgeSearch};
pub use hireflow::model::{
    ConversationContext, ConversationStage, ConversationStatus, FlowResult, Message, NodeAction,
    NodeResult, PositionInfo, Sender,
};
pub use hireflow::node::{FlowDeps, Node};
pub use hireflow::orchestrator::Orchestrator;
pub use hireflow::repo::{
    ConversationRepo, JobQuestion, JobQuestionRepo, QuestionStatus, QuestionTracking,
    QuestionTrackingRepo, QuestionType,
};
