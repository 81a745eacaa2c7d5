//! Concrete flow nodes, grouped by responsibility.
//!
//! Every node wraps exactly one LLM scene (or, for the question picker, one
//! repository lookup) and maps the parsed answer onto a
//! [`NodeResult`](crate::hireflow::model::NodeResult). Parsing is
//! defensive throughout: a missing field or an out-of-set value becomes a
//! conformance error, which buys one retry before the node's domain-safe
//! fallback engages.

pub mod closing;
pub mod precheck;
pub mod question_stage;
pub mod response;

pub use closing::{HighEqResponseNode, ResumeConversationNode};
pub use precheck::{EmotionAnalysisNode, TransferHumanIntentNode};
pub use question_stage::{
    QuestionHandlerNode, QuestionWillingnessNode, RelevanceCheckNode, RequirementMatchNode,
};
pub use response::{
    AskQuestionNode, CasualChatNode, ContinueConversationNode, FallbackAnswerNode,
    KnowledgeAnswerNode,
};
