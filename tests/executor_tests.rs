//! Parallel execution and deadline behaviour of the dynamic executor.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use hireflow::factory::NodeFactory;
use hireflow::gateway::scenes;
use hireflow::stores::{
    InMemoryConversationRepo, InMemoryJobQuestionRepo, InMemoryQuestionTrackingRepo,
    StaticKnowledgeSearch,
};
use hireflow::{
    ConversationContext, ConversationStage, ConversationStatus, DynamicExecutor, FlowDeps,
    FlowError, LlmError, LlmGateway, LlmResponse, Message, NodeAction, PositionInfo,
    SceneOverrides,
};

/// Scripted gateway: one fixed response per scene, with optional per-scene
/// artificial latency. Unscripted scenes fail with a permanent error so a
/// test that hits one fails loudly.
#[derive(Default)]
struct ScriptedGateway {
    responses: HashMap<String, Result<LlmResponse, LlmError>>,
    delays: HashMap<String, Duration>,
}

impl ScriptedGateway {
    fn new() -> Self {
        Self::default()
    }

    fn script(mut self, scene: &str, response: LlmResponse) -> Self {
        self.responses.insert(scene.to_string(), Ok(response));
        self
    }

    fn script_error(mut self, scene: &str, error: LlmError) -> Self {
        self.responses.insert(scene.to_string(), Err(error));
        self
    }

    fn delay(mut self, scene: &str, delay: Duration) -> Self {
        self.delays.insert(scene.to_string(), delay);
        self
    }
}

#[async_trait]
impl LlmGateway for ScriptedGateway {
    async fn call_with_scene(
        &self,
        scene_name: &str,
        _template_vars: &Map<String, Value>,
        _overrides: Option<&SceneOverrides>,
    ) -> Result<LlmResponse, LlmError> {
        if let Some(delay) = self.delays.get(scene_name) {
            tokio::time::sleep(*delay).await;
        }
        match self.responses.get(scene_name) {
            Some(result) => result.clone(),
            None => Err(LlmError::Validation(format!(
                "no scripted response for scene {}",
                scene_name
            ))),
        }
    }
}

fn deps_with(gateway: Arc<dyn LlmGateway>) -> FlowDeps {
    FlowDeps {
        gateway,
        knowledge: Arc::new(StaticKnowledgeSearch::empty()),
        job_questions: Arc::new(InMemoryJobQuestionRepo::new()),
        tracking: Arc::new(InMemoryQuestionTrackingRepo::new()),
        conversations: Arc::new(InMemoryConversationRepo::new()),
    }
}

fn sample_context() -> ConversationContext {
    ConversationContext::builder()
        .conversation_id(Uuid::new_v4())
        .tenant_id(Uuid::new_v4())
        .user_id(Uuid::new_v4())
        .job_id(Uuid::new_v4())
        .resume_id(Uuid::new_v4())
        .status(ConversationStatus::Ongoing)
        .stage(ConversationStage::Greeting)
        .last_candidate_message("薪资是多少")
        .history(vec![Message::candidate("薪资是多少")])
        .position_info(PositionInfo::new(Uuid::new_v4(), "Rust 后端工程师"))
        .build()
        .unwrap()
}

#[tokio::test]
async fn parallel_results_cover_exactly_the_requested_names() {
    let gateway = Arc::new(
        ScriptedGateway::new()
            .script(
                scenes::TRANSFER_HUMAN_INTENT,
                LlmResponse::Json(json!({"transfer": "NO"})),
            )
            .script(
                scenes::CANDIDATE_EMOTION,
                LlmResponse::Json(json!({"分数": 1, "原因": "平稳"})),
            ),
    );
    let executor = DynamicExecutor::new(deps_with(gateway));

    let names = [scenes::TRANSFER_HUMAN_INTENT, scenes::CANDIDATE_EMOTION];
    let results = executor
        .execute_parallel(&names, &sample_context(), Duration::from_secs(5))
        .await;

    assert_eq!(results.len(), 2);
    for name in names.iter() {
        assert!(results.contains_key(*name), "missing entry for {}", name);
        assert!(!results[*name].is_fallback);
    }
}

#[tokio::test]
async fn deadline_converts_stuck_tasks_without_waiting_for_them() {
    let gateway = Arc::new(
        ScriptedGateway::new()
            .script(
                scenes::CASUAL_CONVERSATION,
                LlmResponse::Json(json!({"newReply": "迟到的回复"})),
            )
            .delay(scenes::CASUAL_CONVERSATION, Duration::from_secs(30))
            .script(
                scenes::TRANSFER_HUMAN_INTENT,
                LlmResponse::Json(json!({"transfer": "NO"})),
            ),
    );
    let executor = DynamicExecutor::new(deps_with(gateway));

    let started = Instant::now();
    let results = executor
        .execute_parallel(
            &[scenes::CASUAL_CONVERSATION, scenes::TRANSFER_HUMAN_INTENT],
            &sample_context(),
            Duration::from_millis(200),
        )
        .await;
    let elapsed = started.elapsed();

    // Returns at the deadline, not when the stuck task gets around to it.
    assert!(elapsed < Duration::from_secs(5), "took {:?}", elapsed);

    let stuck = &results[scenes::CASUAL_CONVERSATION];
    assert_eq!(stuck.action, NodeAction::None);
    assert!(stuck.is_fallback);
    assert!(stuck
        .fallback_reason
        .as_deref()
        .unwrap()
        .starts_with("EXECUTION_TIMEOUT"));

    // The fast sibling is unaffected.
    assert!(!results[scenes::TRANSFER_HUMAN_INTENT].is_fallback);
}

#[tokio::test]
async fn failed_sibling_does_not_poison_the_others() {
    let gateway = Arc::new(
        ScriptedGateway::new()
            .script_error(
                scenes::CASUAL_CONVERSATION,
                LlmError::Authentication("bad key".into()),
            )
            .script(
                scenes::TRANSFER_HUMAN_INTENT,
                LlmResponse::Json(json!({"transfer": "NO"})),
            ),
    );
    let executor = DynamicExecutor::new(deps_with(gateway));

    let results = executor
        .execute_parallel(
            &[scenes::CASUAL_CONVERSATION, scenes::TRANSFER_HUMAN_INTENT],
            &sample_context(),
            Duration::from_secs(5),
        )
        .await;

    let failed = &results[scenes::CASUAL_CONVERSATION];
    assert_eq!(failed.action, NodeAction::None);
    assert!(failed.is_fallback);
    assert!(failed
        .fallback_reason
        .as_deref()
        .unwrap()
        .starts_with("LlmError"));

    assert!(!results[scenes::TRANSFER_HUMAN_INTENT].is_fallback);
}

#[tokio::test]
async fn unknown_node_is_an_error_for_execute_and_an_entry_for_parallel() {
    let gateway = Arc::new(ScriptedGateway::new());
    let executor = DynamicExecutor::new(deps_with(gateway));
    let ctx = sample_context();

    match executor.execute("no_such_node", &ctx).await {
        Err(FlowError::UnknownNode(name)) => assert_eq!(name, "no_such_node"),
        other => panic!("expected UnknownNode, got {:?}", other),
    }

    let results = executor
        .execute_parallel(&["no_such_node"], &ctx, Duration::from_secs(1))
        .await;
    let entry = &results["no_such_node"];
    assert!(entry.is_fallback);
    assert!(entry
        .fallback_reason
        .as_deref()
        .unwrap()
        .starts_with("UnknownNodeError"));
}

#[tokio::test]
async fn factory_hands_out_process_wide_singletons() {
    let gateway = Arc::new(ScriptedGateway::new());
    let factory = NodeFactory::new(deps_with(gateway));

    let first = factory
        .create_node(scenes::CASUAL_CONVERSATION)
        .await
        .unwrap();
    let second = factory
        .create_node(scenes::CASUAL_CONVERSATION)
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    assert!(factory.has_node(scenes::HIGH_EQ_RESPONSE));
    assert!(!factory.has_node("N9"));
}
