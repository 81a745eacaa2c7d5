//! Lifecycle of the question group: bootstrap, grading, bookkeeping, and
//! the stuck-conversation guard.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use hireflow::gateway::scenes;
use hireflow::groups::QuestionGroup;
use hireflow::repo::{JobQuestionStatus, QuestionTracking};
use hireflow::stores::{
    InMemoryConversationRepo, InMemoryJobQuestionRepo, InMemoryQuestionTrackingRepo,
    StaticKnowledgeSearch,
};
use hireflow::{
    ConversationContext, ConversationStage, ConversationStatus, FlowDeps, JobQuestion, LlmError,
    LlmGateway, LlmResponse, Message, Node, NodeAction, PositionInfo, QuestionStatus,
    QuestionType, SceneOverrides,
};

struct ScriptedGateway {
    responses: HashMap<String, LlmResponse>,
}

impl ScriptedGateway {
    fn new() -> Self {
        Self {
            responses: HashMap::new(),
        }
    }

    fn script(mut self, scene: &str, response: LlmResponse) -> Self {
        self.responses.insert(scene.to_string(), response);
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
        match self.responses.get(scene_name) {
            Some(response) => Ok(response.clone()),
            None => Err(LlmError::Validation(format!(
                "no scripted response for scene {}",
                scene_name
            ))),
        }
    }
}

/// One fully wired test fixture around the in-memory stores.
struct Fixture {
    group: QuestionGroup,
    job_questions: Arc<InMemoryJobQuestionRepo>,
    tracking: Arc<InMemoryQuestionTrackingRepo>,
    conversations: Arc<InMemoryConversationRepo>,
    conversation_id: Uuid,
    tenant_id: Uuid,
    job_id: Uuid,
}

impl Fixture {
    fn new(gateway: ScriptedGateway) -> Self {
        let job_questions = Arc::new(InMemoryJobQuestionRepo::new());
        let tracking = Arc::new(InMemoryQuestionTrackingRepo::new());
        let conversations = Arc::new(InMemoryConversationRepo::new());
        let deps = FlowDeps {
            gateway: Arc::new(gateway),
            knowledge: Arc::new(StaticKnowledgeSearch::empty()),
            job_questions: job_questions.clone(),
            tracking: tracking.clone(),
            conversations: conversations.clone(),
        };
        Self {
            group: QuestionGroup::new(deps),
            job_questions,
            tracking,
            conversations,
            conversation_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
        }
    }

    fn context(&self, stage: ConversationStage, message: &str, history: Vec<Message>) -> ConversationContext {
        ConversationContext::builder()
            .conversation_id(self.conversation_id)
            .tenant_id(self.tenant_id)
            .user_id(Uuid::new_v4())
            .job_id(self.job_id)
            .resume_id(Uuid::new_v4())
            .status(ConversationStatus::Ongoing)
            .stage(stage)
            .last_candidate_message(message)
            .history(history)
            .position_info(PositionInfo::new(self.job_id, "Rust 后端工程师"))
            .build()
            .unwrap()
    }

    /// Add a catalog question and (optionally) its tracking row.
    async fn add_question(
        &self,
        text: &str,
        sort_order: i32,
        question_type: QuestionType,
        is_required: bool,
        criteria: Option<&str>,
        tracked_as: Option<QuestionStatus>,
    ) -> Uuid {
        let question = JobQuestion {
            id: Uuid::new_v4(),
            job_id: self.job_id,
            question: text.to_string(),
            question_type,
            is_required,
            evaluation_criteria: criteria.map(|value| value.to_string()),
            sort_order,
            status: JobQuestionStatus::Active,
        };
        let question_id = question.id;
        self.job_questions.insert(question.clone()).await;

        if let Some(status) = tracked_as {
            self.tracking
                .seed_row(
                    QuestionTracking {
                        id: Uuid::new_v4(),
                        conversation_id: self.conversation_id,
                        question_id,
                        job_id: self.job_id,
                        resume_id: Uuid::new_v4(),
                        tenant_id: self.tenant_id,
                        user_id: Uuid::new_v4(),
                        question: text.to_string(),
                        status,
                        is_satisfied: None,
                        created_at: Utc::now(),
                    },
                    sort_order,
                )
                .await;
        }
        question_id
    }

    async fn row_for(&self, question_text: &str) -> QuestionTracking {
        self.tracking
            .snapshot(self.conversation_id)
            .await
            .into_iter()
            .find(|row| row.question == question_text)
            .expect("tracking row not found")
    }
}

/// History where the AI asked `question`, followed by `drift` full
/// exchanges about other things, ending on a candidate message.
fn drifted_history(question: &str, drift: usize) -> Vec<Message> {
    let mut history = vec![Message::ai(question)];
    for idx in 0..drift {
        history.push(Message::candidate(format!("候选人岔开话题 {}", idx)));
        if idx + 1 < drift {
            history.push(Message::ai(format!("HR 回应 {}", idx)));
        }
    }
    history
}

#[tokio::test]
async fn greeting_with_empty_catalog_advances_to_intention() {
    let fixture = Fixture::new(ScriptedGateway::new());
    let ctx = fixture.context(
        ConversationStage::Greeting,
        "你好",
        vec![Message::candidate("你好")],
    );

    let result = fixture.group.execute(&ctx).await.unwrap();

    assert_eq!(result.action, NodeAction::None);
    assert!(result.reason.as_deref().unwrap().contains("no configured questions"));
    let updates = fixture.conversations.stage_updates().await;
    assert_eq!(
        updates,
        vec![(fixture.conversation_id, ConversationStage::Intention)]
    );
}

#[tokio::test]
async fn greeting_bootstrap_creates_rows_and_asks_the_first_question() {
    let fixture = Fixture::new(ScriptedGateway::new());
    // Inserted out of order on purpose: sort_order decides who goes first.
    fixture
        .add_question("第二题：期望薪资？", 2, QuestionType::Information, false, None, None)
        .await;
    fixture
        .add_question("第一题：几年经验？", 1, QuestionType::Information, false, None, None)
        .await;
    let ctx = fixture.context(
        ConversationStage::Greeting,
        "你好",
        vec![Message::candidate("你好")],
    );

    let result = fixture.group.execute(&ctx).await.unwrap();

    assert_eq!(result.action, NodeAction::SendMessage);
    assert_eq!(result.message.as_deref(), Some("第一题：几年经验？"));
    assert!(result.data_str("question_tracking_id").is_some());

    let rows = fixture.tracking.snapshot(fixture.conversation_id).await;
    assert_eq!(rows.len(), 2);
    assert_eq!(
        fixture.row_for("第一题：几年经验？").await.status,
        QuestionStatus::Ongoing
    );
    assert_eq!(
        fixture.row_for("第二题：期望薪资？").await.status,
        QuestionStatus::Pending
    );
    assert_eq!(
        fixture.conversations.stage_updates().await,
        vec![(fixture.conversation_id, ConversationStage::Questioning)]
    );
}

#[tokio::test]
async fn requirement_match_yes_completes_the_row_and_moves_on() {
    let gateway = ScriptedGateway::new()
        .script(
            scenes::RELEVANCE_REPLY_AND_QUESTION,
            LlmResponse::Json(json!({"result": "B"})),
        )
        .script(
            scenes::REPLY_MATCH_QUESTION_REQUIREMENT,
            LlmResponse::Json(json!({"result": "YES"})),
        );
    let fixture = Fixture::new(gateway);
    fixture
        .add_question(
            "您有几年Python经验？",
            1,
            QuestionType::Assessment,
            true,
            Some("3年以上Python"),
            Some(QuestionStatus::Ongoing),
        )
        .await;
    fixture
        .add_question(
            "期望薪资是多少？",
            2,
            QuestionType::Information,
            false,
            None,
            Some(QuestionStatus::Pending),
        )
        .await;

    let ctx = fixture.context(
        ConversationStage::Questioning,
        "我有五年Python经验",
        vec![
            Message::ai("您有几年Python经验？"),
            Message::candidate("我有五年Python经验"),
        ],
    );
    let result = fixture.group.execute(&ctx).await.unwrap();

    assert_eq!(result.action, NodeAction::SendMessage);
    assert_eq!(result.message.as_deref(), Some("期望薪资是多少？"));

    let graded = fixture.row_for("您有几年Python经验？").await;
    assert_eq!(graded.status, QuestionStatus::Completed);
    assert_eq!(graded.is_satisfied, Some(true));
    assert_eq!(
        fixture.row_for("期望薪资是多少？").await.status,
        QuestionStatus::Ongoing
    );
    assert_eq!(
        result.executed,
        vec![
            scenes::RELEVANCE_REPLY_AND_QUESTION,
            scenes::REPLY_MATCH_QUESTION_REQUIREMENT,
            scenes::INFORMATION_GATHERING_QUESTION,
        ]
    );
}

#[tokio::test]
async fn requirement_match_no_suspends_with_the_row_still_ongoing() {
    let gateway = ScriptedGateway::new()
        .script(
            scenes::RELEVANCE_REPLY_AND_QUESTION,
            LlmResponse::Json(json!({"result": "B"})),
        )
        .script(
            scenes::REPLY_MATCH_QUESTION_REQUIREMENT,
            LlmResponse::Json(json!({"result": "NO"})),
        );
    let fixture = Fixture::new(gateway);
    fixture
        .add_question(
            "您有几年Python经验？",
            1,
            QuestionType::Assessment,
            true,
            Some("3年以上Python"),
            Some(QuestionStatus::Ongoing),
        )
        .await;

    let ctx = fixture.context(
        ConversationStage::Questioning,
        "我不做Python",
        vec![
            Message::ai("您有几年Python经验？"),
            Message::candidate("我不做Python"),
        ],
    );
    let result = fixture.group.execute(&ctx).await.unwrap();

    assert_eq!(result.action, NodeAction::Suspend);
    assert_eq!(result.node_name, scenes::REPLY_MATCH_QUESTION_REQUIREMENT);

    // The grade is a human reviewer's call now; the row stays ongoing.
    let row = fixture.row_for("您有几年Python经验？").await;
    assert_eq!(row.status, QuestionStatus::Ongoing);
    assert_eq!(row.is_satisfied, None);
}

#[tokio::test]
async fn relevance_refusal_wins_over_the_speculative_grade() {
    let gateway = ScriptedGateway::new()
        .script(
            scenes::RELEVANCE_REPLY_AND_QUESTION,
            LlmResponse::Json(json!({"result": "A"})),
        )
        .script(
            scenes::REPLY_MATCH_QUESTION_REQUIREMENT,
            LlmResponse::Json(json!({"result": "YES"})),
        );
    let fixture = Fixture::new(gateway);
    fixture
        .add_question(
            "您有几年Python经验？",
            1,
            QuestionType::Assessment,
            true,
            Some("3年以上Python"),
            Some(QuestionStatus::Ongoing),
        )
        .await;

    let ctx = fixture.context(
        ConversationStage::Questioning,
        "不想回答",
        vec![
            Message::ai("您有几年Python经验？"),
            Message::candidate("不想回答"),
        ],
    );
    let result = fixture.group.execute(&ctx).await.unwrap();

    assert_eq!(result.action, NodeAction::Suspend);
    assert_eq!(result.node_name, scenes::RELEVANCE_REPLY_AND_QUESTION);
    // The requirement node's YES ran speculatively but was discarded, so no
    // bookkeeping happened.
    assert_eq!(
        fixture.row_for("您有几年Python经验？").await.status,
        QuestionStatus::Ongoing
    );
}

#[tokio::test]
async fn non_assessment_question_completes_on_willingness() {
    let gateway = ScriptedGateway::new().script(
        scenes::QUESTION_WILLINGNESS,
        LlmResponse::Json(json!({"result": "YES"})),
    );
    let fixture = Fixture::new(gateway);
    fixture
        .add_question(
            "方便说下现在的城市吗？",
            1,
            QuestionType::Information,
            false,
            None,
            Some(QuestionStatus::Ongoing),
        )
        .await;
    fixture
        .add_question(
            "期望薪资是多少？",
            2,
            QuestionType::Information,
            false,
            None,
            Some(QuestionStatus::Pending),
        )
        .await;

    let ctx = fixture.context(
        ConversationStage::Questioning,
        "在北京",
        vec![
            Message::ai("方便说下现在的城市吗？"),
            Message::candidate("在北京"),
        ],
    );
    let result = fixture.group.execute(&ctx).await.unwrap();

    assert_eq!(result.action, NodeAction::SendMessage);
    assert_eq!(result.message.as_deref(), Some("期望薪资是多少？"));
    let completed = fixture.row_for("方便说下现在的城市吗？").await;
    assert_eq!(completed.status, QuestionStatus::Completed);
    assert_eq!(completed.is_satisfied, None);
}

#[tokio::test]
async fn drifted_question_is_resent_verbatim_after_five_blocks() {
    // No LLM scenes scripted: the guard path must not call any.
    let fixture = Fixture::new(ScriptedGateway::new());
    let question = "您有几年Python经验？";
    fixture
        .add_question(
            question,
            1,
            QuestionType::Assessment,
            true,
            Some("3年以上Python"),
            Some(QuestionStatus::Ongoing),
        )
        .await;

    let ctx = fixture.context(
        ConversationStage::Questioning,
        "候选人岔开话题 4",
        drifted_history(question, 5),
    );
    let result = fixture.group.execute(&ctx).await.unwrap();

    assert_eq!(result.action, NodeAction::SendMessage);
    assert_eq!(result.message.as_deref(), Some(question));
    assert!(result.data_str("question_tracking_id").is_some());
    // The underlying tracking is untouched.
    assert_eq!(
        fixture.row_for(question).await.status,
        QuestionStatus::Ongoing
    );
}

#[tokio::test]
async fn drifted_question_yields_the_turn_between_three_and_four_blocks() {
    let fixture = Fixture::new(ScriptedGateway::new());
    let question = "您有几年Python经验？";
    fixture
        .add_question(
            question,
            1,
            QuestionType::Assessment,
            true,
            Some("3年以上Python"),
            Some(QuestionStatus::Ongoing),
        )
        .await;

    let ctx = fixture.context(
        ConversationStage::Questioning,
        "候选人岔开话题 2",
        drifted_history(question, 3),
    );
    let result = fixture.group.execute(&ctx).await.unwrap();

    assert_eq!(result.action, NodeAction::None);
    assert!(result.reason.as_deref().unwrap().contains("yielding"));
    assert_eq!(
        fixture.row_for(question).await.status,
        QuestionStatus::Ongoing
    );
}

#[tokio::test]
async fn questioning_with_no_ongoing_row_asks_the_first_pending_question() {
    let fixture = Fixture::new(ScriptedGateway::new());
    fixture
        .add_question(
            "第一题：几年经验？",
            1,
            QuestionType::Information,
            false,
            None,
            Some(QuestionStatus::Pending),
        )
        .await;

    let ctx = fixture.context(
        ConversationStage::Questioning,
        "好的",
        vec![Message::candidate("好的")],
    );
    let result = fixture.group.execute(&ctx).await.unwrap();

    assert_eq!(result.action, NodeAction::SendMessage);
    assert_eq!(result.message.as_deref(), Some("第一题：几年经验？"));
    assert_eq!(
        fixture.row_for("第一题：几年经验？").await.status,
        QuestionStatus::Ongoing
    );
}

#[tokio::test]
async fn exhausted_question_list_returns_none_and_advances_the_stage() {
    let fixture = Fixture::new(ScriptedGateway::new());
    let ctx = fixture.context(
        ConversationStage::Questioning,
        "好的",
        vec![Message::candidate("好的")],
    );

    let result = fixture.group.execute(&ctx).await.unwrap();

    assert_eq!(result.action, NodeAction::None);
    assert_eq!(
        fixture.conversations.stage_updates().await,
        vec![(fixture.conversation_id, ConversationStage::Intention)]
    );
}

#[tokio::test]
async fn other_stages_are_a_no_op() {
    let fixture = Fixture::new(ScriptedGateway::new());
    let ctx = fixture.context(
        ConversationStage::Intention,
        "还在考虑",
        vec![Message::candidate("还在考虑")],
    );

    let result = fixture.group.execute(&ctx).await.unwrap();

    assert_eq!(result.action, NodeAction::None);
    assert!(result.reason.as_deref().unwrap().contains("not a question stage"));
    assert!(fixture.conversations.stage_updates().await.is_empty());
}
