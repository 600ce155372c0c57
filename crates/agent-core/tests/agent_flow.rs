//! End-to-end agent flows against a scripted LLM.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use agent_core::{AgentHandle, AgentParams, AgentRuntime, AutoResearchAgent, UserChatAgent};
use agent_llm::{LlmClient, LlmError};
use agent_retry::{RetryEngine, RetryPolicy};
use message_bus::{MessageBus, Patch, PatchSink, Role, SnapshotProvider};
use research_tree::{NodeKind, ProblemRequest, ProblemType, ResearchTree, SolutionRequest};

/// One scripted turn of the fake LLM.
enum Step {
    /// Return this completion (streamed as one content chunk).
    Reply(String),
    /// Fail with a retryable network error.
    NetworkError,
    /// Never resolve; used to test cancellation.
    Hang,
}

struct ScriptedLlm {
    steps: Mutex<VecDeque<Step>>,
}

impl ScriptedLlm {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
        })
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn stream_generate(
        &self,
        _prompt: &str,
        message_id: &str,
        publish_content: bool,
        sink: &dyn PatchSink,
    ) -> Result<String, LlmError> {
        let step = self
            .steps
            .lock()
            .await
            .pop_front()
            .unwrap_or(Step::NetworkError);
        match step {
            Step::Reply(content) => {
                if publish_content {
                    let _ = sink
                        .publish(Patch {
                            message_id: Some(message_id.to_string()),
                            content_delta: content.clone(),
                            ..Default::default()
                        })
                        .await;
                }
                let _ = sink
                    .publish(Patch {
                        message_id: Some(message_id.to_string()),
                        finished: true,
                        ..Default::default()
                    })
                    .await;
                Ok(content)
            }
            Step::NetworkError => Err(LlmError::Network("connection reset".to_string())),
            Step::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

struct World {
    bus: Arc<MessageBus>,
    tree: Arc<ResearchTree>,
}

fn build_world(steps: Vec<Step>) -> (World, Arc<AgentRuntime>) {
    let tree = Arc::new(ResearchTree::new());
    let provider: Arc<dyn SnapshotProvider> = tree.clone();
    let bus = Arc::new(MessageBus::with_snapshot_provider(provider));
    let llm = ScriptedLlm::new(steps);
    let retry = RetryEngine::new(RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
    });
    let runtime = Arc::new(AgentRuntime::new(
        "test_agent",
        bus.clone(),
        tree.clone(),
        llm,
        retry,
    ));
    (World { bus, tree }, runtime)
}

fn create_solution_xml(name: &str, sub_problems: &str) -> String {
    format!(
        "思考过程...\n<response>\n<name>{name}</name>\n\
<top_level_thoughts>顶层思考</top_level_thoughts>\n\
<research_plan>{sub_problems}</research_plan>\n\
<implementation_plan>实施方案</implementation_plan>\n\
<plan_justification>方案论证</plan_justification>\n</response>"
    )
}

async fn wait_for_terminal(rx: &mut message_bus::PatchReceiver) {
    loop {
        let patch = tokio::time::timeout(Duration::from_secs(5), rx.next())
            .await
            .expect("timed out waiting for the terminal patch")
            .expect("bus closed before the terminal patch");
        if patch.patch.action_title.as_deref() == Some("finished") {
            return;
        }
    }
}

async fn seed_root(tree: &ResearchTree) -> String {
    let result = tree
        .add_root_problem(
            &ProblemRequest::new("根问题", "意义", "标准", ProblemType::Implementation),
            None,
        )
        .await
        .unwrap();
    result.data["roots"][0]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn auto_research_expands_breadth_first() {
    let (world, runtime) = build_world(vec![
        Step::Reply(create_solution_xml(
            "根方案",
            "<sub_problem type=\"implementation\"><name>Q1</name>\
<significance>s</significance><criteria>c</criteria></sub_problem>\
<sub_problem type=\"conditional\"><name>条件?</name>\
<significance>s</significance><criteria>c</criteria></sub_problem>",
        )),
        // Q1 is implementation-typed, so the BFS reaches it next.
        Step::Reply(create_solution_xml("Q1方案", "")),
    ]);
    let root_id = seed_root(&world.tree).await;

    let handle = AgentHandle::new(
        "auto_research_agent",
        runtime.clone(),
        Arc::new(AutoResearchAgent::new(runtime.clone())),
    );
    let mut rx = world.bus.subscribe().await;
    handle
        .process_user_message(
            "开始研究",
            "用户消息",
            AgentParams {
                problem_id: Some(root_id.clone()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    wait_for_terminal(&mut rx).await;

    let result = handle.last_task_result().await.unwrap();
    assert_eq!(result.status, "success");

    // Both solutions were committed; the conditional child was not expanded.
    assert!(world
        .tree
        .node_id_by_title("根方案", Some(NodeKind::Solution))
        .await
        .is_some());
    assert!(world
        .tree
        .node_id_by_title("Q1方案", Some(NodeKind::Solution))
        .await
        .is_some());

    let root_selected = world.tree.selected_solution_id(&root_id).await.unwrap();
    assert!(root_selected.is_some());
}

#[tokio::test]
async fn llm_failures_roll_back_and_retry_until_success() {
    let final_xml = create_solution_xml("最终方案", "");
    let (world, runtime) = build_world(vec![
        Step::NetworkError,
        Step::NetworkError,
        Step::Reply(final_xml),
    ]);
    let root_id = seed_root(&world.tree).await;

    let mut rx = world.bus.subscribe().await;
    let handle = AgentHandle::new(
        "auto_research_agent",
        runtime.clone(),
        Arc::new(AutoResearchAgent::new(runtime.clone())),
    );
    handle
        .process_user_message(
            "开始研究",
            "用户消息",
            AgentParams {
                problem_id: Some(root_id.clone()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let mut rollbacks = 0;
    let mut retry_notices = 0;
    loop {
        let patch = tokio::time::timeout(Duration::from_secs(5), rx.next())
            .await
            .expect("timed out")
            .expect("bus closed");
        if patch.patch.rollback {
            rollbacks += 1;
        }
        if patch
            .patch
            .title
            .as_deref()
            .map(|t| t.starts_with("重试通知"))
            .unwrap_or(false)
        {
            retry_notices += 1;
        }
        if patch.patch.action_title.as_deref() == Some("finished") {
            break;
        }
    }

    assert_eq!(rollbacks, 2);
    assert_eq!(retry_notices, 2);
    assert_eq!(handle.last_task_result().await.unwrap().status, "success");

    // The rolled-back message ended with the validated rendering, not the
    // partial attempts.
    let history = world.bus.history().await;
    let llm_message = history
        .iter()
        .map(|m| &m.message)
        .find(|m| m.title == "创建解决方案")
        .expect("LLM message in history");
    assert!(llm_message.content.starts_with("【解决方案名称】: 最终方案"));
    assert!(llm_message.thinking.is_empty());
}

#[tokio::test]
async fn exhausted_retries_surface_as_task_error() {
    let (world, runtime) = build_world(vec![
        Step::NetworkError,
        Step::NetworkError,
        Step::NetworkError,
        Step::NetworkError,
    ]);
    let root_id = seed_root(&world.tree).await;

    let handle = AgentHandle::new(
        "auto_research_agent",
        runtime.clone(),
        Arc::new(AutoResearchAgent::new(runtime.clone())),
    );
    let mut rx = world.bus.subscribe().await;
    handle
        .process_user_message(
            "开始研究",
            "用户消息",
            AgentParams {
                problem_id: Some(root_id),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    wait_for_terminal(&mut rx).await;

    let result = handle.last_task_result().await.unwrap();
    assert!(result.is_error());
    assert_eq!(result.error_type.as_deref(), Some("LlmError"));
}

#[tokio::test]
async fn invalid_model_output_is_retried_through_the_pipeline() {
    let (world, runtime) = build_world(vec![
        Step::Reply("这不是XML".to_string()),
        Step::Reply(create_solution_xml("修正方案", "")),
    ]);
    let root_id = seed_root(&world.tree).await;

    let handle = AgentHandle::new(
        "auto_research_agent",
        runtime.clone(),
        Arc::new(AutoResearchAgent::new(runtime.clone())),
    );
    let mut rx = world.bus.subscribe().await;
    handle
        .process_user_message(
            "开始研究",
            "用户消息",
            AgentParams {
                problem_id: Some(root_id),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    wait_for_terminal(&mut rx).await;

    assert_eq!(handle.last_task_result().await.unwrap().status, "success");
    assert!(world
        .tree
        .node_id_by_title("修正方案", Some(NodeKind::Solution))
        .await
        .is_some());
}

fn decision_accept_xml(plan: &str) -> String {
    format!(
        "<response><decision type=\"accept\">\
<reasoning>用户要求明确</reasoning>\
<modification_plan>{plan}</modification_plan>\
</decision></response>"
    )
}

fn modify_solution_xml(name: &str, plan_entries: &str) -> String {
    format!(
        "<response><name>{name}</name>\
<top_level_thoughts>新的思考</top_level_thoughts>\
<research_plan>{plan_entries}</research_plan>\
<implementation_plan>新的实施</implementation_plan>\
<plan_justification>新的论证</plan_justification></response>"
    )
}

/// Seed a root problem with one solution S1 owning one sub-problem Q1.
async fn seed_solution_with_child(tree: &ResearchTree) -> (String, String, String) {
    let root_id = seed_root(tree).await;
    tree.create_solution(
        &root_id,
        &SolutionRequest {
            title: "S1".to_string(),
            top_level_thoughts: Some("旧思考".to_string()),
            implementation_plan: Some("旧实施".to_string()),
            plan_justification: Some("旧论证".to_string()),
            children: Some(vec![ProblemRequest::new(
                "Q1",
                "意义",
                "标准",
                ProblemType::Implementation,
            )]),
            ..Default::default()
        },
        None,
    )
    .await
    .unwrap();
    let solution_id = tree
        .node_id_by_title("S1", Some(NodeKind::Solution))
        .await
        .unwrap();
    let q1_id = tree
        .node_id_by_title("Q1", Some(NodeKind::Problem))
        .await
        .unwrap();
    (root_id, solution_id, q1_id)
}

#[tokio::test]
async fn chat_agent_accept_then_full_inherit_updates_in_place() {
    let (world, runtime) = build_world(vec![
        Step::Reply(decision_accept_xml("按用户要求修改实施方案")),
        Step::Reply(modify_solution_xml(
            "S1改",
            "<sub_problem type=\"inherit\"><name>Q1</name></sub_problem>",
        )),
    ]);
    let (_, solution_id, q1_id) = seed_solution_with_child(&world.tree).await;

    let handle = AgentHandle::new(
        "user_chat_agent",
        runtime.clone(),
        Arc::new(UserChatAgent::new(runtime.clone())),
    );
    let mut rx = world.bus.subscribe().await;
    handle
        .process_user_message(
            "请修改：实施方案太粗略了",
            "用户消息",
            AgentParams {
                solution_id: Some(solution_id.clone()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    wait_for_terminal(&mut rx).await;

    assert_eq!(handle.last_task_result().await.unwrap().status, "success");

    // Same-length all-inherit positional match: update, not create.
    let history = world.bus.history().await;
    assert!(history
        .iter()
        .any(|m| m.message.action_title == "update_solution"));
    assert!(!history
        .iter()
        .any(|m| m.message.action_title == "create_solution"));

    // The solution kept its id, took the new fields, and kept Q1 untouched.
    let updated = world.tree.solution_detail(&solution_id).await.unwrap();
    assert!(updated.contains("S1改"));
    assert!(updated.contains("新的实施"));
    let children = world
        .tree
        .solution_children_requests(&solution_id)
        .await
        .unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id.as_deref(), Some(q1_id.as_str()));
}

#[tokio::test]
async fn chat_agent_changed_plan_creates_a_new_solution_with_inherited_ids() {
    let (world, runtime) = build_world(vec![
        Step::Reply(decision_accept_xml("拆分问题")),
        Step::Reply(modify_solution_xml(
            "S2",
            "<sub_problem type=\"inherit\"><name>Q1</name></sub_problem>\
<sub_problem type=\"implementation\"><name>Q2</name>\
<significance>s</significance><criteria>c</criteria></sub_problem>",
        )),
    ]);
    let (root_id, solution_id, q1_id) = seed_solution_with_child(&world.tree).await;

    let handle = AgentHandle::new(
        "user_chat_agent",
        runtime.clone(),
        Arc::new(UserChatAgent::new(runtime.clone())),
    );
    let mut rx = world.bus.subscribe().await;
    handle
        .process_user_message(
            "请修改：增加一个子问题",
            "用户消息",
            AgentParams {
                solution_id: Some(solution_id),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    wait_for_terminal(&mut rx).await;

    let new_solution_id = world
        .tree
        .node_id_by_title("S2", Some(NodeKind::Solution))
        .await
        .expect("new solution committed");
    let children = world
        .tree
        .solution_children_requests(&new_solution_id)
        .await
        .unwrap();
    assert_eq!(children.len(), 2);
    // Q1 was inherited by id; Q2 is fresh.
    assert_eq!(children[0].id.as_deref(), Some(q1_id.as_str()));
    assert_eq!(children[1].title, "Q2");
    assert_ne!(children[1].id.as_deref(), Some(q1_id.as_str()));

    // The new solution became the problem's selected solution.
    let selected = world.tree.selected_solution_id(&root_id).await.unwrap();
    assert_eq!(selected.as_deref(), Some(new_solution_id.as_str()));
}

#[tokio::test]
async fn chat_agent_reply_decision_does_not_touch_the_tree() {
    let (world, runtime) = build_world(vec![Step::Reply(
        "<response><decision type=\"reply\">\
<reasoning>需要更明确的要求</reasoning>\
<response_to_user>请补充具体的修改点</response_to_user>\
</decision></response>"
            .to_string(),
    )]);
    let (_, solution_id, _) = seed_solution_with_child(&world.tree).await;
    let snapshot_before = world.tree.current_snapshot_id().await;

    let handle = AgentHandle::new(
        "user_chat_agent",
        runtime.clone(),
        Arc::new(UserChatAgent::new(runtime.clone())),
    );
    let mut rx = world.bus.subscribe().await;
    handle
        .process_user_message(
            "这个方案是不是太复杂了？",
            "用户消息",
            AgentParams {
                solution_id: Some(solution_id),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    wait_for_terminal(&mut rx).await;

    assert_eq!(world.tree.current_snapshot_id().await, snapshot_before);
    let history = world.bus.history().await;
    let reply = history
        .iter()
        .map(|m| &m.message)
        .find(|m| m.title == "处理修改请求")
        .unwrap();
    assert!(reply.content.contains("【对用户的回复】"));
}

#[tokio::test]
async fn cancellation_publishes_interrupt_and_terminal_patches() {
    let (world, runtime) = build_world(vec![Step::Hang]);
    let root_id = seed_root(&world.tree).await;

    let mut rx = world.bus.subscribe().await;
    let handle = AgentHandle::new(
        "auto_research_agent",
        runtime.clone(),
        Arc::new(AutoResearchAgent::new(runtime.clone())),
    );
    handle
        .process_user_message(
            "开始研究",
            "用户消息",
            AgentParams {
                problem_id: Some(root_id),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Give the task time to reach the hanging LLM call.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(handle.is_processing().await);
    assert!(handle.stop_processing().await);
    assert!(!handle.is_processing().await);

    // A cancelled run records success.
    assert_eq!(handle.last_task_result().await.unwrap().status, "success");

    let mut saw_interrupt = false;
    let mut saw_terminal = false;
    while let Some(patch) = rx.try_next() {
        if patch.patch.content_delta.contains("【用户中断】") {
            saw_interrupt = true;
        }
        if patch.patch.action_title.as_deref() == Some("finished") {
            saw_terminal = true;
        }
    }
    assert!(saw_interrupt);
    assert!(saw_terminal);

    // The interrupted LLM message was closed by the broadcast patch.
    assert!(world.bus.incomplete_message_id().await.is_none());
}

#[tokio::test]
async fn busy_agent_refuses_a_second_message() {
    let (world, runtime) = build_world(vec![Step::Hang]);
    let root_id = seed_root(&world.tree).await;

    let handle = AgentHandle::new(
        "auto_research_agent",
        runtime.clone(),
        Arc::new(AutoResearchAgent::new(runtime.clone())),
    );
    handle
        .process_user_message(
            "开始研究",
            "用户消息",
            AgentParams {
                problem_id: Some(root_id.clone()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let err = handle
        .process_user_message(
            "再来一次",
            "用户消息",
            AgentParams {
                problem_id: Some(root_id),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, agent_core::AgentError::Busy));

    handle.stop_processing().await;
}
