//! Handler-level tests over the full route table.

use std::sync::Arc;

use actix_web::{test, web, App};
use async_trait::async_trait;

use agent_llm::{LlmClient, LlmError};
use agent_server::server::configure_app;
use agent_server::{AppState, ProjectManager};
use message_bus::{Patch, PatchSink, Role};

/// The HTTP tests never reach the model; any attempt is a hard failure.
struct NullLlm;

#[async_trait]
impl LlmClient for NullLlm {
    async fn stream_generate(
        &self,
        _prompt: &str,
        _message_id: &str,
        _publish_content: bool,
        _sink: &dyn PatchSink,
    ) -> Result<String, LlmError> {
        Err(LlmError::Api("no model in tests".to_string()))
    }
}

fn build_project(dir: &tempfile::TempDir) -> Arc<ProjectManager> {
    Arc::new(ProjectManager::new(dir.path(), Arc::new(NullLlm)))
}

macro_rules! app {
    ($project:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::new($project.clone())))
                .configure(configure_app),
        )
        .await
    };
}

#[actix_web::test]
async fn healthz_reports_ok() {
    let dir = tempfile::tempdir().unwrap();
    let project = build_project(&dir);
    let app = app!(project);

    let response = test::call_service(&app, test::TestRequest::get().uri("/healthz").to_request())
        .await;
    assert!(response.status().is_success());
    let body: serde_json::Value = test::read_body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[actix_web::test]
async fn create_root_problem_commits_and_logs_an_action_message() {
    let dir = tempfile::tempdir().unwrap();
    let project = build_project(&dir);
    let app = app!(project);

    let initial = project.tree().current_snapshot_id().await;
    let response = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/research-tree/problems/root")
            .set_json(serde_json::json!({
                "title": "T1",
                "significance": "",
                "criteria": "",
            }))
            .to_request(),
    )
    .await;
    assert!(response.status().is_success());

    let body: serde_json::Value = test::read_body_json(response).await;
    assert_eq!(body["success"], true);
    let snapshot_id = body["snapshot_id"].as_str().unwrap();
    assert_ne!(snapshot_id, initial);
    assert_eq!(body["data"]["roots"].as_array().unwrap().len(), 1);
    assert!(body["data"]["roots"][0]["id"].as_str().is_some());

    // The command also left a user-role action message in history.
    let history = project.bus().history().await;
    assert_eq!(history.len(), 1);
    let message = &history[0].message;
    assert_eq!(message.role, Role::User);
    assert_eq!(message.title, "操作成功: add_root_problem");
    assert_eq!(message.action_title, "add_root_problem");
    assert_eq!(message.snapshot_id, snapshot_id);
    assert!(history[0].snapshot.is_some());
}

#[actix_web::test]
async fn create_solution_with_sub_problems_selects_itself() {
    let dir = tempfile::tempdir().unwrap();
    let project = build_project(&dir);
    let app = app!(project);

    let root: serde_json::Value = test::read_body_json(
        test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/research-tree/problems/root")
                .set_json(serde_json::json!({"title": "R", "significance": "", "criteria": ""}))
                .to_request(),
        )
        .await,
    )
    .await;
    let root_id = root["data"]["roots"][0]["id"].as_str().unwrap().to_string();

    let response: serde_json::Value = test::read_body_json(
        test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&format!("/research-tree/problems/{root_id}/solutions"))
                .set_json(serde_json::json!({
                    "title": "S1",
                    "children": [{
                        "title": "Q1",
                        "significance": "",
                        "criteria": "",
                        "problem_type": "implementation",
                    }],
                }))
                .to_request(),
        )
        .await,
    )
    .await;

    assert_eq!(response["success"], true);
    let root_node = &response["data"]["roots"][0];
    let solution = &root_node["children"][0];
    assert_eq!(root_node["selected_solution_id"], solution["id"]);
    assert_eq!(solution["children"][0]["title"], "Q1");
    assert!(solution["children"][0]["id"].as_str().is_some());
}

#[actix_web::test]
async fn solution_request_with_known_id_inherits_the_original_node() {
    let dir = tempfile::tempdir().unwrap();
    let project = build_project(&dir);
    let app = app!(project);

    let root: serde_json::Value = test::read_body_json(
        test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/research-tree/problems/root")
                .set_json(serde_json::json!({"title": "R", "significance": "", "criteria": ""}))
                .to_request(),
        )
        .await,
    )
    .await;
    let root_id = root["data"]["roots"][0]["id"].as_str().unwrap().to_string();

    let first: serde_json::Value = test::read_body_json(
        test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&format!("/research-tree/problems/{root_id}/solutions"))
                .set_json(serde_json::json!({
                    "title": "S1",
                    "children": [{"title": "Q1", "significance": "", "criteria": ""}],
                }))
                .to_request(),
        )
        .await,
    )
    .await;
    let q1_id = first["data"]["roots"][0]["children"][0]["children"][0]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let second: serde_json::Value = test::read_body_json(
        test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&format!("/research-tree/problems/{root_id}/solutions"))
                .set_json(serde_json::json!({
                    "title": "S2",
                    "children": [{
                        "id": q1_id,
                        "title": "ignored",
                        "significance": "",
                        "criteria": "",
                    }],
                }))
                .to_request(),
        )
        .await,
    )
    .await;

    let s2 = &second["data"]["roots"][0]["children"][1];
    assert_eq!(s2["title"], "S2");
    assert_eq!(s2["children"][0]["id"], q1_id.as_str());
    assert_eq!(s2["children"][0]["title"], "Q1");
}

#[actix_web::test]
async fn logical_failures_map_to_http_status_codes() {
    let dir = tempfile::tempdir().unwrap();
    let project = build_project(&dir);
    let app = app!(project);

    // Unknown node: 404.
    let response = test::call_service(
        &app,
        test::TestRequest::delete()
            .uri("/research-tree/problems/root/does-not-exist")
            .to_request(),
    )
    .await;
    assert_eq!(response.status(), 404);

    // Violated invariant: 400.
    let root: serde_json::Value = test::read_body_json(
        test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/research-tree/problems/root")
                .set_json(serde_json::json!({"title": "R", "significance": "", "criteria": ""}))
                .to_request(),
        )
        .await,
    )
    .await;
    let root_id = root["data"]["roots"][0]["id"].as_str().unwrap();
    let response = test::call_service(
        &app,
        test::TestRequest::patch()
            .uri(&format!("/research-tree/problems/root/{root_id}"))
            .set_json(serde_json::json!({
                "title": "R",
                "significance": "",
                "criteria": "",
                "problem_type": "conditional",
            }))
            .to_request(),
    )
    .await;
    assert_eq!(response.status(), 400);

    // Unrelated selected solution: 400.
    let response = test::call_service(
        &app,
        test::TestRequest::post()
            .uri(&format!("/research-tree/problems/{root_id}/selected-solution"))
            .set_json(serde_json::json!({"solution_id": "nope"}))
            .to_request(),
    )
    .await;
    assert_eq!(response.status(), 400);
}

#[actix_web::test]
async fn rollback_endpoint_truncates_history_and_restores_the_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let project = build_project(&dir);
    let app = app!(project);

    for title in ["T1", "T2", "T3"] {
        test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/research-tree/problems/root")
                .set_json(serde_json::json!({"title": title, "significance": "", "criteria": ""}))
                .to_request(),
        )
        .await;
    }
    let history = project.bus().history().await;
    assert_eq!(history.len(), 3);
    let first_message = history[0].message.clone();

    let response: serde_json::Value = test::read_body_json(
        test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&format!(
                    "/agents/messages/rollback-to/{}",
                    first_message.id
                ))
                .to_request(),
        )
        .await,
    )
    .await;

    assert_eq!(response["success"], true);
    assert_eq!(response["deleted_count"], 2);
    assert_eq!(
        response["target_snapshot_id"].as_str().unwrap(),
        first_message.snapshot_id
    );

    // History and tree both rolled back to the first commit.
    assert_eq!(project.bus().history().await.len(), 1);
    assert_eq!(
        project.tree().current_snapshot_id().await,
        first_message.snapshot_id
    );
    let snapshot = project.tree().current_snapshot().await;
    assert_eq!(snapshot.roots.len(), 1);
    assert_eq!(snapshot.roots[0].title(), "T1");
}

#[actix_web::test]
async fn rollback_to_unknown_message_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let project = build_project(&dir);
    let app = app!(project);

    let response = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/agents/messages/rollback-to/missing")
            .to_request(),
    )
    .await;
    assert_eq!(response.status(), 404);
}

#[actix_web::test]
async fn continue_endpoint_replays_a_completed_message() {
    let dir = tempfile::tempdir().unwrap();
    let project = build_project(&dir);

    let message_id = project
        .bus()
        .publish_patch(Patch {
            role: Some(Role::Assistant),
            title: Some("回答".to_string()),
            content_delta: "完整内容".to_string(),
            thinking_delta: "完整思考".to_string(),
            finished: true,
            ..Default::default()
        })
        .await
        .unwrap();

    let app = app!(project);
    let response = test::call_service(
        &app,
        test::TestRequest::get()
            .uri(&format!("/agents/messages/continue/{message_id}"))
            .to_request(),
    )
    .await;
    assert!(response.status().is_success());
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );

    let body = test::read_body(response).await;
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.starts_with("event: patch\n"));
    let data = text
        .lines()
        .find_map(|line| line.strip_prefix("data: "))
        .unwrap();
    let patch: serde_json::Value = serde_json::from_str(data).unwrap();
    assert_eq!(patch["message_id"], message_id.as_str());
    assert_eq!(patch["content_delta"], "完整内容");
    assert_eq!(patch["thinking_delta"], "完整思考");
    assert_eq!(patch["finished"], true);
}

#[actix_web::test]
async fn continue_endpoint_404s_for_unknown_messages() {
    let dir = tempfile::tempdir().unwrap();
    let project = build_project(&dir);
    let app = app!(project);

    let response = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/agents/messages/continue/missing")
            .to_request(),
    )
    .await;
    assert_eq!(response.status(), 404);
}

#[actix_web::test]
async fn send_message_to_unknown_agent_is_400() {
    let dir = tempfile::tempdir().unwrap();
    let project = build_project(&dir);
    let app = app!(project);

    let response = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/agents/messages")
            .set_json(serde_json::json!({
                "content": "你好",
                "agent_name": "no_such_agent",
            }))
            .to_request(),
    )
    .await;
    assert_eq!(response.status(), 400);
}

#[actix_web::test]
async fn stop_without_running_agents_reports_info() {
    let dir = tempfile::tempdir().unwrap();
    let project = build_project(&dir);
    let app = app!(project);

    let response: serde_json::Value = test::read_body_json(
        test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/agents/messages/stop")
                .to_request(),
        )
        .await,
    )
    .await;
    assert_eq!(response["status"], "info");
}

#[actix_web::test]
async fn project_save_and_load_round_trips_the_stores() {
    let dir = tempfile::tempdir().unwrap();
    let project = build_project(&dir);
    let app = app!(project);

    project.create_new_project("实验工程").await.unwrap();
    test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/research-tree/problems/root")
            .set_json(serde_json::json!({"title": "T1", "significance": "", "criteria": ""}))
            .to_request(),
    )
    .await;
    let snapshot_id = project.tree().current_snapshot_id().await;

    let saved: serde_json::Value = test::read_body_json(
        test::call_service(
            &app,
            test::TestRequest::post().uri("/projects/save").to_request(),
        )
        .await,
    )
    .await;
    assert_eq!(saved["success"], true);

    // Wipe in-memory state, then load it back.
    project.create_new_project("其他").await.unwrap();
    assert_eq!(project.bus().message_count().await, 0);

    let loaded = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/projects/%E5%AE%9E%E9%AA%8C%E5%B7%A5%E7%A8%8B")
            .to_request(),
    )
    .await;
    assert!(loaded.status().is_success());
    assert_eq!(project.bus().message_count().await, 1);
    assert_eq!(project.tree().current_snapshot_id().await, snapshot_id);
    let snapshot = project.tree().current_snapshot().await;
    assert_eq!(snapshot.roots[0].title(), "T1");
}

#[actix_web::test]
async fn save_as_suffixes_name_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    let project = build_project(&dir);

    project.create_new_project("p").await.unwrap();
    let first = project.save_project_as("副本").await.unwrap();
    let second = project.save_project_as("副本").await.unwrap();
    assert_eq!(first, "副本");
    assert_eq!(second, "副本(1)");

    let listed = project.list_projects().await.unwrap();
    let names: Vec<_> = listed.iter().map(|p| p.project_name.as_str()).collect();
    assert!(names.contains(&"副本"));
    assert!(names.contains(&"副本(1)"));
}
