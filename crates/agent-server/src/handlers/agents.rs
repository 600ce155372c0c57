use std::time::Duration;

use actix_web::http::header;
use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};

use agent_core::{AgentError, AgentParams};
use message_bus::{FrontendPatch, MessageStatus, Patch};
use research_tree::ResearchTree;

use crate::project::ProjectError;
use crate::sse;
use crate::state::AppState;

/// Grace delay between the broadcast `finished` patch and reading the
/// agent's recorded task result.
const TERMINAL_GRACE: Duration = Duration::from_millis(100);

fn default_title() -> String {
    "用户消息".to_string()
}

fn default_agent_name() -> String {
    crate::project::AUTO_RESEARCH_AGENT.to_string()
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_agent_name")]
    pub agent_name: String,
    #[serde(default)]
    pub other_params: Option<AgentParams>,
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct MessageHistoryResponse {
    pub messages: Vec<message_bus::FrontendMessage>,
    pub incomplete_message_id: Option<String>,
}

fn sse_response(
    stream: impl futures_util::Stream<Item = Result<actix_web::web::Bytes, actix_web::Error>>
        + 'static,
) -> HttpResponse {
    HttpResponse::Ok()
        .append_header((header::CONTENT_TYPE, "text/event-stream"))
        .append_header((header::CACHE_CONTROL, "no-cache"))
        .append_header((header::CONNECTION, "keep-alive"))
        .streaming(stream)
}

/// POST /agents/messages — submit a user message and stream every patch of
/// the resulting agent run, terminated by one `finished` or `error` event.
pub async fn send_message(
    state: web::Data<AppState>,
    request: web::Json<SendMessageRequest>,
) -> impl Responder {
    let request = request.into_inner();
    let Some(agent) = state.project.agent(&request.agent_name) else {
        return HttpResponse::BadRequest().json(serde_json::json!({
            "detail": format!("未找到智能体: {}", request.agent_name)
        }));
    };
    let agent = agent.clone();

    if agent.is_processing().await {
        return HttpResponse::TooManyRequests().json(serde_json::json!({
            "detail": "智能体正在处理中，请等待完成"
        }));
    }

    log::info!(
        "[{}] user message received ({} chars)",
        request.agent_name,
        request.content.len()
    );

    // Subscribe before submitting so the opening user patch is included.
    let mut rx = state.project.bus().subscribe().await;
    let params = request.other_params.unwrap_or_default();
    if let Err(error) = agent
        .process_user_message(&request.content, &request.title, params)
        .await
    {
        return match error {
            AgentError::Busy => HttpResponse::TooManyRequests().json(serde_json::json!({
                "detail": "智能体正在处理中，请等待完成"
            })),
            other => HttpResponse::InternalServerError().json(serde_json::json!({
                "detail": other.to_string()
            })),
        };
    }

    sse_response(async_stream::stream! {
        while let Some(patch) = rx.next().await {
            if patch.patch.is_terminal() {
                tokio::time::sleep(TERMINAL_GRACE).await;
                match agent.last_task_result().await {
                    Some(result) if result.is_error() => {
                        yield Ok(sse::json_event("error", &serde_json::json!({
                            "error": result.error,
                            "error_type": result.error_type,
                        })));
                    }
                    result => {
                        yield Ok(sse::json_event("finished", &result));
                    }
                }
                break;
            }
            yield Ok::<_, actix_web::Error>(sse::json_event("patch", &patch));
        }
    })
}

/// GET /agents/messages/continue/{message_id} — resume an in-flight
/// assistant message without loss: one synthesized catch-up patch, then the
/// live tail.
pub async fn continue_message(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let message_id = path.into_inner();
    let Some((message, mut rx)) = state
        .project
        .bus()
        .subscribe_with_message(&message_id)
        .await
    else {
        return HttpResponse::NotFound().json(serde_json::json!({
            "detail": "消息不存在"
        }));
    };
    log::info!("continuing message {message_id} ({:?})", message.status);

    if message.status == MessageStatus::Completed {
        let full = catch_up_patch(&message_id, &message, true);
        let snapshot = snapshot_view(state.project.tree(), &message.snapshot_id).await;
        let frontend = FrontendPatch::new(full, snapshot);
        return sse_response(async_stream::stream! {
            yield Ok::<_, actix_web::Error>(sse::json_event("patch", &frontend));
        });
    }

    let catch_up = FrontendPatch::new(catch_up_patch(&message_id, &message, false), None);
    sse_response(async_stream::stream! {
        yield Ok::<_, actix_web::Error>(sse::json_event("patch", &catch_up));
        while let Some(patch) = rx.next().await {
            if patch.patch.message_id.as_deref() != Some(message_id.as_str()) {
                continue;
            }
            let finished = patch.patch.finished;
            yield Ok(sse::json_event("patch", &patch));
            if finished {
                break;
            }
        }
    })
}

/// The accumulated state of a message replayed as a single patch.
fn catch_up_patch(message_id: &str, message: &message_bus::Message, finished: bool) -> Patch {
    Patch {
        message_id: Some(message_id.to_string()),
        thinking_delta: message.thinking.clone(),
        content_delta: message.content.clone(),
        title: Some(message.title.clone()),
        action_title: Some(message.action_title.clone()),
        action_params: Some(message.action_params.clone()),
        snapshot_id: Some(message.snapshot_id.clone()),
        finished,
        ..Default::default()
    }
}

async fn snapshot_view(
    tree: &ResearchTree,
    snapshot_id: &str,
) -> Option<message_bus::SnapshotView> {
    if snapshot_id.is_empty() {
        return None;
    }
    use message_bus::SnapshotProvider;
    tree.snapshot_view(snapshot_id).await
}

/// POST /agents/messages/stop — cancel every processing agent.
pub async fn stop_generation(state: web::Data<AppState>) -> impl Responder {
    let stopped = state.project.stop_all_agents().await;
    if stopped.is_empty() {
        HttpResponse::Ok().json(StopResponse {
            status: "info".to_string(),
            message: "当前没有正在进行的生成任务".to_string(),
        })
    } else {
        log::info!("stopped agents: {stopped:?}");
        state.project.bus().log_message_history().await;
        HttpResponse::Ok().json(StopResponse {
            status: "success".to_string(),
            message: format!("已停止智能体: {}", stopped.join(", ")),
        })
    }
}

/// POST /agents/messages/rollback-to/{message_id} — user-initiated history
/// rollback with snapshot restore.
pub async fn rollback_to_message(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let message_id = path.into_inner();
    match state.project.rollback_to_message(&message_id).await {
        Ok(outcome) => HttpResponse::Ok().json(outcome),
        Err(ProjectError::Bus(message_bus::BusError::MessageNotFound(_))) => {
            HttpResponse::NotFound().json(serde_json::json!({
                "detail": format!("消息不存在: {message_id}")
            }))
        }
        Err(error) => HttpResponse::InternalServerError().json(serde_json::json!({
            "detail": format!("回退操作失败: {error}")
        })),
    }
}

/// GET /agents/messages/history — projected message history.
pub async fn message_history(state: web::Data<AppState>) -> impl Responder {
    let bus = state.project.bus();
    HttpResponse::Ok().json(MessageHistoryResponse {
        messages: bus.history().await,
        incomplete_message_id: bus.incomplete_message_id().await,
    })
}

/// GET /agents/status — per-agent processing state and statistics.
pub async fn agent_status(state: web::Data<AppState>) -> impl Responder {
    let mut agents = serde_json::Map::new();
    for (name, agent) in state.project.agents() {
        agents.insert(
            name.clone(),
            serde_json::json!({
                "is_processing": agent.is_processing().await,
                "last_task_result": agent.last_task_result().await,
                "retry_stats": agent.runtime().retry_stats().await,
            }),
        );
    }
    HttpResponse::Ok().json(serde_json::json!({
        "message_count": state.project.bus().message_count().await,
        "is_generating": state.project.bus().incomplete_message_id().await.is_some(),
        "agents": agents,
    }))
}
