use actix_web::{web, HttpResponse, Responder};

use message_bus::PatchSink;
use research_tree::{
    ActionResult, ProblemRequest, SetSelectedSolutionRequest, SolutionRequest, TreeError,
};

use crate::state::AppState;

/// KeyError-style failures map to 404, violated invariants to 400.
fn error_response(error: TreeError) -> HttpResponse {
    let body = serde_json::json!({ "detail": error.to_string() });
    match error {
        TreeError::NodeNotFound(_) | TreeError::SnapshotNotFound(_) => {
            HttpResponse::NotFound().json(body)
        }
        TreeError::InvalidCommand(_) => HttpResponse::BadRequest().json(body),
    }
}

fn command_response(result: Result<ActionResult, TreeError>) -> HttpResponse {
    match result {
        Ok(action) => HttpResponse::Ok().json(action),
        Err(error) => error_response(error),
    }
}

pub async fn current_snapshot_id(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "current_snapshot_id": state.project.tree().current_snapshot_id().await
    }))
}

pub async fn get_snapshot(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let snapshot_id = path.into_inner();
    match state.project.tree().snapshot(&snapshot_id).await {
        Some(snapshot) => HttpResponse::Ok().json(snapshot),
        None => error_response(TreeError::SnapshotNotFound(snapshot_id)),
    }
}

pub async fn create_root_problem(
    state: web::Data<AppState>,
    body: web::Json<ProblemRequest>,
) -> impl Responder {
    let sink: &dyn PatchSink = state.project.bus().as_ref();
    command_response(
        state
            .project
            .tree()
            .add_root_problem(&body, Some(sink))
            .await,
    )
}

pub async fn update_root_problem(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<ProblemRequest>,
) -> impl Responder {
    let sink: &dyn PatchSink = state.project.bus().as_ref();
    command_response(
        state
            .project
            .tree()
            .update_root_problem(&path.into_inner(), &body, Some(sink))
            .await,
    )
}

pub async fn delete_root_problem(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let sink: &dyn PatchSink = state.project.bus().as_ref();
    command_response(
        state
            .project
            .tree()
            .delete_root_problem(&path.into_inner(), Some(sink))
            .await,
    )
}

pub async fn create_solution(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<SolutionRequest>,
) -> impl Responder {
    let sink: &dyn PatchSink = state.project.bus().as_ref();
    command_response(
        state
            .project
            .tree()
            .create_solution(&path.into_inner(), &body, Some(sink))
            .await,
    )
}

pub async fn update_solution(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<SolutionRequest>,
) -> impl Responder {
    let sink: &dyn PatchSink = state.project.bus().as_ref();
    command_response(
        state
            .project
            .tree()
            .update_solution(&path.into_inner(), &body, Some(sink))
            .await,
    )
}

pub async fn delete_solution(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let sink: &dyn PatchSink = state.project.bus().as_ref();
    command_response(
        state
            .project
            .tree()
            .delete_solution(&path.into_inner(), Some(sink))
            .await,
    )
}

pub async fn set_selected_solution(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<SetSelectedSolutionRequest>,
) -> impl Responder {
    let sink: &dyn PatchSink = state.project.bus().as_ref();
    command_response(
        state
            .project
            .tree()
            .set_selected_solution(&path.into_inner(), body.solution_id.as_deref(), Some(sink))
            .await,
    )
}
