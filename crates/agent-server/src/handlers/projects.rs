use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;

use crate::project::ProjectError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ProjectNameQuery {
    pub project_name: String,
}

#[derive(Debug, Deserialize)]
pub struct SaveAsQuery {
    pub new_project_name: String,
}

fn error_response(error: ProjectError) -> HttpResponse {
    let body = serde_json::json!({ "detail": error.to_string() });
    match error {
        ProjectError::NotFound(_) => HttpResponse::NotFound().json(body),
        ProjectError::NoCurrentProject => HttpResponse::BadRequest().json(body),
        _ => HttpResponse::InternalServerError().json(body),
    }
}

pub async fn create_project(
    state: web::Data<AppState>,
    query: web::Query<ProjectNameQuery>,
) -> impl Responder {
    match state.project.create_new_project(&query.project_name).await {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "message": format!("新工程创建成功: {}", query.project_name),
            "project_name": query.project_name,
        })),
        Err(error) => error_response(error),
    }
}

pub async fn save_current_project(state: web::Data<AppState>) -> impl Responder {
    match state.project.save_current_project().await {
        Ok(name) => HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "message": format!("工程保存成功: {name}"),
            "project_name": name,
        })),
        Err(error) => error_response(error),
    }
}

pub async fn save_project_as(
    state: web::Data<AppState>,
    query: web::Query<SaveAsQuery>,
) -> impl Responder {
    match state.project.save_project_as(&query.new_project_name).await {
        Ok(name) => HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "message": format!("工程另存为成功: {name}"),
            "project_name": name,
        })),
        Err(error) => error_response(error),
    }
}

pub async fn list_projects(state: web::Data<AppState>) -> impl Responder {
    match state.project.list_projects().await {
        Ok(projects) => HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "message": format!("获取工程列表成功，共 {} 个工程", projects.len()),
            "projects": projects,
        })),
        Err(error) => error_response(error),
    }
}

pub async fn load_project(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let name = path.into_inner();
    match state.project.load_project(&name).await {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "message": format!("工程加载成功: {name}"),
            "project_name": name,
        })),
        Err(error) => error_response(error),
    }
}

pub async fn delete_project(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let name = path.into_inner();
    match state.project.delete_project(&name).await {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "message": format!("工程删除成功: {name}"),
        })),
        Err(error) => error_response(error),
    }
}

pub async fn current_project_info(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.project.current_info().await)
}

pub async fn current_full_data(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.project.full_data().await)
}
