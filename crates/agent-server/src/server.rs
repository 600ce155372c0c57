use std::io;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};

use crate::handlers;
use crate::project::ProjectManager;
use crate::state::AppState;

/// Register every route group on an actix `App`. Shared with the handler
/// tests.
pub fn configure_app(config: &mut web::ServiceConfig) {
    config
        .service(
            web::scope("/agents")
                .route("/messages", web::post().to(handlers::agents::send_message))
                .route(
                    "/messages/history",
                    web::get().to(handlers::agents::message_history),
                )
                .route(
                    "/messages/continue/{message_id}",
                    web::get().to(handlers::agents::continue_message),
                )
                .route(
                    "/messages/stop",
                    web::post().to(handlers::agents::stop_generation),
                )
                .route(
                    "/messages/rollback-to/{message_id}",
                    web::post().to(handlers::agents::rollback_to_message),
                )
                .route("/status", web::get().to(handlers::agents::agent_status)),
        )
        .service(
            web::scope("/research-tree")
                .route(
                    "/snapshots/current-id",
                    web::get().to(handlers::research_tree::current_snapshot_id),
                )
                .route(
                    "/snapshots/{snapshot_id}",
                    web::get().to(handlers::research_tree::get_snapshot),
                )
                .route(
                    "/problems/root",
                    web::post().to(handlers::research_tree::create_root_problem),
                )
                .route(
                    "/problems/root/{problem_id}",
                    web::patch().to(handlers::research_tree::update_root_problem),
                )
                .route(
                    "/problems/root/{problem_id}",
                    web::delete().to(handlers::research_tree::delete_root_problem),
                )
                .route(
                    "/problems/{problem_id}/solutions",
                    web::post().to(handlers::research_tree::create_solution),
                )
                .route(
                    "/problems/{problem_id}/selected-solution",
                    web::post().to(handlers::research_tree::set_selected_solution),
                )
                .route(
                    "/solutions/{solution_id}",
                    web::patch().to(handlers::research_tree::update_solution),
                )
                .route(
                    "/solutions/{solution_id}",
                    web::delete().to(handlers::research_tree::delete_solution),
                ),
        )
        .service(
            web::scope("/projects")
                .route("", web::post().to(handlers::projects::create_project))
                .route("", web::get().to(handlers::projects::list_projects))
                .route("/save", web::post().to(handlers::projects::save_current_project))
                .route("/save-as", web::post().to(handlers::projects::save_project_as))
                .route(
                    "/current/info",
                    web::get().to(handlers::projects::current_project_info),
                )
                .route(
                    "/current/full-data",
                    web::get().to(handlers::projects::current_full_data),
                )
                .route(
                    "/{project_name}",
                    web::get().to(handlers::projects::load_project),
                )
                .route(
                    "/{project_name}",
                    web::delete().to(handlers::projects::delete_project),
                ),
        )
        .route("/healthz", web::get().to(handlers::health::handler));
}

pub async fn run_server(port: u16, project: Arc<ProjectManager>) -> io::Result<()> {
    let state = web::Data::new(AppState::new(project));
    log::info!("serving on 0.0.0.0:{port}");

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Cors::permissive())
            .configure(configure_app)
    })
    .bind(format!("0.0.0.0:{port}"))?
    .run()
    .await
}
