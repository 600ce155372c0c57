use actix_web::{HttpResponse, Responder};

pub async fn handler() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "research-copilot-backend",
    }))
}
