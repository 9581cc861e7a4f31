use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::state::AppState;

pub async fn stats(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.cache.stats())
}

pub async fn clear(state: web::Data<AppState>) -> HttpResponse {
    let removed = state.cache.clear();
    HttpResponse::Ok().json(json!({ "status": "cleared", "removed": removed }))
}
