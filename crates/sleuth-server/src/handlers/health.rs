use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde_json::json;

use crate::state::AppState;

pub async fn handler() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

pub async fn info(state: web::Data<AppState>) -> HttpResponse {
    let config = state.orchestrator.config();
    let settings = state.multiplexer.settings();
    let runs: Vec<_> = state
        .tasks
        .snapshot()
        .into_iter()
        .map(|(label, started_at)| json!({ "id": label, "started_at": started_at }))
        .collect();

    HttpResponse::Ok().json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "model": state.orchestrator.model_name(),
        "max_iterations": config.max_iterations,
        "max_execution_time": settings.run_timeout.as_secs(),
        "tools": state.orchestrator.tools().describe().into_iter().map(|(kind, _)| kind.name()).collect::<Vec<_>>(),
        "pending_sessions": state.sessions.len(),
        "active_runs": runs,
        "uptime_secs": (Utc::now() - state.started_at).num_seconds(),
    }))
}

pub async fn tools(state: web::Data<AppState>) -> HttpResponse {
    let tools: Vec<_> = state
        .orchestrator
        .tools()
        .describe()
        .into_iter()
        .map(|(kind, description)| json!({ "name": kind.name(), "description": description }))
        .collect();
    HttpResponse::Ok().json(json!({ "tools": tools }))
}
