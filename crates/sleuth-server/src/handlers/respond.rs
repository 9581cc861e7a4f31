use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

use super::sse_response;
use crate::error::{ApiError, Result};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ReplyRequest {
    pub request_id: String,
    pub reply: String,
}

#[derive(Debug, Deserialize)]
pub struct SkipRequest {
    pub request_id: String,
}

#[derive(Debug, Serialize)]
pub struct PendingQuestionResponse {
    pub request_id: String,
    pub question: String,
    pub context: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Resume a suspended analysis with the user's reply. Each request id can
/// be answered once.
pub async fn reply(state: web::Data<AppState>, body: web::Json<ReplyRequest>) -> Result<HttpResponse> {
    let ReplyRequest { request_id, reply } = body.into_inner();
    if reply.trim().is_empty() {
        return Err(ApiError::BadRequest("reply must not be empty".to_string()));
    }

    let suspended = state.orchestrator.take_suspended(&request_id)?;
    log::info!("[{}] reply received, resuming", request_id);

    let orchestrator = state.orchestrator.clone();
    let run_id = request_id.clone();
    let rx = state.multiplexer.start(request_id, move |sink| async move {
        orchestrator.resume(&run_id, suspended, &reply, sink).await
    });
    Ok(sse_response(rx))
}

/// Finish a suspended analysis without answering its question.
pub async fn skip(state: web::Data<AppState>, body: web::Json<SkipRequest>) -> Result<HttpResponse> {
    let SkipRequest { request_id } = body.into_inner();
    let suspended = state.orchestrator.take_suspended(&request_id)?;
    log::info!("[{}] question skipped", request_id);

    let orchestrator = state.orchestrator.clone();
    let run_id = request_id.clone();
    let rx = state.multiplexer.start(request_id, move |sink| async move {
        orchestrator.skip(&run_id, suspended, sink).await
    });
    Ok(sse_response(rx))
}

pub async fn pending(state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse> {
    let request_id = path.into_inner();
    let not_found = || ApiError::NotFound(format!("Session not found or expired: {request_id}"));

    let session = state.sessions.get(&request_id).ok_or_else(not_found)?;
    let pending = session.state.pending_question.ok_or_else(not_found)?;

    Ok(HttpResponse::Ok().json(PendingQuestionResponse {
        request_id: session.id,
        question: pending.question,
        context: pending.context,
        created_at: session.created_at,
    }))
}
