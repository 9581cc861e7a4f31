use std::time::Instant;

use actix_web::{web, HttpResponse};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use sleuth_core::{cache_key, AgentEvent, AnalysisResult};
use sleuth_loop::AnalysisRequest;

use super::sse_response;
use crate::error::{ApiError, Result};
use crate::state::AppState;

#[derive(Debug, Default, Serialize)]
pub struct AnalyzeResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub execution_time: f64,
}

fn validate(request: &AnalysisRequest) -> Result<()> {
    if request.input.trim().is_empty() {
        return Err(ApiError::BadRequest("input must not be empty".to_string()));
    }
    Ok(())
}

fn start_analysis(state: &AppState, request: AnalysisRequest) -> mpsc::Receiver<AgentEvent> {
    let run_id = Uuid::new_v4().to_string();
    let key = cache_key(&request.input, &request.context_files);
    let orchestrator = state.orchestrator.clone();
    state.multiplexer.start_cached(run_id.clone(), key, move |sink| async move {
        orchestrator.run(&run_id, request, sink).await
    })
}

/// Fold a finished event stream into a single response.
pub(crate) async fn summarize(mut rx: mpsc::Receiver<AgentEvent>) -> AnalyzeResponse {
    let mut response = AnalyzeResponse::default();
    while let Some(event) = rx.recv().await {
        match event {
            AgentEvent::Result { result } => {
                response.status = "completed";
                response.result = Some(result);
            }
            AgentEvent::UserInputRequest {
                request_id,
                question,
                context,
            } => {
                response.status = "waiting_for_input";
                response.request_id = Some(request_id);
                response.question = Some(question);
                response.context = Some(context);
            }
            AgentEvent::Error { error } => {
                response.status = "error";
                response.error = Some(error);
            }
            _ => {}
        }
    }
    if response.status.is_empty() {
        response.status = "error";
        response.error = Some("Analysis ended without a result".to_string());
    }
    response
}

pub async fn stream(state: web::Data<AppState>, request: web::Json<AnalysisRequest>) -> Result<HttpResponse> {
    let request = request.into_inner();
    validate(&request)?;
    Ok(sse_response(start_analysis(&state, request)))
}

pub async fn sync(state: web::Data<AppState>, request: web::Json<AnalysisRequest>) -> Result<HttpResponse> {
    let request = request.into_inner();
    validate(&request)?;

    let started = Instant::now();
    if let Some(result) = state.cache.get(&cache_key(&request.input, &request.context_files)) {
        log::info!("returning cached result");
        return Ok(HttpResponse::Ok().json(AnalyzeResponse {
            status: "completed",
            result: Some(result),
            execution_time: started.elapsed().as_secs_f64(),
            ..AnalyzeResponse::default()
        }));
    }

    let mut response = summarize(start_analysis(&state, request)).await;
    response.execution_time = started.elapsed().as_secs_f64();
    log::info!(
        "analysis finished with status {} in {:.1}s",
        response.status,
        response.execution_time
    );
    Ok(HttpResponse::Ok().json(response))
}
