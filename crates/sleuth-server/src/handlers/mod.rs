pub mod analyze;
pub mod cache;
pub mod health;
pub mod respond;

use actix_web::http::header;
use actix_web::{web, HttpResponse};
use sleuth_core::AgentEvent;
use tokio::sync::mpsc;

/// Stream multiplexer output as a `text/event-stream` body.
pub(crate) fn sse_response(mut rx: mpsc::Receiver<AgentEvent>) -> HttpResponse {
    HttpResponse::Ok()
        .append_header((header::CONTENT_TYPE, "text/event-stream"))
        .append_header((header::CACHE_CONTROL, "no-cache"))
        .append_header(("X-Accel-Buffering", "no"))
        .streaming(async_stream::stream! {
            while let Some(event) = rx.recv().await {
                yield Ok::<_, actix_web::Error>(web::Bytes::from(event.to_sse()));
            }
        })
}
