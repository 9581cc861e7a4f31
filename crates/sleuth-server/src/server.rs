use std::io;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use sleuth_core::TaskRegistry;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::handlers;
use crate::state::AppState;

pub fn app_config(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(handlers::health::handler))
        .service(
            web::scope("/api/v1")
                .route("/analyze", web::post().to(handlers::analyze::sync))
                .route("/analyze/stream", web::post().to(handlers::analyze::stream))
                .route("/analyze/reply", web::post().to(handlers::respond::reply))
                .route("/analyze/skip", web::post().to(handlers::respond::skip))
                .route(
                    "/analyze/pending/{request_id}",
                    web::get().to(handlers::respond::pending),
                )
                .route("/cache/stats", web::get().to(handlers::cache::stats))
                .route("/cache/clear", web::post().to(handlers::cache::clear))
                .route("/info", web::get().to(handlers::health::info))
                .route("/tools", web::get().to(handlers::health::tools)),
        );
}

pub async fn run_server(config: ServerConfig) -> io::Result<()> {
    let state = AppState::from_config(&config);
    run_server_with_state(state, config.port, config.shutdown_grace()).await
}

/// Serve until SIGINT/SIGTERM, then cancel in-flight analyses and stop.
pub async fn run_server_with_state(state: AppState, port: u16, grace: Duration) -> io::Result<()> {
    let tasks = state.tasks.clone();
    let sessions = state.sessions.clone();
    let data = web::Data::new(state);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .wrap(Cors::permissive())
            .configure(app_config)
    })
    .bind(("0.0.0.0", port))?
    .disable_signals()
    .run();
    log::info!("Listening on 0.0.0.0:{}", port);

    let sweeper_stop = CancellationToken::new();
    let sweeper = sessions.spawn_sweeper(sweeper_stop.clone());

    let handle = server.handle();
    let shutdown = tokio::spawn(async move {
        shutdown_signal().await;
        log::info!("Shutdown signal received");
        cancel_runs(&tasks, grace).await;
        handle.stop(true).await;
    });

    let result = server.await;
    shutdown.abort();
    sweeper_stop.cancel();
    if let Err(error) = sweeper.await {
        log::warn!("session sweeper ended abnormally: {}", error);
    }
    log::info!("Server stopped");
    result
}

async fn cancel_runs(tasks: &TaskRegistry, grace: Duration) {
    let remaining = tasks.cancel_all(grace).await;
    if remaining > 0 {
        log::warn!(
            "{} analyses still running after {}ms; their pending calls may finish in the background",
            remaining,
            grace.as_millis()
        );
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            log::error!("failed to listen for ctrl-c: {}", error);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                log::error!("failed to listen for SIGTERM: {}", error);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
