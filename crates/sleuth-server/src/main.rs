use clap::Parser;
use std::io;

use sleuth_server::logging::init_logging;
use sleuth_server::{run_server, ServerConfig};

#[actix_web::main]
async fn main() -> io::Result<()> {
    let config = ServerConfig::parse();
    init_logging(config.debug, config.log_level.as_deref());

    log::info!("Starting sleuth server on port {}", config.port);
    log::info!("LLM Configuration:");
    log::info!("  Base URL: {}", config.llm_base_url);
    log::info!("  Model: {}", config.model);
    log::info!("Tools:");
    log::info!("  Code repository: {:?}", config.code_repo_path);
    log::info!("  Log directory: {:?}", config.log_dir);
    log::info!("  Database: {:?}", config.database_path);

    if config.debug {
        log::debug!("Debug mode enabled");
        log::debug!("  Max iterations: {}", config.max_iterations);
        log::debug!("  Max execution time: {}s", config.max_execution_time);
        log::debug!("  Session TTL: {}s", config.session_ttl_secs);
        log::debug!("  Heartbeat: {}s", config.heartbeat_secs);
    }

    run_server(config).await
}
