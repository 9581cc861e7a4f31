pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod multiplexer;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use multiplexer::{StreamMultiplexer, StreamSettings};
pub use server::{app_config, run_server, run_server_with_state};
pub use state::AppState;
