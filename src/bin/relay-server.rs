//! `relay-server` entry point.
//!
//! Serves the built-in commands until Ctrl+C, then drains connections.
//! Configuration comes from `RELAY_*` environment variables.

use std::process::ExitCode;
use std::sync::Arc;

use relay_core::auth::InMemoryRealm;
use relay_core::config;
use relay_core::runs::RunRegistry;
use relay_core::server::{DrainResult, Server};
use relay_core::telemetry::{init_logging, LogConfig, LogFormat};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = init_logging(&LogConfig::from_env("info", LogFormat::Json)) {
        eprintln!("Logging setup failed: {}", e);
    }

    let config = config::load_server();

    let realm = InMemoryRealm::new();
    for user in &config.users {
        realm.add_user(&user.name, &user.password);
    }
    if realm.is_empty() {
        warn!("no users configured; only anonymous access is possible");
    }

    let server = match Server::start(config, Arc::new(realm), Arc::new(RunRegistry::new())).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "server failed to start");
            return ExitCode::FAILURE;
        }
    };
    info!(url = %server.url(), "ready");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "could not wait for shutdown signal");
    }
    info!("shutdown signal received, draining");

    match server.shutdown().await {
        DrainResult::Complete => ExitCode::SUCCESS,
        DrainResult::Timeout { remaining } => {
            warn!(remaining, "connections were closed before finishing");
            ExitCode::SUCCESS
        }
    }
}
