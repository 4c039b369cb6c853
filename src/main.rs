//! `relay-cli` entry point.
//!
//! Connects to a relay server, runs one command remotely and exits with
//! the command's exit code. See `relay-cli --help`.

use std::process::ExitCode;

use relay_core::cli;
use relay_core::telemetry::{init_logging, LogConfig, LogFormat};

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so they never mix with command output.
    if let Err(e) = init_logging(&LogConfig::from_env("warn", LogFormat::Compact)) {
        eprintln!("Logging setup failed: {}", e);
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let code = cli::run(args).await;
    ExitCode::from(code as u8)
}
