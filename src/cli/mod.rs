//! `relay-cli` argument handling and the client run.
//!
//! ## Usage
//!
//! ```bash
//! relay-cli -s https://ci.example/ who-am-i
//! relay-cli -s https://ci.example/ -u alice --password-file ~/.relay-pw login
//! relay-cli -s https://ci.example/ logout
//! ```

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::warn;

use crate::channel::CredentialArgs;
use crate::client::{CliClient, ClientError, ClientOptions, TerminalPrompt};
use crate::config;
use crate::credentials::CredentialStore;

/// Bad command line.
pub const EXIT_USAGE: i32 = 2;
/// Could not reach the server, or the connection failed mid-command.
pub const EXIT_TRANSPORT: i32 = 3;
/// Server speaks another protocol version.
pub const EXIT_VERSION_MISMATCH: i32 = 4;

/// Command run when none is given.
pub const DEFAULT_COMMAND: &str = "help";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CliArgs {
    pub url: Option<String>,
    pub credentials: CredentialArgs,
    /// Command name followed by its arguments.
    pub command: Vec<String>,
    pub show_usage: bool,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum UsageError {
    #[error("option {0} requires a value")]
    MissingValue(String),

    #[error("unknown option {0}")]
    UnknownOption(String),

    #[error("no server URL: pass -s URL or set RELAY_URL")]
    NoUrl,
}

/// Parse everything after the program name.
///
/// Options come first; the first non-option word starts the command.
pub fn parse_args<I>(args: I) -> Result<CliArgs, UsageError>
where
    I: IntoIterator<Item = String>,
{
    let mut parsed = CliArgs::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let mut value = |name: &str| {
            args.next()
                .ok_or_else(|| UsageError::MissingValue(name.to_string()))
        };
        match arg.as_str() {
            "-s" => parsed.url = Some(value("-s")?),
            "-u" => parsed.credentials.username = Some(value("-u")?),
            "-p" => parsed.credentials.password = Some(value("-p")?),
            "--password-file" => parsed.credentials.password_file = Some(value("--password-file")?),
            "-h" | "--help" => parsed.show_usage = true,
            "--" => {
                parsed.command.extend(args.by_ref());
                break;
            }
            opt if opt.starts_with('-') && opt.len() > 1 => {
                return Err(UsageError::UnknownOption(opt.to_string()))
            }
            _ => {
                parsed.command.push(arg);
                parsed.command.extend(args.by_ref());
                break;
            }
        }
    }

    if parsed.command.is_empty() {
        parsed.command.push(DEFAULT_COMMAND.to_string());
    }
    Ok(parsed)
}

pub fn usage() -> &'static str {
    r#"relay-cli - run commands on a relay server

USAGE:
    relay-cli [OPTIONS] [COMMAND [ARGS...]]

OPTIONS:
    -s URL                 Server URL (default: $RELAY_URL)
    -u USER                Authenticate as USER
    -p PASSWORD            Password for USER
    --password-file PATH   Read the password for USER from PATH
    -h, --help             Show this help

COMMAND defaults to 'help', which lists the commands the server offers.

EXIT CODES:
    The remote command's exit code, or
    2  usage error
    3  transport failure
    4  protocol version mismatch

ENVIRONMENT:
    RELAY_URL                Default server URL
    RELAY_CLI_COOKIE         Build-scope token, set by the server for runs
    RELAY_CREDENTIALS_FILE   Session token file
    RELAY_LOG                Log filter (default: warn)
    RELAY_LOG_FILE           Append logs to this file instead of stderr
"#
}

/// Exit code for a client failure.
pub fn exit_code_for(error: &ClientError) -> i32 {
    match error {
        ClientError::VersionMismatch { .. } => EXIT_VERSION_MISMATCH,
        _ => EXIT_TRANSPORT,
    }
}

/// Parse `args`, run the command, print its output, return the exit code.
pub async fn run(args: Vec<String>) -> i32 {
    let parsed = match parse_args(args) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("{}\n", e);
            eprint!("{}", usage());
            return EXIT_USAGE;
        }
    };
    if parsed.show_usage {
        print!("{}", usage());
        return 0;
    }

    let env = config::load_client();
    let Some(url) = parsed.url.or(env.url) else {
        eprintln!("{}", UsageError::NoUrl);
        return EXIT_USAGE;
    };

    let options = ClientOptions {
        url,
        credentials: parsed.credentials,
        store: open_store(env.credentials_file),
        build_token: env.build_token,
        prompt: Arc::new(TerminalPrompt),
        channel: env.channel,
    };
    run_command(options, parsed.command).await
}

/// Connect with `options` and run `command`.
pub async fn run_command(options: ClientOptions, command: Vec<String>) -> i32 {
    let client = match CliClient::connect(options).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("{}", e);
            return exit_code_for(&e);
        }
    };

    let result = client.execute(command).await;
    client.close().await;

    match result {
        Ok(outcome) => {
            print!("{}", outcome.stdout);
            eprint!("{}", outcome.stderr);
            let _ = std::io::stdout().flush();
            outcome.exit_code
        }
        Err(e) => {
            eprintln!("{}", e);
            exit_code_for(&e)
        }
    }
}

fn open_store(path: Option<PathBuf>) -> Option<Arc<Mutex<CredentialStore>>> {
    let path = match path {
        Some(path) => path,
        None => match CredentialStore::default_path() {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "no credential store");
                return None;
            }
        },
    };
    match CredentialStore::open(&path) {
        Ok(store) => Some(Arc::new(Mutex::new(store))),
        Err(e) => {
            warn!(error = %e, "credential store unavailable");
            None
        }
    }
}
