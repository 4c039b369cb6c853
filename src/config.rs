//! Runtime configuration loading from environment variables.
//!
//! All configuration values are loaded from `RELAY_*` environment variables
//! with sensible defaults. Invalid values fall back to defaults without crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `RELAY_SECRET_KEY` | random per start | Token signing key (server) |
//! | `RELAY_ROOT_URL` | `http://127.0.0.1:8080/` | Server root URL (server) |
//! | `RELAY_HTTP_ADDR` | `127.0.0.1:8080` | HTTP bind address (server) |
//! | `RELAY_CLI_PORT` | 0 | Direct TCP port, 0 = ephemeral, -1 = disabled (server) |
//! | `RELAY_SESSION_TTL` | 86400 | Session token lifetime (secs) |
//! | `RELAY_USERS` | empty | `name:password` pairs, comma separated (server) |
//! | `RELAY_MAX_CONNECTIONS` | 64 | Max concurrent channels (server) |
//! | `RELAY_SHUTDOWN_TIMEOUT` | 10 | Drain timeout on shutdown (secs) |
//! | `RELAY_HEARTBEAT_INTERVAL` | 30 | Tunnel keep-alive interval (secs) |
//! | `RELAY_FRAME_LIMIT` | 16777216 | Max frame size (bytes) |
//! | `RELAY_URL` | none | Server URL (client) |
//! | `RELAY_CLI_COOKIE` | none | Ambient build-scope token (client) |
//! | `RELAY_CREDENTIALS_FILE` | `<config_dir>/relay/credentials.json` | Token file (client) |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::channel::ChannelConfig;
use crate::token::{SecretKey, BUILD_TOKEN_ENV};

const DEFAULT_ROOT_URL: &str = "http://127.0.0.1:8080/";
const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_SESSION_TTL_SECS: u64 = 24 * 60 * 60;
const MAX_SESSION_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Account seeded into the in-memory realm at startup.
#[derive(Clone)]
pub struct UserSeed {
    pub name: String,
    pub password: String,
}

impl std::fmt::Debug for UserSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserSeed")
            .field("name", &self.name)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Server configuration loaded from env.
#[derive(Debug, Clone)]
pub struct ServerEnvConfig {
    pub secret_key: SecretKey,
    pub root_url: String,
    pub http_addr: SocketAddr,
    /// `None` disables the direct TCP listener.
    pub cli_port: Option<u16>,
    pub session_ttl: Duration,
    pub users: Vec<UserSeed>,
    pub max_connections: usize,
    pub shutdown_timeout: Duration,
    pub channel: ChannelConfig,
}

/// Client configuration loaded from env.
#[derive(Debug, Clone, Default)]
pub struct ClientEnvConfig {
    pub url: Option<String>,
    pub build_token: Option<String>,
    pub credentials_file: Option<PathBuf>,
    pub channel: ChannelConfig,
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Non-empty string env var.
fn parse_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Load channel configuration from environment.
fn load_channel_config() -> ChannelConfig {
    const DEFAULT_FRAME: usize = 16 * 1024 * 1024; // 16 MiB
    const MIN_FRAME: usize = 4096; // floor: 4 KiB
    let max_frame_size = parse_usize("RELAY_FRAME_LIMIT", DEFAULT_FRAME).max(MIN_FRAME);
    let heartbeat_secs = parse_u64("RELAY_HEARTBEAT_INTERVAL", 30).max(1);
    ChannelConfig {
        max_frame_size,
        heartbeat_interval: Duration::from_secs(heartbeat_secs),
    }
}

/// `RELAY_CLI_PORT`: negative disables, invalid falls back to ephemeral.
fn load_cli_port() -> Option<u16> {
    match std::env::var("RELAY_CLI_PORT") {
        Ok(val) => match val.trim().parse::<i32>() {
            Ok(port) if port < 0 => None,
            Ok(port) => Some(u16::try_from(port).unwrap_or(0)),
            Err(_) => Some(0),
        },
        Err(_) => Some(0),
    }
}

fn load_http_addr() -> SocketAddr {
    let fallback = SocketAddr::from(([127, 0, 0, 1], 8080));
    parse_string("RELAY_HTTP_ADDR")
        .unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string())
        .parse()
        .unwrap_or(fallback)
}

/// Parse `name:password[,name:password...]`. Malformed entries are skipped.
fn parse_users(raw: &str) -> Vec<UserSeed> {
    raw.split(',')
        .filter_map(|entry| {
            let (name, password) = entry.trim().split_once(':')?;
            if name.is_empty() {
                return None;
            }
            Some(UserSeed {
                name: name.to_string(),
                password: password.to_string(),
            })
        })
        .collect()
}

/// Load server configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load_server() -> ServerEnvConfig {
    let secret_key = match parse_string("RELAY_SECRET_KEY") {
        Some(key) => SecretKey::new(key),
        None => {
            tracing::warn!("RELAY_SECRET_KEY not set; tokens will not survive a restart");
            SecretKey::generate()
        }
    };
    let session_secs =
        parse_u64("RELAY_SESSION_TTL", DEFAULT_SESSION_TTL_SECS).clamp(1, MAX_SESSION_TTL_SECS);

    ServerEnvConfig {
        secret_key,
        root_url: parse_string("RELAY_ROOT_URL").unwrap_or_else(|| DEFAULT_ROOT_URL.to_string()),
        http_addr: load_http_addr(),
        cli_port: load_cli_port(),
        session_ttl: Duration::from_secs(session_secs),
        users: parse_string("RELAY_USERS")
            .map(|raw| parse_users(&raw))
            .unwrap_or_default(),
        max_connections: parse_usize("RELAY_MAX_CONNECTIONS", 64).max(1),
        shutdown_timeout: Duration::from_secs(parse_u64("RELAY_SHUTDOWN_TIMEOUT", 10).max(1)),
        channel: load_channel_config(),
    }
}

/// Load client configuration from environment variables.
///
/// The build-scope token is read here, once, at client start.
pub fn load_client() -> ClientEnvConfig {
    ClientEnvConfig {
        url: parse_string("RELAY_URL"),
        build_token: parse_string(BUILD_TOKEN_ENV),
        credentials_file: parse_string("RELAY_CREDENTIALS_FILE").map(PathBuf::from),
        channel: load_channel_config(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serialize env-mutating tests to avoid cross-test pollution.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "RELAY_SECRET_KEY",
        "RELAY_ROOT_URL",
        "RELAY_HTTP_ADDR",
        "RELAY_CLI_PORT",
        "RELAY_SESSION_TTL",
        "RELAY_USERS",
        "RELAY_MAX_CONNECTIONS",
        "RELAY_SHUTDOWN_TIMEOUT",
        "RELAY_HEARTBEAT_INTERVAL",
        "RELAY_FRAME_LIMIT",
        "RELAY_URL",
        "RELAY_CLI_COOKIE",
        "RELAY_CREDENTIALS_FILE",
    ];

    fn clear_env_vars() {
        for k in ENV_KEYS {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn test_server_defaults_are_sensible() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let cfg = load_server();
        assert_eq!(cfg.root_url, "http://127.0.0.1:8080/");
        assert_eq!(cfg.http_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(cfg.cli_port, Some(0));
        assert_eq!(cfg.session_ttl.as_secs(), 86_400);
        assert!(cfg.users.is_empty());
        assert_eq!(cfg.max_connections, 64);
        assert_eq!(cfg.shutdown_timeout.as_secs(), 10);
        assert_eq!(cfg.channel.max_frame_size, 16 * 1024 * 1024);
        assert_eq!(cfg.channel.heartbeat_interval.as_secs(), 30);
    }

    #[test]
    fn test_client_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let cfg = load_client();
        assert!(cfg.url.is_none());
        assert!(cfg.build_token.is_none());
        assert!(cfg.credentials_file.is_none());
    }

    #[test]
    fn test_env_vars_override_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("RELAY_ROOT_URL", "https://ci.example/");
        std::env::set_var("RELAY_HTTP_ADDR", "0.0.0.0:9090");
        std::env::set_var("RELAY_CLI_PORT", "50000");
        std::env::set_var("RELAY_SESSION_TTL", "60");
        std::env::set_var("RELAY_USERS", "alice:secret, bob:pw:with:colons");
        let cfg = load_server();
        assert_eq!(cfg.root_url, "https://ci.example/");
        assert_eq!(cfg.http_addr.port(), 9090);
        assert_eq!(cfg.cli_port, Some(50000));
        assert_eq!(cfg.session_ttl.as_secs(), 60);
        assert_eq!(cfg.users.len(), 2);
        assert_eq!(cfg.users[1].name, "bob");
        assert_eq!(cfg.users[1].password, "pw:with:colons");
        clear_env_vars();
    }

    #[test]
    fn test_session_ttl_capped_at_a_year() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("RELAY_SESSION_TTL", "100000000000000");
        assert_eq!(load_server().session_ttl.as_secs(), 365 * 24 * 60 * 60);
        clear_env_vars();
    }

    #[test]
    fn test_cli_port_disabled() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("RELAY_CLI_PORT", "-1");
        assert_eq!(load_server().cli_port, None);
        clear_env_vars();
    }

    #[test]
    fn test_invalid_env_falls_back_to_default() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("RELAY_HTTP_ADDR", "not an address");
        std::env::set_var("RELAY_CLI_PORT", "abc");
        std::env::set_var("RELAY_SESSION_TTL", "xyz");
        std::env::set_var("RELAY_FRAME_LIMIT", "lots");
        let cfg = load_server();
        assert_eq!(cfg.http_addr.port(), 8080);
        assert_eq!(cfg.cli_port, Some(0));
        assert_eq!(cfg.session_ttl.as_secs(), 86_400);
        assert_eq!(cfg.channel.max_frame_size, 16 * 1024 * 1024);
        clear_env_vars();
    }

    #[test]
    fn test_floors() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("RELAY_FRAME_LIMIT", "0");
        std::env::set_var("RELAY_HEARTBEAT_INTERVAL", "0");
        std::env::set_var("RELAY_MAX_CONNECTIONS", "0");
        std::env::set_var("RELAY_SESSION_TTL", "0");
        let cfg = load_server();
        assert_eq!(cfg.max_connections, 1);
        assert_eq!(cfg.session_ttl.as_secs(), 1);
        let cfg = load_client();
        assert!(cfg.channel.max_frame_size >= 4096, "frame limit must have floor");
        assert_eq!(cfg.channel.heartbeat_interval.as_secs(), 1);
        clear_env_vars();
    }

    #[test]
    fn test_client_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("RELAY_URL", "https://ci.example/");
        std::env::set_var("RELAY_CLI_COOKIE", "job#1:-1:abc");
        std::env::set_var("RELAY_CREDENTIALS_FILE", "/tmp/relay-creds.json");
        let cfg = load_client();
        assert_eq!(cfg.url.as_deref(), Some("https://ci.example/"));
        assert_eq!(cfg.build_token.as_deref(), Some("job#1:-1:abc"));
        assert_eq!(cfg.credentials_file, Some(PathBuf::from("/tmp/relay-creds.json")));
        clear_env_vars();
    }

    #[test]
    fn test_user_seed_debug_redacts_password() {
        let seed = UserSeed {
            name: "alice".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{:?}", seed).contains("hunter2"));
    }
}
