//! The command server: HTTP probe and tunnel endpoints, the direct TCP
//! listener, and per-connection command dispatch.

mod commands;
mod connections;
mod dispatch;
mod http;
mod tcp;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::{AuthenticationResolver, IdentityService};
use crate::channel::{Channel, ChannelConfig, EntryPoint, ENTRY_POINT_PROPERTY, PROTOCOL_VERSION};
use crate::config::ServerEnvConfig;
use crate::runs::RunTracker;
use crate::token::{BuildScopeTokenIssuer, SessionTokens, TokenCodec, TokenError};
use crate::transport::Transport;

pub use commands::{Command, CommandContext, CommandRegistry};
pub use connections::{ConnectionGuard, ConnectionTracker, DrainResult};
pub use dispatch::{CommandDispatcher, RemoteInvoker};

use http::TunnelRegistry;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// State shared by every connection.
pub struct ServerState {
    pub(crate) root_url: String,
    pub(crate) server_version: String,
    pub(crate) sessions: SessionTokens,
    pub(crate) issuer: Arc<BuildScopeTokenIssuer>,
    pub(crate) resolver: AuthenticationResolver,
    pub(crate) commands: CommandRegistry,
    pub(crate) channel_config: ChannelConfig,
    pub(crate) connections: Arc<ConnectionTracker>,
    pub(crate) cli_port: Option<u16>,
    pub(crate) tunnels: TunnelRegistry,
    next_connection: AtomicU64,
    force_close: CancellationToken,
}

impl ServerState {
    /// Key under which clients store this server's session tokens.
    pub fn root_url(&self) -> &str {
        &self.root_url
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    pub fn sessions(&self) -> &SessionTokens {
        &self.sessions
    }

    pub fn issuer(&self) -> &BuildScopeTokenIssuer {
        &self.issuer
    }

    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    pub fn connections(&self) -> &ConnectionTracker {
        &self.connections
    }

    /// Descriptor published on every new channel.
    pub fn entry_point(&self) -> EntryPoint {
        EntryPoint {
            protocol_version: PROTOCOL_VERSION,
            server_version: self.server_version.clone(),
            commands: self.commands.infos(),
        }
    }
}

/// Serve one established transport until either side closes it.
pub(crate) async fn serve_connection(state: Arc<ServerState>, transport: Transport) {
    let id = format!("conn-{}", state.next_connection.fetch_add(1, Ordering::Relaxed));
    let handler = Arc::new(CommandDispatcher::new(state.clone()));
    let channel = Channel::open(id.clone(), transport, handler, state.channel_config.clone());

    if let Err(e) = channel
        .publish_property(ENTRY_POINT_PROPERTY, &state.entry_point())
        .await
    {
        warn!(connection = %id, error = %e, "could not publish entry point");
        channel.close().await;
        return;
    }

    tokio::select! {
        _ = channel.closed() => {}
        _ = state.force_close.cancelled() => debug!(connection = %id, "closing for shutdown"),
    }
    channel.close().await;
    debug!(connection = %id, "connection finished");
}

/// Assembles a [`Server`].
pub struct ServerBuilder {
    config: ServerEnvConfig,
    identity: Arc<dyn IdentityService>,
    runs: Arc<dyn RunTracker>,
    commands: CommandRegistry,
}

impl ServerBuilder {
    pub fn new(
        config: ServerEnvConfig,
        identity: Arc<dyn IdentityService>,
        runs: Arc<dyn RunTracker>,
    ) -> Self {
        Self {
            config,
            identity,
            runs,
            commands: CommandRegistry::with_builtins(),
        }
    }

    /// Add or replace a command.
    pub fn command(mut self, command: Arc<dyn Command>) -> Self {
        self.commands.register(command);
        self
    }

    /// Bind the listeners and start serving.
    pub async fn start(self) -> Result<Server, ServerError> {
        let ServerBuilder {
            config,
            identity,
            runs,
            commands,
        } = self;

        let codec = TokenCodec::new(config.secret_key);
        let sessions = SessionTokens::new(codec.clone(), config.session_ttl);
        let issuer = Arc::new(BuildScopeTokenIssuer::new(codec, runs));
        let resolver = AuthenticationResolver::standard(identity, sessions.clone(), issuer.clone());

        let cli_listener = match config.cli_port {
            Some(port) => {
                let addr = SocketAddr::new(config.http_addr.ip(), port);
                let listener = TcpListener::bind(addr)
                    .await
                    .map_err(|source| ServerError::Bind { addr, source })?;
                Some(listener)
            }
            None => None,
        };
        let cli_addr = cli_listener
            .as_ref()
            .map(|l| l.local_addr())
            .transpose()?;

        let http_listener = TcpListener::bind(config.http_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.http_addr,
                source,
            })?;
        let http_addr = http_listener.local_addr()?;

        let state = Arc::new(ServerState {
            root_url: crate::credentials::normalize_url(&config.root_url),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            sessions,
            issuer,
            resolver,
            commands,
            channel_config: config.channel,
            connections: ConnectionTracker::new(config.max_connections),
            cli_port: cli_addr.map(|a| a.port()),
            tunnels: TunnelRegistry::default(),
            next_connection: AtomicU64::new(1),
            force_close: CancellationToken::new(),
        });

        let stop = CancellationToken::new();
        let mut tasks = Vec::new();

        if let Some(listener) = cli_listener {
            tasks.push(tokio::spawn(tcp::accept_loop(
                listener,
                state.clone(),
                stop.clone(),
            )));
        }

        let app = http::router(state.clone());
        let http_stop = stop.clone();
        tasks.push(tokio::spawn(async move {
            let shutdown = async move { http_stop.cancelled().await };
            if let Err(e) = axum::serve(http_listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(error = %e, "http listener failed");
            }
        }));

        info!(
            http = %http_addr,
            direct = ?cli_addr,
            root_url = %state.root_url,
            "server listening"
        );

        Ok(Server {
            state,
            http_addr,
            cli_addr,
            stop,
            shutdown_timeout: config.shutdown_timeout,
            tasks,
        })
    }
}

/// A running server.
pub struct Server {
    state: Arc<ServerState>,
    http_addr: SocketAddr,
    cli_addr: Option<SocketAddr>,
    stop: CancellationToken,
    shutdown_timeout: Duration,
    tasks: Vec<JoinHandle<()>>,
}

impl Server {
    /// Start with the built-in commands.
    pub async fn start(
        config: ServerEnvConfig,
        identity: Arc<dyn IdentityService>,
        runs: Arc<dyn RunTracker>,
    ) -> Result<Server, ServerError> {
        ServerBuilder::new(config, identity, runs).start().await
    }

    /// URL clients connect to.
    pub fn url(&self) -> String {
        format!("http://{}/", self.http_addr)
    }

    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    /// Address of the direct listener, when enabled.
    pub fn cli_addr(&self) -> Option<SocketAddr> {
        self.cli_addr
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Environment a run exports to the processes it launches.
    pub fn build_environment(&self, run_id: &str) -> Result<Vec<(String, String)>, TokenError> {
        self.state.issuer.build_environment(run_id)
    }

    /// Stop accepting, drain live connections, then close what is left.
    pub async fn shutdown(self) -> DrainResult {
        self.stop.cancel();

        let result = self.state.connections.drain(self.shutdown_timeout).await;
        if let DrainResult::Timeout { remaining } = &result {
            warn!(remaining, "closing connections that did not finish in time");
        }
        self.state.force_close.cancel();
        self.state.tunnels.clear();

        for mut task in self.tasks {
            if tokio::time::timeout(self.shutdown_timeout, &mut task).await.is_err() {
                warn!("listener did not stop in time");
                task.abort();
            }
        }
        info!("server stopped");
        result
    }
}
