//! Client side: connect, handshake, run one command.

mod callbacks;
mod password;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::channel::{
    Call, Channel, ChannelConfig, ChannelError, CommandInvocation, CommandOutcome,
    CredentialArgs, EntryPoint, Reply, ENTRY_POINT_PROPERTY, PROTOCOL_VERSION,
};
use crate::credentials::CredentialStore;
use crate::security_log;
use crate::telemetry::SecurityEvent;
use crate::transport::{Transport, TransportError, TransportNegotiator};

pub use callbacks::ClientCallbacks;
pub use password::{NoPrompt, PasswordPrompt, TerminalPrompt};

/// How long to wait for the server's entry point.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("Protocol version mismatch: server speaks {server}, this client speaks {client}")]
    VersionMismatch { server: u32, client: u32 },

    #[error("Handshake failed: {0}")]
    Handshake(String),
}

/// Everything a client run needs besides the transport.
pub struct ClientOptions {
    pub url: String,
    pub credentials: CredentialArgs,
    pub store: Option<Arc<Mutex<CredentialStore>>>,
    pub build_token: Option<String>,
    pub prompt: Arc<dyn PasswordPrompt>,
    pub channel: ChannelConfig,
}

impl ClientOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            credentials: CredentialArgs::default(),
            store: None,
            build_token: None,
            prompt: Arc::new(TerminalPrompt),
            channel: ChannelConfig::default(),
        }
    }
}

/// A connected, version-checked client.
pub struct CliClient {
    channel: Channel,
    entry_point: EntryPoint,
    credentials: CredentialArgs,
}

impl CliClient {
    /// Negotiate a transport to `options.url` and handshake over it.
    pub async fn connect(options: ClientOptions) -> Result<Self, ClientError> {
        let transport = TransportNegotiator::new(&options.url)?.connect().await?;
        Self::over(transport, options).await
    }

    /// Handshake over an already established transport.
    pub async fn over(transport: Transport, options: ClientOptions) -> Result<Self, ClientError> {
        let ClientOptions {
            url,
            credentials,
            store,
            build_token,
            prompt,
            channel: config,
        } = options;

        let handler = Arc::new(ClientCallbacks::new(&url, store, build_token, prompt));
        let channel = Channel::open("client", transport, handler, config);

        match handshake(&channel).await {
            Ok(entry_point) => {
                debug!(server_version = %entry_point.server_version, "handshake complete");
                Ok(Self {
                    channel,
                    entry_point,
                    credentials,
                })
            }
            Err(e) => {
                channel.close().await;
                Err(e)
            }
        }
    }

    pub fn entry_point(&self) -> &EntryPoint {
        &self.entry_point
    }

    /// Run `args` (command name first) on the server.
    pub async fn execute(&self, args: Vec<String>) -> Result<CommandOutcome, ClientError> {
        let call = Call::Execute(CommandInvocation {
            args,
            credentials: self.credentials.clone(),
        });
        match self.channel.invoke(call).await? {
            Reply::Outcome(outcome) => Ok(outcome),
            other => Err(ChannelError::unexpected("execute", &other).into()),
        }
    }

    /// Whether the server knows `name`.
    pub async fn has_command(&self, name: &str) -> Result<bool, ClientError> {
        let call = Call::HasCommand {
            name: name.to_string(),
        };
        match self.channel.invoke(call).await? {
            Reply::Flag { value } => Ok(value),
            other => Err(ChannelError::unexpected("has_command", &other).into()),
        }
    }

    pub async fn close(self) {
        self.channel.close().await;
    }
}

async fn handshake(channel: &Channel) -> Result<EntryPoint, ClientError> {
    let wait = channel.wait_for_remote_property(ENTRY_POINT_PROPERTY);
    let value = match tokio::time::timeout(HANDSHAKE_TIMEOUT, wait).await {
        Ok(value) => value?,
        Err(_) => {
            return Err(ClientError::Handshake(
                "server did not publish its entry point".into(),
            ))
        }
    };

    // Check the version before the rest, whose shape may differ across versions.
    let server = value
        .get("protocol_version")
        .and_then(|v| v.as_u64())
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| ClientError::Handshake("entry point has no protocol version".into()))?;
    if server != PROTOCOL_VERSION {
        let server_str = server.to_string();
        security_log!(SecurityEvent::VersionMismatch, "server protocol version differs", "server" => server_str.as_str());
        return Err(ClientError::VersionMismatch {
            server,
            client: PROTOCOL_VERSION,
        });
    }

    serde_json::from_value(value)
        .map_err(|e| ClientError::Handshake(format!("malformed entry point: {}", e)))
}
