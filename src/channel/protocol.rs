//! Wire format for the command channel.
//!
//! Every frame is a 4-byte big-endian length followed by a JSON body.
//!
//! # Security
//! - Frame size limits prevent memory exhaustion attacks
//! - The protocol version is checked once, before any command runs
//! - Passwords and tokens are redacted from `Debug` output

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version spoken by this build. Peers must match exactly.
pub const PROTOCOL_VERSION: u32 = 1;

/// Property under which the server publishes its [`EntryPoint`].
pub const ENTRY_POINT_PROPERTY: &str = "relay.cli.entry-point";

/// Default upper bound for a single frame body.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16 MB

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid frame format: {0}")]
    InvalidFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Frame too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Correlation id tying a response to its request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(pub u64);

/// Capability descriptor published by the server at connection setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub protocol_version: u32,
    pub server_version: String,
    #[serde(default)]
    pub commands: Vec<CommandInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInfo {
    pub name: String,
    pub description: String,
}

/// Credentials supplied on the client command line.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialArgs {
    pub username: Option<String>,
    pub password: Option<String>,
    pub password_file: Option<String>,
}

impl std::fmt::Debug for CredentialArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialArgs")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("password_file", &self.password_file)
            .finish()
    }
}

/// One remote command run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInvocation {
    pub args: Vec<String>,
    #[serde(default)]
    pub credentials: CredentialArgs,
}

impl CommandInvocation {
    pub fn command_name(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or("help")
    }
}

/// Result of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub exit_code: i32,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

/// Requests carried by the channel, in either direction.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum Call {
    /// Client to server: run a command.
    Execute(CommandInvocation),
    /// Client to server: does the named command exist.
    HasCommand { name: String },
    /// Server to client: read a password file on the client machine.
    ReadPasswordFile { path: String },
    /// Server to client: prompt on the client terminal without echo.
    PromptPassword { prompt: String },
    /// Server to client: stored session token for `url`.
    ReadStoredToken { url: String },
    /// Server to client: store a session token for `url`.
    StoreToken { url: String, token: String },
    /// Server to client: forget the token for `url`.
    RemoveToken { url: String },
    /// Server to client: the ambient build-scope token, if any.
    ReadBuildToken,
}

impl Call {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Execute(_) => "execute",
            Self::HasCommand { .. } => "has_command",
            Self::ReadPasswordFile { .. } => "read_password_file",
            Self::PromptPassword { .. } => "prompt_password",
            Self::ReadStoredToken { .. } => "read_stored_token",
            Self::StoreToken { .. } => "store_token",
            Self::RemoveToken { .. } => "remove_token",
            Self::ReadBuildToken => "read_build_token",
        }
    }
}

impl std::fmt::Debug for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Execute(inv) => f.debug_tuple("Execute").field(inv).finish(),
            Self::StoreToken { url, .. } => f
                .debug_struct("StoreToken")
                .field("url", url)
                .field("token", &"<redacted>")
                .finish(),
            other => f.write_str(other.kind()),
        }
    }
}

/// Successful replies.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Reply {
    Outcome(CommandOutcome),
    Flag { value: bool },
    /// Passwords and tokens travel here; `Debug` hides the value.
    Text { value: Option<String> },
    Done,
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Outcome(outcome) => f.debug_tuple("Outcome").field(outcome).finish(),
            Self::Flag { value } => f.debug_struct("Flag").field("value", value).finish(),
            Self::Text { value } => f
                .debug_struct("Text")
                .field("value", &value.as_ref().map(|_| "<redacted>"))
                .finish(),
            Self::Done => f.write_str("Done"),
        }
    }
}

/// Failure reported by the side that handled a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFailure {
    pub message: String,
}

impl RemoteFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// All frame types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum Frame {
    Request {
        id: CallId,
        call: Call,
    },
    Response {
        id: CallId,
        result: Result<Reply, RemoteFailure>,
    },
    Property {
        name: String,
        value: serde_json::Value,
    },
    /// Keep-alive; carries nothing and expects no answer.
    Ping,
}

/// Encode a frame body to JSON with size limit enforcement.
pub fn encode_frame(frame: &Frame, max: usize) -> Result<Vec<u8>, ProtocolError> {
    let bytes = serde_json::to_vec(frame)?;
    if bytes.len() > max {
        return Err(ProtocolError::MessageTooLarge {
            size: bytes.len(),
            max,
        });
    }
    Ok(bytes)
}

/// Decode a frame body with size limit enforcement.
///
/// # Security
/// Size check happens BEFORE parsing to prevent allocation attacks.
pub fn decode_frame(bytes: &[u8], max: usize) -> Result<Frame, ProtocolError> {
    if bytes.len() > max {
        return Err(ProtocolError::MessageTooLarge {
            size: bytes.len(),
            max,
        });
    }
    Ok(serde_json::from_slice(bytes)?)
}

/// Encode `frame` with its length prefix, ready to write.
pub fn frame_bytes(frame: &Frame, max: usize) -> Result<Vec<u8>, ProtocolError> {
    let body = encode_frame(frame, max)?;
    let len = u32::try_from(body.len()).map_err(|_| ProtocolError::MessageTooLarge {
        size: body.len(),
        max,
    })?;
    let mut buf = Vec::with_capacity(4 + body.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Write one length-prefixed frame and flush.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame, max: usize) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let buf = frame_bytes(frame, max)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame.
///
/// Returns `Ok(None)` when the stream ends before a new frame starts.
pub async fn read_frame<R>(reader: &mut R, max: usize) -> Result<Option<Frame>, ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ProtocolError::InvalidFormat("truncated frame header".into()));
        }
        filled += n;
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > max {
        return Err(ProtocolError::MessageTooLarge { size: len, max });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    decode_frame(&body, max).map(Some)
}
