//! Byte-stream transports for the command channel.
//!
//! A [`Transport`] is a read half and a write half plus the kind of link
//! underneath. The channel layer does not care which kind it got, except that
//! tunneled links need keep-alive traffic.

mod negotiate;
mod tunnel;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use thiserror::Error;

pub use negotiate::{TransportNegotiator, CLI_PORT_HEADER, CONNECT_PREAMBLE};
pub use tunnel::{SESSION_HEADER, SIDE_DOWNLOAD, SIDE_HEADER, SIDE_UPLOAD, TUNNEL_PATH};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid server URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server answered {status} on {what}")]
    Status { what: &'static str, status: u16 },

    #[error("Malformed {header} header: {value:?}")]
    MalformedHeader { header: &'static str, value: String },

    #[error("Connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Kind of link carrying a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Raw TCP socket.
    Direct,
    /// Pair of long-lived HTTP streams.
    Tunneled,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Tunneled => "tunneled",
        }
    }
}

/// Aborts the wrapped task when dropped.
#[derive(Debug)]
pub struct TaskGuard(JoinHandle<()>);

impl TaskGuard {
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self(handle)
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// An established link, ready to be wrapped in a channel.
pub struct Transport {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
    pub kind: TransportKind,
    /// Background work the link depends on (the tunnel upload request).
    pub guard: Option<TaskGuard>,
}

impl Transport {
    pub fn new(reader: BoxedReader, writer: BoxedWriter, kind: TransportKind) -> Self {
        Self {
            reader,
            writer,
            kind,
            guard: None,
        }
    }

    pub fn with_guard(mut self, guard: TaskGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Two connected in-memory transports.
    pub fn in_memory_pair(kind: TransportKind, buffer: usize) -> (Transport, Transport) {
        let (a, b) = tokio::io::duplex(buffer);
        let (a_read, a_write) = tokio::io::split(a);
        let (b_read, b_write) = tokio::io::split(b);
        (
            Transport::new(Box::new(a_read), Box::new(a_write), kind),
            Transport::new(Box::new(b_read), Box::new(b_write), kind),
        )
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("kind", &self.kind)
            .field("guarded", &self.guard.is_some())
            .finish()
    }
}
