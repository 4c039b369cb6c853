//! Multiplexed request/response channel over a byte-stream transport.
//!
//! Both ends can issue calls; responses are matched by correlation id, so
//! they may arrive in any order.

mod duplex;
mod handler;
pub mod protocol;

pub use duplex::{Channel, ChannelConfig, ChannelError};
pub use handler::{RefuseAll, RequestHandler};
pub use protocol::{
    Call, CallId, CommandInfo, CommandInvocation, CommandOutcome, CredentialArgs, EntryPoint,
    Frame, ProtocolError, RemoteFailure, Reply, DEFAULT_MAX_FRAME_SIZE, ENTRY_POINT_PROPERTY,
    PROTOCOL_VERSION,
};
