//! Handling of requests that arrive from the peer.

use async_trait::async_trait;

use super::duplex::Channel;
use super::protocol::{Call, RemoteFailure, Reply};

/// Answers requests sent by the other end of a channel.
///
/// Each request runs on its own task. `channel` is the channel the request
/// arrived on, so a handler can call back into the peer while answering.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, call: Call, channel: Channel) -> Result<Reply, RemoteFailure>;
}

/// Refuses every request. Used by ends that only make calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct RefuseAll;

#[async_trait]
impl RequestHandler for RefuseAll {
    async fn handle(&self, call: Call, _channel: Channel) -> Result<Reply, RemoteFailure> {
        Err(RemoteFailure::new(format!(
            "{} is not accepted on this side",
            call.kind()
        )))
    }
}
