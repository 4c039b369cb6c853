//! The channel itself: one reader task, an optional heartbeat task, and a
//! table of calls waiting for their responses.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::handler::RequestHandler;
use super::protocol::{
    frame_bytes, read_frame, Call, CallId, Frame, ProtocolError, RemoteFailure, Reply,
    DEFAULT_MAX_FRAME_SIZE,
};
use crate::transport::{BoxedReader, BoxedWriter, TaskGuard, Transport, TransportKind};

/// Upper bound on flushing and shutting down the write half during close.
const WRITER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Channel tuning.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub max_frame_size: usize,
    /// Ping period on tunneled transports.
    pub heartbeat_interval: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Channel closed")]
    Closed,

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Remote call failed: {0}")]
    Remote(String),

    #[error("Unexpected reply to {call}: {reply}")]
    UnexpectedReply { call: &'static str, reply: String },
}

impl ChannelError {
    pub fn unexpected(call: &'static str, reply: &Reply) -> Self {
        Self::UnexpectedReply {
            call,
            reply: format!("{:?}", reply),
        }
    }
}

type PendingReply = oneshot::Sender<Result<Reply, ChannelError>>;

struct Inner {
    id: String,
    kind: TransportKind,
    config: ChannelConfig,
    writer: Mutex<Option<BoxedWriter>>,
    next_id: AtomicU64,
    pending: DashMap<u64, PendingReply>,
    remote_properties: DashMap<String, serde_json::Value>,
    property_changed: Notify,
    shutdown: CancellationToken,
    closing: AtomicBool,
    handler: Arc<dyn RequestHandler>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    guard: parking_lot::Mutex<Option<TaskGuard>>,
}

/// One end of a multiplexed connection. Cheap to clone; all clones share
/// the same connection.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("closed", &self.is_closed())
            .field("pending", &self.inner.pending.len())
            .finish()
    }
}

impl Channel {
    /// Wrap `transport` and start the background tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(
        id: impl Into<String>,
        transport: Transport,
        handler: Arc<dyn RequestHandler>,
        config: ChannelConfig,
    ) -> Channel {
        let Transport {
            reader,
            writer,
            kind,
            guard,
        } = transport;

        let channel = Channel {
            inner: Arc::new(Inner {
                id: id.into(),
                kind,
                config,
                writer: Mutex::new(Some(writer)),
                next_id: AtomicU64::new(1),
                pending: DashMap::new(),
                remote_properties: DashMap::new(),
                property_changed: Notify::new(),
                shutdown: CancellationToken::new(),
                closing: AtomicBool::new(false),
                handler,
                tasks: parking_lot::Mutex::new(Vec::new()),
                guard: parking_lot::Mutex::new(guard),
            }),
        };

        let mut tasks = vec![tokio::spawn(read_loop(channel.clone(), reader))];
        if kind == TransportKind::Tunneled {
            tasks.push(tokio::spawn(heartbeat_loop(channel.clone())));
        }
        channel.inner.tasks.lock().extend(tasks);

        debug!(channel = %channel.inner.id, transport = kind.as_str(), "channel opened");
        channel
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TransportKind {
        self.inner.kind
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closing.load(Ordering::SeqCst)
    }

    /// Send `call` to the peer and wait for its reply.
    pub async fn invoke(&self, call: Call) -> Result<Reply, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(id, tx);

        // Close may have drained the table between the check and the insert.
        if self.is_closed() {
            self.inner.pending.remove(&id);
            return Err(ChannelError::Closed);
        }

        let kind = call.kind();
        trace!(channel = %self.inner.id, id, call = kind, "invoke");
        if let Err(e) = self.send(&Frame::Request { id: CallId(id), call }).await {
            self.inner.pending.remove(&id);
            if let ChannelError::Transport(io) = &e {
                self.shutdown(Some(io.to_string())).await;
            }
            return Err(e);
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Closed),
        }
    }

    /// Publish a property to the peer.
    pub async fn publish_property<T: Serialize>(
        &self,
        name: &str,
        value: &T,
    ) -> Result<(), ChannelError> {
        let value = serde_json::to_value(value).map_err(ProtocolError::from)?;
        self.send(&Frame::Property {
            name: name.to_string(),
            value,
        })
        .await
    }

    /// Property published by the peer, if it has arrived.
    pub fn remote_property(&self, name: &str) -> Option<serde_json::Value> {
        self.inner.remote_properties.get(name).map(|v| v.clone())
    }

    /// Wait until the peer publishes `name`, or the channel closes.
    pub async fn wait_for_remote_property(
        &self,
        name: &str,
    ) -> Result<serde_json::Value, ChannelError> {
        loop {
            let notified = self.inner.property_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.remote_property(name) {
                return Ok(value);
            }
            if self.is_closed() {
                return Err(ChannelError::Closed);
            }
            notified.await;
        }
    }

    /// Close both directions. Idempotent.
    pub async fn close(&self) {
        self.shutdown(None).await;
    }

    /// Resolves once the channel has started closing.
    pub async fn closed(&self) {
        self.inner.shutdown.cancelled().await;
    }

    async fn send(&self, frame: &Frame) -> Result<(), ChannelError> {
        let bytes = frame_bytes(frame, self.inner.config.max_frame_size)?;
        let write = async {
            let mut writer = self.inner.writer.lock().await;
            let writer = writer.as_mut().ok_or(ChannelError::Closed)?;
            writer.write_all(&bytes).await?;
            writer.flush().await?;
            Ok::<(), ChannelError>(())
        };

        tokio::select! {
            _ = self.inner.shutdown.cancelled() => Err(ChannelError::Closed),
            result = write => result,
        }
    }

    fn dispatch(&self, frame: Frame) {
        match frame {
            Frame::Response { id, result } => match self.inner.pending.remove(&id.0) {
                Some((_, tx)) => {
                    let _ = tx.send(result.map_err(|f| ChannelError::Remote(f.message)));
                }
                None => warn!(channel = %self.inner.id, id = id.0, "response for unknown call"),
            },
            Frame::Request { id, call } => self.spawn_request(id, call),
            Frame::Property { name, value } => {
                trace!(channel = %self.inner.id, property = %name, "remote property");
                self.inner.remote_properties.insert(name, value);
                self.inner.property_changed.notify_waiters();
            }
            Frame::Ping => trace!(channel = %self.inner.id, "ping"),
        }
    }

    fn spawn_request(&self, id: CallId, call: Call) {
        let channel = self.clone();
        let handle = tokio::spawn(async move {
            let kind = call.kind();
            let handling = channel.inner.handler.handle(call, channel.clone());
            let result = match AssertUnwindSafe(handling).catch_unwind().await {
                Ok(result) => result,
                Err(_) => {
                    warn!(channel = %channel.inner.id, call = kind, "request handler panicked");
                    Err(RemoteFailure::new(format!("{} handler failed", kind)))
                }
            };
            let delivered = match channel.send(&Frame::Response { id, result }).await {
                Err(ChannelError::Protocol(e)) => {
                    let failure = Err(RemoteFailure::new(e.to_string()));
                    channel.send(&Frame::Response { id, result: failure }).await
                }
                other => other,
            };
            if let Err(e) = delivered {
                debug!(channel = %channel.inner.id, call = kind, error = %e, "response not delivered");
            }
        });

        let mut tasks = self.inner.tasks.lock();
        if self.is_closed() {
            handle.abort();
            return;
        }
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    async fn shutdown(&self, reason: Option<String>) {
        if self.inner.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        match &reason {
            Some(reason) => debug!(channel = %self.inner.id, %reason, "channel closing"),
            None => debug!(channel = %self.inner.id, "channel closed locally"),
        }

        self.inner.shutdown.cancel();
        self.inner.property_changed.notify_waiters();

        let ids: Vec<u64> = self.inner.pending.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.inner.pending.remove(&id) {
                let _ = tx.send(Err(ChannelError::Closed));
            }
        }

        if let Ok(mut writer) =
            tokio::time::timeout(WRITER_SHUTDOWN_TIMEOUT, self.inner.writer.lock()).await
        {
            if let Some(mut w) = writer.take() {
                let _ = tokio::time::timeout(WRITER_SHUTDOWN_TIMEOUT, w.shutdown()).await;
            }
        }

        drop(self.inner.guard.lock().take());

        // Last: this may abort the task we are running on.
        let tasks = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            task.abort();
        }
    }
}

async fn read_loop(channel: Channel, mut reader: BoxedReader) {
    let max = channel.inner.config.max_frame_size;
    let reason = loop {
        let next = tokio::select! {
            _ = channel.inner.shutdown.cancelled() => break None,
            next = read_frame(&mut reader, max) => next,
        };
        match next {
            Ok(Some(frame)) => channel.dispatch(frame),
            Ok(None) => break Some("peer closed the stream".to_string()),
            Err(e) => break Some(e.to_string()),
        }
    };
    channel.shutdown(reason).await;
}

async fn heartbeat_loop(channel: Channel) {
    let period = channel.inner.config.heartbeat_interval;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = channel.inner.shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = channel.send(&Frame::Ping).await {
                    trace!(channel = %channel.inner.id, error = %e, "heartbeat write failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::handler::RefuseAll;
    use crate::channel::protocol::CommandOutcome;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl RequestHandler for Echo {
        async fn handle(&self, call: Call, _channel: Channel) -> Result<Reply, RemoteFailure> {
            match call {
                Call::HasCommand { name } => Ok(Reply::Flag {
                    value: name == "help",
                }),
                Call::Execute(inv) => Ok(Reply::Outcome(CommandOutcome {
                    exit_code: 0,
                    stdout: inv.args.join(" "),
                    stderr: String::new(),
                })),
                other => Err(RemoteFailure::new(format!("no {}", other.kind()))),
            }
        }
    }

    fn pair(kind: TransportKind) -> (Channel, Channel) {
        let (a, b) = Transport::in_memory_pair(kind, 64 * 1024);
        let client = Channel::open("client", a, Arc::new(RefuseAll), ChannelConfig::default());
        let server = Channel::open("server", b, Arc::new(Echo), ChannelConfig::default());
        (client, server)
    }

    #[tokio::test]
    async fn test_invoke_round_trip() {
        let (client, _server) = pair(TransportKind::Direct);
        let reply = client
            .invoke(Call::HasCommand {
                name: "help".into(),
            })
            .await
            .unwrap();
        assert_eq!(reply, Reply::Flag { value: true });
    }

    #[tokio::test]
    async fn test_remote_failure_surfaces() {
        let (client, _server) = pair(TransportKind::Direct);
        let result = client.invoke(Call::ReadBuildToken).await;
        assert!(matches!(result, Err(ChannelError::Remote(msg)) if msg.contains("read_build_token")));
    }

    #[tokio::test]
    async fn test_property_wait() {
        let (client, server) = pair(TransportKind::Direct);
        server.publish_property("greeting", &"hello").await.unwrap();
        let value = client.wait_for_remote_property("greeting").await.unwrap();
        assert_eq!(value, serde_json::json!("hello"));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (client, _server) = pair(TransportKind::Direct);
        client.close().await;
        client.close().await;
        assert!(client.is_closed());
        assert!(matches!(
            client.invoke(Call::ReadBuildToken).await,
            Err(ChannelError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_peer_close_propagates() {
        let (client, server) = pair(TransportKind::Direct);
        server.close().await;
        tokio::time::timeout(Duration::from_secs(5), client.closed())
            .await
            .expect("client should observe the close");
        assert!(client.is_closed());
    }

    struct Panics;

    #[async_trait]
    impl RequestHandler for Panics {
        async fn handle(&self, call: Call, _channel: Channel) -> Result<Reply, RemoteFailure> {
            panic!("handler blew up on {}", call.kind());
        }
    }

    #[tokio::test]
    async fn test_handler_panic_fails_the_call() {
        let (a, b) = Transport::in_memory_pair(TransportKind::Direct, 64 * 1024);
        let client = Channel::open("client", a, Arc::new(RefuseAll), ChannelConfig::default());
        let _server = Channel::open("server", b, Arc::new(Panics), ChannelConfig::default());

        for _ in 0..2 {
            let call = Call::HasCommand {
                name: "help".into(),
            };
            let result = tokio::time::timeout(Duration::from_secs(3), client.invoke(call))
                .await
                .expect("invoke must not hang after a handler panic");
            assert!(matches!(result, Err(ChannelError::Remote(msg)) if msg.contains("has_command")));
        }
        assert!(!client.is_closed());
    }

    // === Heartbeat ===

    const BEAT: Duration = Duration::from_secs(30);

    fn heartbeat_config() -> ChannelConfig {
        ChannelConfig {
            heartbeat_interval: BEAT,
            ..ChannelConfig::default()
        }
    }

    /// A channel whose peer end is left as raw frames.
    fn raw_peer(kind: TransportKind) -> (Channel, Transport) {
        let (a, b) = Transport::in_memory_pair(kind, 64 * 1024);
        let channel = Channel::open("client", a, Arc::new(RefuseAll), heartbeat_config());
        (channel, b)
    }

    #[tokio::test(start_paused = true)]
    async fn test_tunnel_sends_ping_each_interval() {
        let (_channel, mut peer) = raw_peer(TransportKind::Tunneled);

        let early = tokio::time::timeout(
            BEAT - Duration::from_secs(1),
            read_frame(&mut peer.reader, DEFAULT_MAX_FRAME_SIZE),
        )
        .await;
        assert!(early.is_err(), "no ping before the first interval");

        for beat in 0..3 {
            let frame = tokio::time::timeout(
                BEAT + Duration::from_secs(1),
                read_frame(&mut peer.reader, DEFAULT_MAX_FRAME_SIZE),
            )
            .await
            .unwrap_or_else(|_| panic!("ping {} not sent", beat))
            .unwrap();
            assert!(matches!(frame, Some(Frame::Ping)), "got {:?}", frame);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_sends_no_ping() {
        let (channel, mut peer) = raw_peer(TransportKind::Direct);
        let read = tokio::time::timeout(
            BEAT * 10,
            read_frame(&mut peer.reader, DEFAULT_MAX_FRAME_SIZE),
        )
        .await;
        assert!(read.is_err(), "direct transport wrote {:?}", read);
        assert!(!channel.is_closed());
    }

    /// Writer whose every write fails.
    struct BrokenWriter(Arc<AtomicU64>);

    impl tokio::io::AsyncWrite for BrokenWriter {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            std::task::Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_heartbeat_leaves_channel_open() {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let (local_read, _local_write) = tokio::io::split(local);
        let (_remote_read, mut remote_write) = tokio::io::split(remote);

        let attempts = Arc::new(AtomicU64::new(0));
        let transport = Transport::new(
            Box::new(local_read),
            Box::new(BrokenWriter(attempts.clone())),
            TransportKind::Tunneled,
        );
        let channel = Channel::open("client", transport, Arc::new(RefuseAll), heartbeat_config());

        tokio::time::sleep(BEAT * 3 + Duration::from_secs(5)).await;
        assert!(attempts.load(Ordering::SeqCst) >= 3, "heartbeat never wrote");
        assert!(!channel.is_closed());

        // The read side still works.
        let frame = Frame::Property {
            name: "still".into(),
            value: serde_json::json!("here"),
        };
        crate::channel::protocol::write_frame(&mut remote_write, &frame, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap();
        let value = channel.wait_for_remote_property("still").await.unwrap();
        assert_eq!(value, serde_json::json!("here"));
    }
}
