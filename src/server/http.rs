//! HTTP side of the server: the probe endpoint and the tunnel.
//!
//! A tunnel is two `POST /cli` requests with the same `Session` header. The
//! `download` request is answered at once with a streaming body and parked in
//! the pairing table; the matching `upload` request takes it out and serves
//! the channel for as long as its own body keeps streaming.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use dashmap::DashMap;
use futures::TryStreamExt;
use tokio::io::DuplexStream;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, warn};
use uuid::Uuid;

use super::connections::ConnectionGuard;
use super::{serve_connection, ServerState};
use crate::transport::{
    Transport, TransportKind, CLI_PORT_HEADER, SESSION_HEADER, SIDE_DOWNLOAD, SIDE_HEADER,
    SIDE_UPLOAD, TUNNEL_PATH,
};

const TUNNEL_BUFFER: usize = 64 * 1024;

/// How long a download half waits for its upload half.
const PAIRING_TIMEOUT: Duration = Duration::from_secs(15);

/// Download halves waiting for their upload.
#[derive(Default)]
pub(crate) struct TunnelRegistry {
    pending: DashMap<Uuid, PendingTunnel>,
}

struct PendingTunnel {
    writer: DuplexStream,
    guard: ConnectionGuard,
}

impl TunnelRegistry {
    /// Drop every unpaired download, ending its response body.
    pub(crate) fn clear(&self) {
        self.pending.clear();
    }
}

pub(super) fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/", get(probe))
        .route(&format!("/{}", TUNNEL_PATH), post(tunnel))
        .with_state(state)
}

/// `GET`/`HEAD /`: advertises the direct port when it is enabled.
async fn probe(State(state): State<Arc<ServerState>>) -> Response {
    let mut response = format!("relay-server {}\n", state.server_version).into_response();
    if let (Some(port), Ok(name)) = (state.cli_port, HeaderName::from_bytes(CLI_PORT_HEADER.as_bytes())) {
        response.headers_mut().insert(name, HeaderValue::from(port));
    }
    response
}

async fn tunnel(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let session = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v.trim()).ok());
    let Some(session) = session else {
        return (StatusCode::BAD_REQUEST, "missing or invalid Session header").into_response();
    };

    match headers.get(SIDE_HEADER).and_then(|v| v.to_str().ok()) {
        Some(SIDE_DOWNLOAD) => download(state, session),
        Some(SIDE_UPLOAD) => upload(state, session, body).await,
        _ => (StatusCode::BAD_REQUEST, "missing or invalid Side header").into_response(),
    }
}

fn download(state: Arc<ServerState>, session: Uuid) -> Response {
    let Some(guard) = state.connections.try_acquire() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    };
    if state.tunnels.pending.contains_key(&session) {
        return (StatusCode::CONFLICT, "session already open").into_response();
    }

    let (writer, outgoing) = tokio::io::duplex(TUNNEL_BUFFER);
    state
        .tunnels
        .pending
        .insert(session, PendingTunnel { writer, guard });
    debug!(%session, "tunnel download parked");

    let registry = state.clone();
    tokio::spawn(async move {
        tokio::time::sleep(PAIRING_TIMEOUT).await;
        if registry.tunnels.pending.remove(&session).is_some() {
            warn!(%session, "tunnel upload never arrived");
        }
    });

    Body::from_stream(ReaderStream::new(outgoing)).into_response()
}

async fn upload(state: Arc<ServerState>, session: Uuid, body: Body) -> Response {
    let Some((_, pending)) = state.tunnels.pending.remove(&session) else {
        return (StatusCode::NOT_FOUND, "unknown tunnel session").into_response();
    };
    debug!(%session, "tunnel paired");

    let incoming = body
        .into_data_stream()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
    let reader = StreamReader::new(Box::pin(incoming));
    let PendingTunnel { writer, guard } = pending;

    let transport = Transport::new(Box::new(reader), Box::new(writer), TransportKind::Tunneled);
    serve_connection(state, transport).await;
    drop(guard);

    StatusCode::OK.into_response()
}
