//! Direct TCP listener.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{serve_connection, ServerState};
use crate::security_log;
use crate::telemetry::SecurityEvent;
use crate::transport::{Transport, TransportKind, CONNECT_PREAMBLE};

/// Longest preamble line accepted, newline included.
const MAX_PREAMBLE_LEN: usize = 64;

const PREAMBLE_TIMEOUT: Duration = Duration::from_secs(10);

pub(super) async fn accept_loop(listener: TcpListener, state: Arc<ServerState>, stop: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = stop.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };

        let Some(guard) = state.connections.try_acquire() else {
            warn!(%peer, "connection refused: limit reached or draining");
            continue;
        };

        let state = state.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let peer_str = peer.to_string();
            match tokio::time::timeout(PREAMBLE_TIMEOUT, read_preamble(stream)).await {
                Ok(Ok(transport)) => {
                    debug!(peer = %peer_str, "direct connection accepted");
                    serve_connection(state, transport).await;
                }
                Ok(Err(line)) => {
                    security_log!(SecurityEvent::PreambleRejected, "unexpected preamble", "peer" => peer_str.as_str(), "line" => line.as_str());
                }
                Err(_) => {
                    security_log!(SecurityEvent::PreambleRejected, "preamble timed out", "peer" => peer_str.as_str());
                }
            }
        });
    }
    debug!("direct listener stopped");
}

/// Read the preamble line one byte at a time so no frame bytes are consumed.
///
/// On mismatch returns what was read, for the log.
async fn read_preamble(mut stream: TcpStream) -> Result<Transport, String> {
    let mut line = Vec::with_capacity(CONNECT_PREAMBLE.len() + 1);
    loop {
        let byte = match stream.read_u8().await {
            Ok(b) => b,
            Err(e) => return Err(format!("<read failed: {}>", e)),
        };
        if byte == b'\n' {
            break;
        }
        line.push(byte);
        if line.len() >= MAX_PREAMBLE_LEN {
            return Err(String::from_utf8_lossy(&line).into_owned());
        }
    }

    let text = String::from_utf8_lossy(&line);
    if text.trim_end_matches('\r') != CONNECT_PREAMBLE {
        return Err(text.into_owned());
    }

    let _ = stream.set_nodelay(true);
    let (reader, writer) = stream.into_split();
    Ok(Transport::new(
        Box::new(reader),
        Box::new(writer),
        TransportKind::Direct,
    ))
}
