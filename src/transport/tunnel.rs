//! Client side of the HTTP tunnel.
//!
//! Two `POST` requests share a session id. The `download` response body
//! carries server-to-client bytes; the `upload` request body streams
//! client-to-server bytes for as long as the channel is open.

use futures::TryStreamExt;
use reqwest::Url;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{TaskGuard, Transport, TransportError, TransportKind};

/// Tunnel endpoint, relative to the server base URL.
pub const TUNNEL_PATH: &str = "cli";

pub const SESSION_HEADER: &str = "Session";
pub const SIDE_HEADER: &str = "Side";
pub const SIDE_DOWNLOAD: &str = "download";
pub const SIDE_UPLOAD: &str = "upload";

const UPLOAD_BUFFER: usize = 64 * 1024;

pub(super) async fn open(http: &reqwest::Client, base: &Url) -> Result<Transport, TransportError> {
    let endpoint = base
        .join(TUNNEL_PATH)
        .map_err(|e| TransportError::InvalidUrl {
            url: base.to_string(),
            reason: e.to_string(),
        })?;
    let session = Uuid::new_v4().to_string();
    debug!(%session, "opening tunnel");

    let download = http
        .post(endpoint.clone())
        .header(SESSION_HEADER, &session)
        .header(SIDE_HEADER, SIDE_DOWNLOAD)
        .send()
        .await?;
    if !download.status().is_success() {
        return Err(TransportError::Status {
            what: "tunnel download",
            status: download.status().as_u16(),
        });
    }
    let incoming = download
        .bytes_stream()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
    let reader = StreamReader::new(Box::pin(incoming));

    let (outgoing, pipe) = tokio::io::duplex(UPLOAD_BUFFER);
    let upload = http
        .post(endpoint)
        .header(SESSION_HEADER, &session)
        .header(SIDE_HEADER, SIDE_UPLOAD)
        .body(reqwest::Body::wrap_stream(ReaderStream::new(pipe)));
    let task = tokio::spawn(async move {
        match upload.send().await {
            Ok(response) if response.status().is_success() => debug!(%session, "tunnel upload finished"),
            Ok(response) => warn!(%session, status = %response.status(), "tunnel upload rejected"),
            Err(e) => debug!(%session, error = %e, "tunnel upload ended"),
        }
    });

    Ok(Transport::new(Box::new(reader), Box::new(outgoing), TransportKind::Tunneled)
        .with_guard(TaskGuard::new(task)))
}
