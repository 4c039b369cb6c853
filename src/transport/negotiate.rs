//! Transport selection: probe the server, then connect directly or tunnel.

use std::time::Duration;

use reqwest::Url;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::{tunnel, Transport, TransportError, TransportKind};
use crate::credentials::normalize_url;

/// Response header advertising the direct CLI port.
pub const CLI_PORT_HEADER: &str = "X-Relay-CLI-Port";

/// First line written on a direct connection.
pub const CONNECT_PREAMBLE: &str = "Protocol:CLI-connect";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Picks and opens a transport to one server.
#[derive(Debug, Clone)]
pub struct TransportNegotiator {
    http: reqwest::Client,
    base: Url,
}

impl TransportNegotiator {
    /// `base_url` must be an `http` or `https` URL.
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        let base = parse_base(base_url)?;
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { http, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// `HEAD` the base URL and read the advertised direct port, if any.
    pub async fn probe(&self) -> Result<Option<u16>, TransportError> {
        let response = self.http.head(self.base.clone()).send().await?;
        debug!(status = %response.status(), "probe answered");
        match response.headers().get(CLI_PORT_HEADER) {
            None => Ok(None),
            Some(value) => {
                let malformed = || TransportError::MalformedHeader {
                    header: CLI_PORT_HEADER,
                    value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
                };
                let text = value.to_str().map_err(|_| malformed())?;
                text.trim().parse::<u16>().map(Some).map_err(|_| malformed())
            }
        }
    }

    /// Probe, then prefer the direct socket and fall back to the tunnel.
    pub async fn connect(&self) -> Result<Transport, TransportError> {
        let transport = match self.probe().await? {
            Some(port) => self.connect_direct(port).await?,
            None => self.connect_tunnel().await?,
        };
        info!(server = %self.base, transport = transport.kind.as_str(), "connected");
        Ok(transport)
    }

    /// Open a raw TCP connection to `port` on the base URL's host.
    pub async fn connect_direct(&self, port: u16) -> Result<Transport, TransportError> {
        let host = self.base.host_str().ok_or_else(|| TransportError::InvalidUrl {
            url: self.base.to_string(),
            reason: "no host".into(),
        })?;
        let addr = format!("{}:{}", host, port);

        let connect = TcpStream::connect(addr.as_str());
        let mut stream = match tokio::time::timeout(CONNECT_TIMEOUT, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(TransportError::Connect { addr, source }),
            Err(_) => {
                return Err(TransportError::Connect {
                    addr,
                    source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
                })
            }
        };
        stream.set_nodelay(true)?;
        stream
            .write_all(format!("{}\n", CONNECT_PREAMBLE).as_bytes())
            .await?;

        let (reader, writer) = stream.into_split();
        Ok(Transport::new(
            Box::new(reader),
            Box::new(writer),
            TransportKind::Direct,
        ))
    }

    /// Open the HTTP stream pair.
    pub async fn connect_tunnel(&self) -> Result<Transport, TransportError> {
        tunnel::open(&self.http, &self.base).await
    }
}

fn parse_base(url: &str) -> Result<Url, TransportError> {
    let invalid = |reason: String| TransportError::InvalidUrl {
        url: url.to_string(),
        reason,
    };
    let parsed = Url::parse(&normalize_url(url)).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(invalid(format!("unsupported scheme {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let negotiator = TransportNegotiator::new("http://127.0.0.1:8080/relay").unwrap();
        assert_eq!(negotiator.base_url().as_str(), "http://127.0.0.1:8080/relay/");
    }

    #[test]
    fn test_rejects_non_http_scheme() {
        assert!(matches!(
            TransportNegotiator::new("ftp://ci.example/"),
            Err(TransportError::InvalidUrl { .. })
        ));
        assert!(matches!(
            TransportNegotiator::new("not a url"),
            Err(TransportError::InvalidUrl { .. })
        ));
    }
}
