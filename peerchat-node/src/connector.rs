//! Outbound connector: resolve and dial a peer's advertised endpoint.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;

use crate::link::PeerLink;

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("unknown host {0}")]
    UnknownHost(String),
    #[error("connection refused by {0}")]
    Refused(String),
    #[error("connection to {0} timed out")]
    Timeout(String),
    #[error("{target} unreachable: {source}")]
    Unreachable { target: String, source: io::Error },
}

/// Dial `host:port`, trying each resolved address in turn. The whole attempt, name resolution
/// included, is bounded by `limit`.
pub async fn connect(host: &str, port: u16, limit: Duration) -> Result<PeerLink, ConnectError> {
    let target = if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    };
    let stream = timeout(limit, dial(host, port, &target))
        .await
        .map_err(|_| ConnectError::Timeout(target.clone()))??;
    let link = PeerLink::new(stream).map_err(|source| ConnectError::Unreachable {
        target: target.clone(),
        source,
    })?;
    tracing::debug!(addr = %target, peer = %link.peer_id(), "connected");
    Ok(link)
}

async fn dial(host: &str, port: u16, target: &str) -> Result<TcpStream, ConnectError> {
    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|_| ConnectError::UnknownHost(host.to_string()))?
        .collect();
    let mut last = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                tracing::debug!(addr = %addr, error = %e, "dial attempt failed");
                last = Some(e);
            }
        }
    }
    match last {
        None => Err(ConnectError::UnknownHost(host.to_string())),
        Some(e) => Err(classify(target, e)),
    }
}

fn classify(target: &str, e: io::Error) -> ConnectError {
    match e.kind() {
        io::ErrorKind::ConnectionRefused => ConnectError::Refused(target.to_string()),
        io::ErrorKind::TimedOut => ConnectError::Timeout(target.to_string()),
        _ => ConnectError::Unreachable {
            target: target.to_string(),
            source: e,
        },
    }
}
