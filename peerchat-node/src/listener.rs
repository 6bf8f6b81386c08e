//! Inbound listener: binds the local listen port and turns accepted sockets into peer links.

use std::net::SocketAddr;

use tokio::net::TcpListener;

use crate::link::PeerLink;

pub const MIN_PORT: u16 = 1024;
pub const MAX_PORT: u16 = 65535;

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("port {0} out of range ({MIN_PORT}-{MAX_PORT})")]
    PortOutOfRange(u16),
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
}

pub fn validate_port(port: u16) -> Result<(), ListenerError> {
    if (MIN_PORT..=MAX_PORT).contains(&port) {
        Ok(())
    } else {
        Err(ListenerError::PortOutOfRange(port))
    }
}

pub struct InboundListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl InboundListener {
    /// Bind `host:port`. Fails fast on a port outside the unprivileged range or one already in use.
    pub async fn bind(host: &str, port: u16) -> Result<Self, ListenerError> {
        validate_port(port)?;
        let addr = if host.contains(':') {
            format!("[{}]:{}", host, port)
        } else {
            format!("{}:{}", host, port)
        };
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ListenerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ListenerError::Bind { addr, source })?;
        tracing::info!(addr = %local_addr, "listening");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the next inbound socket. Errors concern that socket only; the listener stays usable.
    pub async fn accept_link(&self) -> std::io::Result<PeerLink> {
        let (stream, remote) = self.listener.accept().await?;
        tracing::debug!(remote = %remote, "accepted");
        PeerLink::new(stream)
    }
}
