//! User and link identities: stable contact ids, transport-scoped peer ids, advertised endpoints.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Stable identifier for a user: `host:port` of the advertised listening endpoint.
/// Survives reconnects; used as the durable contact key.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ContactId(String);

impl ContactId {
    pub fn new(id: impl Into<String>) -> Self {
        ContactId(id.into())
    }

    /// Derive the contact id for an advertised endpoint.
    pub fn from_endpoint(endpoint: &Endpoint) -> Self {
        ContactId(endpoint.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContactId {
    fn from(s: &str) -> Self {
        ContactId(s.to_string())
    }
}

/// Identifier of one live socket, rendered from the remote endpoint observed at accept/connect time.
/// For inbound links this carries the peer's ephemeral source port, not its listen port.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        PeerId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<SocketAddr> for PeerId {
    fn from(addr: SocketAddr) -> Self {
        PeerId(addr.to_string())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Advertised network endpoint (host name or IP literal, TCP port).
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host:port`; IPv6 literals must be bracketed (`[::1]:9000`).
    pub fn parse(s: &str) -> Result<Self, EndpointParseError> {
        let s = s.trim();
        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or(EndpointParseError::Malformed)?;
            let port = tail.strip_prefix(':').ok_or(EndpointParseError::MissingPort)?;
            (host, port)
        } else {
            s.rsplit_once(':').ok_or(EndpointParseError::MissingPort)?
        };
        if host.is_empty() {
            return Err(EndpointParseError::MissingHost);
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| EndpointParseError::InvalidPort(port.to_string()))?;
        Ok(Endpoint::new(host, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointParseError {
    #[error("expected host:port")]
    MissingPort,
    #[error("missing host")]
    MissingHost,
    #[error("invalid port: {0}")]
    InvalidPort(String),
    #[error("malformed address")]
    Malformed,
}

/// A user as announced in USER_INFO: contact id, display name, advertised address.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub contact_id: ContactId,
    pub display_name: String,
    pub address: Endpoint,
}

impl UserIdentity {
    /// Build an identity; the contact id is derived from the advertised endpoint.
    pub fn new(display_name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        let address = Endpoint::new(host, port);
        Self {
            contact_id: ContactId::from_endpoint(&address),
            display_name: display_name.into(),
            address,
        }
    }

    /// True when `contact_id` matches the id derived from `address`.
    pub fn is_consistent(&self) -> bool {
        self.contact_id == ContactId::from_endpoint(&self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contact_id_is_derived_from_advertised_endpoint() {
        let user = UserIdentity::new("alice", "10.0.0.5", 9000);
        assert_eq!(user.contact_id.as_str(), "10.0.0.5:9000");
        assert!(user.is_consistent());
    }

    #[test]
    fn tampered_contact_id_is_inconsistent() {
        let mut user = UserIdentity::new("alice", "10.0.0.5", 9000);
        user.contact_id = ContactId::new("10.0.0.5:9001");
        assert!(!user.is_consistent());
    }

    #[test]
    fn peer_id_uses_observed_socket_address() {
        let addr: SocketAddr = "127.0.0.1:53122".parse().unwrap();
        assert_eq!(PeerId::from(addr).as_str(), "127.0.0.1:53122");
    }

    #[test]
    fn endpoint_parse() {
        assert_eq!(
            Endpoint::parse("localhost:9001").unwrap(),
            Endpoint::new("localhost", 9001)
        );
        let v6 = Endpoint::parse("[::1]:9001").unwrap();
        assert_eq!(v6, Endpoint::new("::1", 9001));
        assert_eq!(v6.to_string(), "[::1]:9001");
        assert_eq!(Endpoint::parse("9001"), Err(EndpointParseError::MissingPort));
        assert_eq!(Endpoint::parse(":9001"), Err(EndpointParseError::MissingHost));
        assert!(matches!(
            Endpoint::parse("host:99999"),
            Err(EndpointParseError::InvalidPort(_))
        ));
    }
}
