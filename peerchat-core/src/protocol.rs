//! PeerChat wire protocol: message kinds and payloads.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::identity::UserIdentity;

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

pub fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(0)
}

/// Type tag written after the length prefix of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Text = 1,
    File = 2,
    System = 3,
    UserInfo = 4,
    Connection = 5,
    Disconnection = 6,
}

impl MessageKind {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(MessageKind::Text),
            2 => Some(MessageKind::File),
            3 => Some(MessageKind::System),
            4 => Some(MessageKind::UserInfo),
            5 => Some(MessageKind::Connection),
            6 => Some(MessageKind::Disconnection),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextPayload {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePayload {
    pub name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemPayload {
    pub text: String,
}

/// Identity announcement; the first message on every outbound link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfoPayload {
    pub user: UserIdentity,
}

/// CONNECTION / DISCONNECTION carry only the sender's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresencePayload {
    pub sender: UserIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Text(TextPayload),
    File(FilePayload),
    System(SystemPayload),
    UserInfo(UserInfoPayload),
    Connection(PresencePayload),
    Disconnection(PresencePayload),
}

impl Body {
    pub fn kind(&self) -> MessageKind {
        match self {
            Body::Text(_) => MessageKind::Text,
            Body::File(_) => MessageKind::File,
            Body::System(_) => MessageKind::System,
            Body::UserInfo(_) => MessageKind::UserInfo,
            Body::Connection(_) => MessageKind::Connection,
            Body::Disconnection(_) => MessageKind::Disconnection,
        }
    }
}

/// One protocol message. Encoding is tag + bincode; framing is length-prefix (see wire module).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub timestamp: Timestamp,
    pub body: Body,
}

impl Message {
    pub fn new(body: Body) -> Self {
        Self {
            timestamp: now_millis(),
            body,
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::new(Body::Text(TextPayload {
            content: content.into(),
        }))
    }

    pub fn file(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::new(Body::File(FilePayload {
            name: name.into(),
            bytes,
        }))
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Body::System(SystemPayload { text: text.into() }))
    }

    pub fn user_info(user: UserIdentity) -> Self {
        Self::new(Body::UserInfo(UserInfoPayload { user }))
    }

    pub fn connection(sender: UserIdentity) -> Self {
        Self::new(Body::Connection(PresencePayload { sender }))
    }

    pub fn disconnection(sender: UserIdentity) -> Self {
        Self::new(Body::Disconnection(PresencePayload { sender }))
    }

    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }
}
