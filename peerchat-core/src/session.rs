//! Chat sessions: append-only message history per (local user, contact) pair.

use crate::identity::{ContactId, UserIdentity};
use crate::protocol::{Message, Timestamp};

/// Session registry key.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct SessionKey {
    pub local: ContactId,
    pub contact: ContactId,
}

impl SessionKey {
    pub fn new(local: &ContactId, contact: &ContactId) -> Self {
        Self {
            local: local.clone(),
            contact: contact.clone(),
        }
    }
}

/// One history line. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEntry {
    pub sender: UserIdentity,
    pub message: Message,
    pub timestamp: Timestamp,
}

impl MessageEntry {
    pub fn new(sender: UserIdentity, message: Message) -> Self {
        let timestamp = message.timestamp;
        Self {
            sender,
            message,
            timestamp,
        }
    }
}

/// Ordered history with one contact. Outlives every connection to that contact.
#[derive(Debug, Clone)]
pub struct ChatSession {
    contact_id: ContactId,
    history: Vec<MessageEntry>,
}

impl ChatSession {
    pub fn new(contact_id: ContactId) -> Self {
        Self {
            contact_id,
            history: Vec::new(),
        }
    }

    pub fn contact_id(&self) -> &ContactId {
        &self.contact_id
    }

    pub fn append(&mut self, entry: MessageEntry) {
        self.history.push(entry);
    }

    pub fn history(&self) -> &[MessageEntry] {
        &self.history
    }

    pub fn last(&self) -> Option<&MessageEntry> {
        self.history.last()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}
