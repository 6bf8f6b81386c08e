//! Host-driven session coordinator: the host reports link and message events, the coordinator
//! updates its registries and returns actions (send, close, store, notify) for the host to perform.
//!
//! Registries:
//! - `links`: every open link, keyed by peer id (LINKED or IDENTIFIED).
//! - `contact_to_peer` / `peer_to_contact`: the identified bindings; each is the inverse of the other.
//! - `contacts`: last announced identity per contact.
//! - `sessions`: chat history per (local user, contact); never removed.
//! - `selected`: contact whose history is on display.
//! - `dialing`: endpoints with a dial in flight, so one address is never dialed twice at once.
//!
//! The coordinator is not internally synchronized. The host keeps it behind a single lock so no
//! observer can see a contact bound in `contact_to_peer` but missing from `contacts`.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::identity::{ContactId, PeerId, UserIdentity};
use crate::protocol::{Body, Message};
use crate::session::{ChatSession, MessageEntry, SessionKey};

/// Which side dialed the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Socket open, identity unknown.
    Linked,
    /// Bound to a contact via USER_INFO.
    Identified,
}

/// Notification for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Message {
        contact: ContactId,
        entry: MessageEntry,
    },
    ContactOnline(ContactId),
    ContactOffline(ContactId),
    /// SYSTEM message text, passed through untouched.
    Notice(String),
}

/// Action for the host to perform, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action<L> {
    Send(L, Message),
    Close(L),
    StoreFile {
        from: ContactId,
        name: String,
        bytes: Vec<u8>,
    },
    /// First identification of a contact; host records the relationship in the directory.
    RememberContact(UserIdentity),
    Notify(Event),
}

struct LinkEntry<L> {
    handle: L,
    direction: Direction,
    /// Local USER_INFO already sent on this link.
    announced: bool,
    /// Contact the host meant to reach when dialing.
    expected: Option<ContactId>,
}

pub struct Coordinator<L> {
    local: UserIdentity,
    links: HashMap<PeerId, LinkEntry<L>>,
    contact_to_peer: HashMap<ContactId, PeerId>,
    peer_to_contact: HashMap<PeerId, ContactId>,
    contacts: HashMap<ContactId, UserIdentity>,
    sessions: HashMap<SessionKey, ChatSession>,
    selected: Option<ContactId>,
    dialing: HashSet<ContactId>,
}

impl<L: Clone + PartialEq> Coordinator<L> {
    pub fn new(local: UserIdentity) -> Self {
        Self {
            local,
            links: HashMap::new(),
            contact_to_peer: HashMap::new(),
            peer_to_contact: HashMap::new(),
            contacts: HashMap::new(),
            sessions: HashMap::new(),
            selected: None,
            dialing: HashSet::new(),
        }
    }

    pub fn local(&self) -> &UserIdentity {
        &self.local
    }

    /// Seed the contact list (e.g. from the directory). Known contacts start offline.
    pub fn add_known_contacts(&mut self, users: impl IntoIterator<Item = UserIdentity>) {
        for user in users {
            if user.contact_id != self.local.contact_id {
                self.contacts.insert(user.contact_id.clone(), user);
            }
        }
    }

    /// Reserve `target` before the host opens a socket. The reservation ends with
    /// `on_outbound_link` for the same target or with `abort_dial`.
    pub fn begin_dial(&mut self, target: &ContactId) -> Result<(), StateError> {
        if *target == self.local.contact_id {
            return Err(StateError::SelfConnection);
        }
        if self.contact_to_peer.contains_key(target) {
            return Err(StateError::AlreadyConnected(target.clone()));
        }
        if !self.dialing.insert(target.clone()) {
            return Err(StateError::DialInProgress(target.clone()));
        }
        Ok(())
    }

    /// The dial to `target` failed or was abandoned.
    pub fn abort_dial(&mut self, target: &ContactId) {
        self.dialing.remove(target);
    }

    /// Accepted socket. The link stays LINKED until the peer announces itself.
    pub fn on_inbound_link(&mut self, peer: PeerId, handle: L) -> Vec<Action<L>> {
        let actions = self.drop_link(&peer);
        info!(peer = %peer, "inbound link");
        self.links.insert(
            peer,
            LinkEntry {
                handle,
                direction: Direction::Inbound,
                announced: false,
                expected: None,
            },
        );
        actions
    }

    /// Dialed socket. Returns the handshake: local USER_INFO is always the first message sent.
    pub fn on_outbound_link(
        &mut self,
        peer: PeerId,
        handle: L,
        target: ContactId,
    ) -> Vec<Action<L>> {
        self.dialing.remove(&target);
        let mut actions = self.drop_link(&peer);
        info!(peer = %peer, contact = %target, "outbound link");
        actions.push(Action::Send(
            handle.clone(),
            Message::user_info(self.local.clone()),
        ));
        self.links.insert(
            peer,
            LinkEntry {
                handle,
                direction: Direction::Outbound,
                announced: true,
                expected: Some(target),
            },
        );
        actions
    }

    /// Dispatch one message received on `peer`.
    pub fn on_message(&mut self, peer: &PeerId, msg: Message) -> Vec<Action<L>> {
        if !self.links.contains_key(peer) {
            debug!(peer = %peer, kind = ?msg.kind(), "message on closed link discarded");
            return vec![];
        }
        let kind = msg.kind();
        match msg.body {
            Body::UserInfo(p) => self.on_user_info(peer, p.user),
            Body::System(p) => vec![Action::Notify(Event::Notice(p.text))],
            body => {
                let Some(contact) = self.peer_to_contact.get(peer).cloned() else {
                    debug!(peer = %peer, ?kind, "message on unidentified link discarded");
                    return vec![];
                };
                match body {
                    Body::Connection(_) => vec![Action::Notify(Event::ContactOnline(contact))],
                    Body::Disconnection(_) => {
                        info!(peer = %peer, contact = %contact, "peer disconnected");
                        self.drop_link(peer)
                    }
                    body => self.on_chat_message(
                        contact,
                        Message {
                            timestamp: msg.timestamp,
                            body,
                        },
                    ),
                }
            }
        }
    }

    /// Abrupt loss of the link `handle` (I/O or protocol failure). Safe to call any number of
    /// times. Outbound peer ids repeat across dials to one address, so a report about a
    /// replaced socket is ignored.
    pub fn on_link_lost(&mut self, peer: &PeerId, handle: &L) -> Vec<Action<L>> {
        if !self.is_current_link(peer, handle) {
            debug!(peer = %peer, "link already closed");
            return vec![];
        }
        info!(peer = %peer, "link lost");
        self.drop_link(peer)
    }

    /// True while `handle` is the link registered under `peer`.
    pub fn is_current_link(&self, peer: &PeerId, handle: &L) -> bool {
        self.links.get(peer).is_some_and(|e| e.handle == *handle)
    }

    /// Explicit disconnect: DISCONNECTION best-effort, then local cleanup regardless of the send.
    pub fn disconnect(&mut self, contact: &ContactId) -> Result<Vec<Action<L>>, StateError> {
        let peer = self
            .contact_to_peer
            .get(contact)
            .cloned()
            .ok_or_else(|| StateError::NotConnected(contact.clone()))?;
        let mut actions = Vec::new();
        if let Some(entry) = self.links.get(&peer) {
            actions.push(Action::Send(
                entry.handle.clone(),
                Message::disconnection(self.local.clone()),
            ));
        }
        actions.extend(self.drop_link(&peer));
        Ok(actions)
    }

    /// The identified link for `contact`, for a caller about to send on it.
    pub fn link_for(&self, contact: &ContactId) -> Result<(PeerId, L), StateError> {
        let peer = self
            .contact_to_peer
            .get(contact)
            .ok_or_else(|| StateError::NotConnected(contact.clone()))?;
        let entry = self
            .links
            .get(peer)
            .ok_or_else(|| StateError::NotConnected(contact.clone()))?;
        Ok((peer.clone(), entry.handle.clone()))
    }

    /// Record a message the host has just sent to `contact`. History is appended before the
    /// notification is returned.
    pub fn record_sent(
        &mut self,
        contact: &ContactId,
        message: Message,
    ) -> (MessageEntry, Vec<Action<L>>) {
        let entry = MessageEntry::new(self.local.clone(), message);
        self.session_mut(contact).append(entry.clone());
        let notify = Action::Notify(Event::Message {
            contact: contact.clone(),
            entry: entry.clone(),
        });
        (entry, vec![notify])
    }

    /// Put `contact` on display. Requires a live identified link.
    pub fn select_contact(&mut self, contact: &ContactId) -> Result<Vec<MessageEntry>, StateError> {
        if !self.contact_to_peer.contains_key(contact) {
            return Err(StateError::NoActiveConnection(contact.clone()));
        }
        self.selected = Some(contact.clone());
        Ok(self.session_mut(contact).history().to_vec())
    }

    /// Tear down every link (process shutdown).
    pub fn close_all(&mut self) -> Vec<Action<L>> {
        let peers: Vec<PeerId> = self.links.keys().cloned().collect();
        peers.iter().flat_map(|p| self.drop_link(p)).collect()
    }

    pub fn is_online(&self, contact: &ContactId) -> bool {
        self.contact_to_peer.contains_key(contact)
    }

    pub fn peer_for(&self, contact: &ContactId) -> Option<&PeerId> {
        self.contact_to_peer.get(contact)
    }

    pub fn contact_for(&self, peer: &PeerId) -> Option<&ContactId> {
        self.peer_to_contact.get(peer)
    }

    pub fn link_state(&self, peer: &PeerId) -> Option<LinkState> {
        self.links.get(peer).map(|_| {
            if self.peer_to_contact.contains_key(peer) {
                LinkState::Identified
            } else {
                LinkState::Linked
            }
        })
    }

    pub fn contact(&self, contact: &ContactId) -> Option<&UserIdentity> {
        self.contacts.get(contact)
    }

    /// Known contacts with their online flag, sorted by contact id.
    pub fn contacts(&self) -> Vec<(UserIdentity, bool)> {
        let mut out: Vec<_> = self
            .contacts
            .values()
            .map(|u| (u.clone(), self.is_online(&u.contact_id)))
            .collect();
        out.sort_by(|a, b| a.0.contact_id.cmp(&b.0.contact_id));
        out
    }

    pub fn session(&self, contact: &ContactId) -> Option<&ChatSession> {
        self.sessions
            .get(&SessionKey::new(&self.local.contact_id, contact))
    }

    pub fn selected_contact(&self) -> Option<&ContactId> {
        self.selected.as_ref()
    }

    pub fn live_links(&self) -> Vec<L> {
        self.links.values().map(|e| e.handle.clone()).collect()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    fn session_mut(&mut self, contact: &ContactId) -> &mut ChatSession {
        self.sessions
            .entry(SessionKey::new(&self.local.contact_id, contact))
            .or_insert_with(|| ChatSession::new(contact.clone()))
    }

    fn on_user_info(&mut self, peer: &PeerId, user: UserIdentity) -> Vec<Action<L>> {
        if !user.is_consistent() || user.contact_id == self.local.contact_id {
            warn!(peer = %peer, contact = %user.contact_id, "rejecting invalid identity announcement");
            return self.drop_link(peer);
        }
        let contact = user.contact_id.clone();
        let mut actions = Vec::new();

        if let Some(expected) = self.links.get(peer).and_then(|e| e.expected.as_ref()) {
            if *expected != contact {
                warn!(peer = %peer, expected = %expected, announced = %contact, "peer announced a different identity than dialed");
            }
        }

        // Same link re-announcing under another identity: release the old binding first.
        if let Some(previous) = self.peer_to_contact.get(peer).cloned() {
            if previous != contact {
                self.unbind(&previous);
                actions.push(Action::Notify(Event::ContactOffline(previous)));
            }
        }

        let was_online = match self.contact_to_peer.get(&contact).cloned() {
            Some(existing) if existing == *peer => true,
            Some(existing) => {
                if self.keep_new_link(&existing, peer, &contact) {
                    info!(contact = %contact, old = %existing, new = %peer, "newer link supersedes existing one");
                    self.peer_to_contact.remove(&existing);
                    if let Some(old) = self.links.remove(&existing) {
                        actions.push(Action::Close(old.handle));
                    }
                    true
                } else {
                    info!(contact = %contact, kept = %existing, dropped = %peer, "keeping existing link for contact");
                    if let Some(new) = self.links.remove(peer) {
                        actions.push(Action::Close(new.handle));
                    }
                    return actions;
                }
            }
            None => false,
        };

        self.contact_to_peer.insert(contact.clone(), peer.clone());
        self.peer_to_contact.insert(peer.clone(), contact.clone());
        let first_seen = self.contacts.insert(contact.clone(), user.clone()).is_none();
        self.session_mut(&contact);

        if let Some(entry) = self.links.get_mut(peer) {
            if !entry.announced {
                entry.announced = true;
                actions.push(Action::Send(
                    entry.handle.clone(),
                    Message::user_info(self.local.clone()),
                ));
            }
        }
        if first_seen {
            actions.push(Action::RememberContact(user));
        }
        if !was_online {
            info!(peer = %peer, contact = %contact, "contact identified");
            actions.push(Action::Notify(Event::ContactOnline(contact)));
        }
        actions
    }

    fn on_chat_message(&mut self, contact: ContactId, message: Message) -> Vec<Action<L>> {
        let Some(sender) = self.contacts.get(&contact).cloned() else {
            warn!(contact = %contact, "bound contact has no identity; message dropped");
            return vec![];
        };
        let mut actions = Vec::new();
        if let Body::File(file) = &message.body {
            actions.push(Action::StoreFile {
                from: contact.clone(),
                name: file.name.clone(),
                bytes: file.bytes.clone(),
            });
        }
        let entry = MessageEntry::new(sender, message);
        self.session_mut(&contact).append(entry.clone());
        if self.selected.as_ref() == Some(&contact) {
            actions.push(Action::Notify(Event::Message { contact, entry }));
        }
        actions
    }

    /// Duplicate-link policy. Same direction: the newer link wins (a reconnect). Opposite
    /// directions (both sides dialed): keep the link dialed by the lower contact id, so both
    /// peers pick the same socket.
    fn keep_new_link(&self, existing: &PeerId, new: &PeerId, contact: &ContactId) -> bool {
        let (Some(old), Some(new)) = (self.links.get(existing), self.links.get(new)) else {
            return true;
        };
        if old.direction == new.direction {
            return true;
        }
        let local_is_lower = self.local.contact_id < *contact;
        (new.direction == Direction::Outbound) == local_is_lower
    }

    fn unbind(&mut self, contact: &ContactId) {
        if let Some(peer) = self.contact_to_peer.remove(contact) {
            self.peer_to_contact.remove(&peer);
        }
        if self.selected.as_ref() == Some(contact) {
            self.selected = None;
        }
    }

    /// Remove `peer` from every live registry. History is kept.
    fn drop_link(&mut self, peer: &PeerId) -> Vec<Action<L>> {
        let Some(entry) = self.links.remove(peer) else {
            return vec![];
        };
        let mut actions = vec![Action::Close(entry.handle)];
        if let Some(contact) = self.peer_to_contact.get(peer).cloned() {
            self.unbind(&contact);
            actions.push(Action::Notify(Event::ContactOffline(contact)));
        }
        actions
    }
}

/// Operation on an unknown or unidentified contact. No registry was changed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("not connected to {0}")]
    NotConnected(ContactId),
    #[error("no active connection with {0}")]
    NoActiveConnection(ContactId),
    #[error("already connected to {0}")]
    AlreadyConnected(ContactId),
    #[error("already connecting to {0}")]
    DialInProgress(ContactId),
    #[error("cannot connect to the local user")]
    SelfConnection,
}
