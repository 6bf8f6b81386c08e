//! Node: runs the listener, dials peers, drives one receive loop per link and executes the
//! coordinator's actions. All session state lives behind a single coordinator lock; socket
//! I/O always happens outside it.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use peerchat_core::{
    Action, ContactId, Coordinator, Endpoint, LinkState, Message, MessageEntry, PeerId,
    StateError, UserDirectory, UserIdentity,
};
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::connector::{self, ConnectError};
use crate::downloads::Downloads;
use crate::link::{wait_closed, LinkError, PeerLink};
use crate::listener::{InboundListener, ListenerError};
use crate::presenter::{self, Presenter};

pub type Link = Arc<PeerLink>;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error("cannot read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("node is shutting down")]
    ShuttingDown,
}

/// Handle to a running node. Cheap to clone.
#[derive(Clone)]
pub struct Node {
    inner: Arc<Inner>,
}

struct Inner {
    local: UserIdentity,
    local_addr: SocketAddr,
    core: Mutex<Coordinator<Link>>,
    presenter: Arc<dyn Presenter>,
    directory: Arc<dyn UserDirectory>,
    downloads: Option<Downloads>,
    connect_timeout: Duration,
    receive_loops: Mutex<JoinSet<()>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    stopping: watch::Sender<bool>,
}

impl Node {
    /// Bind the listener and start accepting. The directory is consulted best-effort: the local
    /// user is registered and known contacts are loaded, failures are logged.
    pub async fn start(
        config: &Config,
        presenter: Arc<dyn Presenter>,
        directory: Arc<dyn UserDirectory>,
    ) -> Result<Node, NodeError> {
        let local = config.local_identity();
        let listener = match InboundListener::bind(&config.bind_host, config.listen_port).await {
            Ok(l) => l,
            Err(e) => {
                presenter.on_error(&e.to_string());
                return Err(e.into());
            }
        };

        let mut core = Coordinator::new(local.clone());
        if let Err(e) = directory.register_user(&local) {
            warn!(error = %e, "cannot register local user");
        }
        match directory.contacts_of(&local.contact_id) {
            Ok(known) => core.add_known_contacts(known),
            Err(e) => warn!(error = %e, "cannot load contacts"),
        }

        let (stopping, stop_rx) = watch::channel(false);
        let inner = Arc::new(Inner {
            local: local.clone(),
            local_addr: listener.local_addr(),
            core: Mutex::new(core),
            presenter,
            directory,
            downloads: config
                .save_files
                .then(|| Downloads::new(config.downloads_dir.clone())),
            connect_timeout: config.connect_timeout(),
            receive_loops: Mutex::new(JoinSet::new()),
            accept_task: Mutex::new(None),
            stopping,
        });
        let task = tokio::spawn(inner.clone().accept_loop(listener, stop_rx));
        *inner.accept_task.lock().await = Some(task);
        info!(contact = %local.contact_id, name = %local.display_name, "node started");
        Ok(Node { inner })
    }

    pub fn local(&self) -> &UserIdentity {
        &self.inner.local
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Dial `host:port`, send the local USER_INFO and start the link's receive loop.
    /// Returns once the link is registered; the contact comes online when the peer answers.
    pub async fn initiate_connection(&self, host: &str, port: u16) -> Result<PeerId, NodeError> {
        let r = self.inner.dial(host, port).await;
        self.inner.report(r)
    }

    /// `initiate_connection` in the background, for callers that must not wait on the dial.
    pub fn spawn_connect(
        &self,
        host: impl Into<String>,
        port: u16,
    ) -> JoinHandle<Result<PeerId, NodeError>> {
        let node = self.clone();
        let host = host.into();
        tokio::spawn(async move { node.initiate_connection(&host, port).await })
    }

    /// Announce DISCONNECTION, close the link and mark the contact offline.
    pub async fn disconnect(&self, contact: &ContactId) -> Result<(), NodeError> {
        let r = self.inner.core.lock().await.disconnect(contact);
        let actions = self.inner.report(r.map_err(NodeError::from))?;
        self.inner.perform(actions).await;
        Ok(())
    }

    pub async fn send_text(
        &self,
        contact: &ContactId,
        text: impl Into<String>,
    ) -> Result<MessageEntry, NodeError> {
        let r = self.inner.send(contact, Message::text(text)).await;
        self.inner.report(r)
    }

    pub async fn send_file(
        &self,
        contact: &ContactId,
        name: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Result<MessageEntry, NodeError> {
        let r = self.inner.send(contact, Message::file(name, bytes)).await;
        self.inner.report(r)
    }

    /// Read a local file and send it under its own file name.
    pub async fn send_file_from_path(
        &self,
        contact: &ContactId,
        path: &Path,
    ) -> Result<MessageEntry, NodeError> {
        let r = match tokio::fs::read(path).await {
            Ok(bytes) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                self.inner.send(contact, Message::file(name, bytes)).await
            }
            Err(source) => Err(NodeError::ReadFile {
                path: path.to_path_buf(),
                source,
            }),
        };
        self.inner.report(r)
    }

    /// Make `contact` the displayed conversation and return its history.
    pub async fn select_contact(&self, contact: &ContactId) -> Result<Vec<MessageEntry>, NodeError> {
        let r = self.inner.core.lock().await.select_contact(contact);
        self.inner.report(r.map_err(NodeError::from))
    }

    pub async fn selected_contact(&self) -> Option<ContactId> {
        self.inner.core.lock().await.selected_contact().cloned()
    }

    pub async fn is_online(&self, contact: &ContactId) -> bool {
        self.inner.core.lock().await.is_online(contact)
    }

    pub async fn peer_for(&self, contact: &ContactId) -> Option<PeerId> {
        self.inner.core.lock().await.peer_for(contact).cloned()
    }

    pub async fn contact_for(&self, peer: &PeerId) -> Option<ContactId> {
        self.inner.core.lock().await.contact_for(peer).cloned()
    }

    pub async fn link_state(&self, peer: &PeerId) -> Option<LinkState> {
        self.inner.core.lock().await.link_state(peer)
    }

    /// Known contacts with their presence, sorted by contact id.
    pub async fn contacts(&self) -> Vec<(UserIdentity, bool)> {
        self.inner.core.lock().await.contacts()
    }

    pub async fn history(&self, contact: &ContactId) -> Vec<MessageEntry> {
        self.inner
            .core
            .lock()
            .await
            .session(contact)
            .map(|s| s.history().to_vec())
            .unwrap_or_default()
    }

    pub async fn link_count(&self) -> usize {
        self.inner.core.lock().await.link_count()
    }

    /// Stop accepting, close every link and wait for all receive loops to finish.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner.stopping.send_replace(true);
        let accept = inner.accept_task.lock().await.take();
        if let Some(task) = accept {
            if let Err(e) = task.await {
                warn!(error = %e, "accept task failed");
            }
        }
        let actions = inner.core.lock().await.close_all();
        inner.perform(actions).await;
        loop {
            let mut loops = std::mem::take(&mut *inner.receive_loops.lock().await);
            if loops.is_empty() {
                break;
            }
            while let Some(res) = loops.join_next().await {
                if let Err(e) = res {
                    warn!(error = %e, "receive loop failed");
                }
            }
        }
        info!("node stopped");
    }
}

impl Inner {
    fn is_stopping(&self) -> bool {
        *self.stopping.borrow()
    }

    /// Errors from user-initiated operations are shown once and handed back to the caller.
    fn report<T>(&self, r: Result<T, NodeError>) -> Result<T, NodeError> {
        if let Err(e) = &r {
            self.presenter.on_error(&e.to_string());
        }
        r
    }

    async fn accept_loop(self: Arc<Self>, listener: InboundListener, mut stop: watch::Receiver<bool>) {
        loop {
            let accepted = tokio::select! {
                _ = wait_closed(&mut stop) => break,
                r = listener.accept_link() => r,
            };
            match accepted {
                Ok(link) => self.register_inbound(Arc::new(link)).await,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
        debug!("accept loop stopped");
    }

    async fn register_inbound(self: &Arc<Self>, link: Link) {
        let peer = link.peer_id().clone();
        let actions = {
            let mut core = self.core.lock().await;
            if self.is_stopping() {
                None
            } else {
                Some(core.on_inbound_link(peer, link.clone()))
            }
        };
        let Some(actions) = actions else {
            link.close().await;
            return;
        };
        self.spawn_receive_loop(link).await;
        self.perform(actions).await;
    }

    async fn dial(self: &Arc<Self>, host: &str, port: u16) -> Result<PeerId, NodeError> {
        if self.is_stopping() {
            return Err(NodeError::ShuttingDown);
        }
        let target = ContactId::from_endpoint(&Endpoint::new(host, port));
        self.core.lock().await.begin_dial(&target)?;
        let link = match connector::connect(host, port, self.connect_timeout).await {
            Ok(link) => Arc::new(link),
            Err(e) => {
                self.core.lock().await.abort_dial(&target);
                return Err(e.into());
            }
        };
        let peer = link.peer_id().clone();
        let actions = {
            let mut core = self.core.lock().await;
            if self.is_stopping() {
                core.abort_dial(&target);
                None
            } else {
                Some(core.on_outbound_link(peer.clone(), link.clone(), target))
            }
        };
        let Some(actions) = actions else {
            link.close().await;
            return Err(NodeError::ShuttingDown);
        };
        self.spawn_receive_loop(link).await;
        self.perform(actions).await;
        Ok(peer)
    }

    /// History records user sends in the order their frames went out on the link.
    async fn send(&self, contact: &ContactId, msg: Message) -> Result<MessageEntry, NodeError> {
        let (peer, link) = self.core.lock().await.link_for(contact)?;
        let turn = link.send_turn().await;
        if let Err(e) = link.send(&msg).await {
            drop(turn);
            if e.is_terminal() {
                link.close().await;
                self.link_lost(&peer, &link).await;
            }
            return Err(e.into());
        }
        let (entry, actions) = self.core.lock().await.record_sent(contact, msg);
        drop(turn);
        self.perform(actions).await;
        Ok(entry)
    }

    async fn spawn_receive_loop(self: &Arc<Self>, link: Link) {
        let mut loops = self.receive_loops.lock().await;
        while loops.try_join_next().is_some() {}
        loops.spawn(self.clone().receive_loop(link));
    }

    /// One per link. Messages on a link are handled strictly in arrival order.
    async fn receive_loop(self: Arc<Self>, link: Link) {
        let peer = link.peer_id().clone();
        loop {
            match link.receive().await {
                Ok(msg) => {
                    let actions = {
                        let mut core = self.core.lock().await;
                        if !core.is_current_link(&peer, &link) {
                            debug!(peer = %peer, "message on replaced link discarded");
                            break;
                        }
                        core.on_message(&peer, msg)
                    };
                    self.perform(actions).await;
                }
                Err(LinkError::Closed) => {
                    debug!(peer = %peer, "link closed");
                    break;
                }
                Err(e) => {
                    info!(peer = %peer, error = %e, "link lost");
                    break;
                }
            }
        }
        link.close().await;
        self.link_lost(&peer, &link).await;
    }

    async fn link_lost(&self, peer: &PeerId, link: &Link) {
        let actions = self.core.lock().await.on_link_lost(peer, link);
        self.perform(actions).await;
    }

    /// Execute actions in order. A failed send turns into link loss, whose actions are queued
    /// behind the remaining ones.
    async fn perform(&self, actions: Vec<Action<Link>>) {
        let mut queue: VecDeque<Action<Link>> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                Action::Send(link, msg) => {
                    if let Err(e) = link.send(&msg).await {
                        warn!(peer = %link.peer_id(), kind = ?msg.kind(), error = %e, "send failed");
                        if e.is_terminal() {
                            link.close().await;
                            let lost = self.core.lock().await.on_link_lost(link.peer_id(), &link);
                            queue.extend(lost);
                        }
                    }
                }
                Action::Close(link) => link.close().await,
                Action::StoreFile { from, name, bytes } => self.store_file(&from, &name, &bytes).await,
                Action::RememberContact(user) => self.remember(&user),
                Action::Notify(event) => presenter::dispatch(self.presenter.as_ref(), &event),
            }
        }
    }

    async fn store_file(&self, from: &ContactId, name: &str, bytes: &[u8]) {
        let Some(downloads) = &self.downloads else {
            return;
        };
        match downloads.save(name, bytes).await {
            Ok(path) => info!(contact = %from, path = %path.display(), "file saved"),
            Err(e) => self
                .presenter
                .on_error(&format!("cannot save file {} from {}: {}", name, from, e)),
        }
    }

    fn remember(&self, user: &UserIdentity) {
        let r = self.directory.register_user(user).and_then(|()| {
            self.directory
                .add_contact_relationship(&self.local.contact_id, &user.contact_id)
        });
        if let Err(e) = r {
            warn!(contact = %user.contact_id, error = %e, "cannot record contact");
        }
    }
}
