#![allow(dead_code)]

use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use peerchat_core::wire::{self, LEN_SIZE};
use peerchat_core::{ContactId, MemoryDirectory, Message, MessageEntry};
use peerchat_node::{Config, Node, Presenter};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    Message(ContactId, MessageEntry),
    Online(ContactId),
    Offline(ContactId),
    Error(String),
    Notice(String),
}

#[derive(Default)]
pub struct Recorder {
    seen: Mutex<Vec<Seen>>,
}

impl Recorder {
    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.seen()
            .into_iter()
            .filter_map(|s| match s {
                Seen::Error(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &Seen) -> usize {
        self.seen().iter().filter(|s| *s == wanted).count()
    }

    fn push(&self, s: Seen) {
        self.seen.lock().unwrap().push(s);
    }
}

impl Presenter for Recorder {
    fn on_message(&self, contact: &ContactId, entry: &MessageEntry) {
        self.push(Seen::Message(contact.clone(), entry.clone()));
    }
    fn on_contact_online(&self, contact: &ContactId) {
        self.push(Seen::Online(contact.clone()));
    }
    fn on_contact_offline(&self, contact: &ContactId) {
        self.push(Seen::Offline(contact.clone()));
    }
    fn on_error(&self, message: &str) {
        self.push(Seen::Error(message.to_string()));
    }
    fn on_notice(&self, text: &str) {
        self.push(Seen::Notice(text.to_string()));
    }
}

/// A port nothing is listening on right now.
pub fn free_port() -> u16 {
    let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    l.local_addr().unwrap().port()
}

pub fn config(name: &str, downloads: &Path) -> Config {
    Config {
        display_name: name.to_string(),
        advertise_host: "127.0.0.1".to_string(),
        bind_host: "127.0.0.1".to_string(),
        listen_port: free_port(),
        connect_timeout_secs: 5,
        downloads_dir: downloads.to_path_buf(),
        save_files: true,
    }
}

pub struct TestNode {
    pub node: Node,
    pub seen: Arc<Recorder>,
    pub directory: Arc<MemoryDirectory>,
}

impl TestNode {
    pub fn id(&self) -> ContactId {
        self.node.local().contact_id.clone()
    }

    pub fn port(&self) -> u16 {
        self.node.local().address.port
    }
}

pub async fn start(name: &str, downloads: &Path) -> TestNode {
    start_with(config(name, downloads), Arc::new(MemoryDirectory::new())).await
}

pub async fn start_with(cfg: Config, directory: Arc<MemoryDirectory>) -> TestNode {
    let seen = Arc::new(Recorder::default());
    let node = Node::start(&cfg, seen.clone(), directory.clone())
        .await
        .unwrap();
    TestNode {
        node,
        seen,
        directory,
    }
}

/// Start two nodes and connect `a` to `b`; returns once both sides see each other online.
pub async fn connected_pair(downloads: &Path) -> (TestNode, TestNode) {
    let a = start("alice", downloads).await;
    let b = start("bob", downloads).await;
    a.node.initiate_connection("127.0.0.1", b.port()).await.unwrap();
    let (na, nb, ida, idb) = (a.node.clone(), b.node.clone(), a.id(), b.id());
    eventually(|| {
        let (na, nb, ida, idb) = (na.clone(), nb.clone(), ida.clone(), idb.clone());
        async move { na.is_online(&idb).await && nb.is_online(&ida).await }
    })
    .await;
    (a, b)
}

/// Poll `check` until it holds; panics after `WAIT`.
pub async fn eventually<F, Fut>(check: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not reached within {:?}", WAIT);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn write_message(stream: &mut TcpStream, msg: &Message) {
    let frame = wire::encode_frame(msg).unwrap();
    stream.write_all(&frame).await.unwrap();
}

pub async fn read_message(stream: &mut TcpStream) -> Message {
    let mut prefix = [0u8; LEN_SIZE];
    tokio::time::timeout(WAIT, stream.read_exact(&mut prefix))
        .await
        .unwrap()
        .unwrap();
    let len = wire::frame_len(prefix).unwrap();
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.unwrap();
    wire::decode_body(&body).unwrap()
}

/// True once the remote side has closed the stream.
pub async fn sees_eof(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 64];
    loop {
        match tokio::time::timeout(WAIT, stream.read(&mut buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) => return true,
            Ok(Ok(_)) => continue,
            Err(_) => return false,
        }
    }
}
