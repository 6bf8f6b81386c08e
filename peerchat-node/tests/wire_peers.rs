//! A node talking to hand-driven sockets: handshake order, abrupt loss, malformed input,
//! file delivery and startup failures.

mod common;

use std::sync::Arc;

use common::{config, eventually, read_message, sees_eof, start, start_with, write_message, Seen};
use peerchat_core::{Body, ContactId, MemoryDirectory, Message, UserDirectory, UserIdentity};
use peerchat_node::{ConnectError, ListenerError, Node, NodeError};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

fn fake_peer(port: u16) -> UserIdentity {
    UserIdentity::new("mallory", "127.0.0.1", port)
}

/// Connect a raw socket to `port` and complete the handshake as `who`.
async fn handshake(port: u16, who: &UserIdentity) -> TcpStream {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    write_message(&mut stream, &Message::user_info(who.clone())).await;
    let reply = read_message(&mut stream).await;
    assert!(matches!(reply.body, Body::UserInfo(_)));
    stream
}

#[tokio::test]
async fn inbound_link_waits_for_the_peer_to_speak_first() {
    let dir = tempfile::tempdir().unwrap();
    let a = start("alice", dir.path()).await;
    let who = fake_peer(common::free_port());

    let mut stream = TcpStream::connect(("127.0.0.1", a.port())).await.unwrap();
    eventually(|| async { a.node.link_count().await == 1 }).await;
    assert!(a.node.contacts().await.is_empty());

    write_message(&mut stream, &Message::user_info(who.clone())).await;
    match read_message(&mut stream).await.body {
        Body::UserInfo(p) => assert_eq!(p.user, a.node.local().clone()),
        other => panic!("expected USER_INFO, got {:?}", other.kind()),
    }
    eventually(|| async { a.node.is_online(&who.contact_id).await }).await;
}

#[tokio::test]
async fn dialing_sends_user_info_first() {
    let dir = tempfile::tempdir().unwrap();
    let a = start("alice", dir.path()).await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    a.node.initiate_connection("127.0.0.1", port).await.unwrap();
    let (mut stream, _) = listener.accept().await.unwrap();
    match read_message(&mut stream).await.body {
        Body::UserInfo(p) => assert_eq!(p.user.contact_id, a.id()),
        other => panic!("expected USER_INFO, got {:?}", other.kind()),
    }
    // Linked, not yet identified.
    assert!(!a.node.is_online(&ContactId::new(format!("127.0.0.1:{}", port))).await);

    write_message(&mut stream, &Message::user_info(fake_peer(port))).await;
    eventually(|| async { a.node.is_online(&fake_peer(port).contact_id).await }).await;
}

#[tokio::test]
async fn abrupt_loss_marks_offline_and_keeps_history() {
    let dir = tempfile::tempdir().unwrap();
    let a = start("alice", dir.path()).await;
    let who = fake_peer(common::free_port());
    let mut stream = handshake(a.port(), &who).await;
    eventually(|| async { a.node.is_online(&who.contact_id).await }).await;
    a.node.select_contact(&who.contact_id).await.unwrap();

    write_message(&mut stream, &Message::text("before the crash")).await;
    eventually(|| async { a.node.history(&who.contact_id).await.len() == 1 }).await;

    drop(stream);
    eventually(|| async { !a.node.is_online(&who.contact_id).await }).await;
    eventually(|| async { a.node.link_count().await == 0 }).await;
    assert_eq!(a.node.selected_contact().await, None);
    assert_eq!(a.node.history(&who.contact_id).await.len(), 1);
    assert_eq!(a.seen.count(&Seen::Offline(who.contact_id.clone())), 1);

    let err = a.node.send_text(&who.contact_id, "hello?").await.unwrap_err();
    assert!(matches!(err, NodeError::State(_)));
}

#[tokio::test]
async fn malformed_frame_drops_the_link() {
    let dir = tempfile::tempdir().unwrap();
    let a = start("alice", dir.path()).await;
    let who = fake_peer(common::free_port());
    let mut stream = handshake(a.port(), &who).await;
    eventually(|| async { a.node.is_online(&who.contact_id).await }).await;

    // Declared length 2, unknown tag 77.
    stream.write_all(&[0, 0, 0, 2, 77, 0]).await.unwrap();
    assert!(sees_eof(&mut stream).await);
    eventually(|| async { !a.node.is_online(&who.contact_id).await }).await;
}

#[tokio::test]
async fn chat_before_identification_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let a = start("alice", dir.path()).await;
    let who = fake_peer(common::free_port());
    let mut stream = TcpStream::connect(("127.0.0.1", a.port())).await.unwrap();
    write_message(&mut stream, &Message::text("who am i")).await;
    write_message(&mut stream, &Message::user_info(who.clone())).await;
    let _ = read_message(&mut stream).await;
    eventually(|| async { a.node.is_online(&who.contact_id).await }).await;
    assert!(a.node.history(&who.contact_id).await.is_empty());
}

#[tokio::test]
async fn forged_or_self_identity_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let a = start("alice", dir.path()).await;

    let mut forged = fake_peer(common::free_port());
    forged.contact_id = ContactId::new("10.9.9.9:1");
    let mut stream = TcpStream::connect(("127.0.0.1", a.port())).await.unwrap();
    write_message(&mut stream, &Message::user_info(forged)).await;
    assert!(sees_eof(&mut stream).await);

    let mut stream = TcpStream::connect(("127.0.0.1", a.port())).await.unwrap();
    write_message(&mut stream, &Message::user_info(a.node.local().clone())).await;
    assert!(sees_eof(&mut stream).await);

    eventually(|| async { a.node.link_count().await == 0 }).await;
    assert!(a.node.contacts().await.is_empty());
}

#[tokio::test]
async fn system_messages_become_notices() {
    let dir = tempfile::tempdir().unwrap();
    let a = start("alice", dir.path()).await;
    let who = fake_peer(common::free_port());
    let mut stream = handshake(a.port(), &who).await;
    write_message(&mut stream, &Message::system("maintenance at noon")).await;
    eventually(|| async {
        a.seen.count(&Seen::Notice("maintenance at noon".to_string())) == 1
    })
    .await;
}

#[tokio::test]
async fn received_files_are_saved_without_overwriting() {
    let dir = tempfile::tempdir().unwrap();
    let inbox = dir.path().join("inbox");
    let a = start("alice", &inbox).await;
    let who = fake_peer(common::free_port());
    let mut stream = handshake(a.port(), &who).await;

    write_message(&mut stream, &Message::file("notes.txt", b"one".to_vec())).await;
    write_message(&mut stream, &Message::file("../notes.txt", b"two".to_vec())).await;
    eventually(|| async { a.node.history(&who.contact_id).await.len() == 2 }).await;
    eventually(|| async { inbox.join("notes_1.txt").exists() }).await;
    eventually(|| async { std::fs::read(inbox.join("notes_1.txt")).unwrap_or_default() == b"two" })
        .await;
    assert_eq!(std::fs::read(inbox.join("notes.txt")).unwrap(), b"one");
    assert!(!dir.path().join("notes.txt").exists());
}

#[tokio::test]
async fn files_travel_between_nodes() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b) = common::connected_pair(dir.path()).await;
    let src = dir.path().join("report.bin");
    std::fs::write(&src, [7u8; 1024]).unwrap();

    let entry = a.node.send_file_from_path(&b.id(), &src).await.unwrap();
    match &entry.message.body {
        Body::File(f) => assert_eq!(f.name, "report.bin"),
        other => panic!("expected FILE, got {:?}", other.kind()),
    }
    // Sender and receiver share the downloads dir here, so the copy gets a suffix.
    eventually(|| async { dir.path().join("report_1.bin").exists() }).await;

    let missing = dir.path().join("absent.bin");
    let err = a.node.send_file_from_path(&b.id(), &missing).await.unwrap_err();
    assert!(matches!(err, NodeError::ReadFile { .. }));
}

#[tokio::test]
async fn known_contacts_are_loaded_at_startup() {
    let dir = tempfile::tempdir().unwrap();
    let directory = Arc::new(MemoryDirectory::new());
    let cfg = config("alice", dir.path());
    let local = cfg.local_identity();
    let friend = UserIdentity::new("bob", "127.0.0.1", 6553);
    directory.register_user(&local).unwrap();
    directory.register_user(&friend).unwrap();
    directory
        .add_contact_relationship(&local.contact_id, &friend.contact_id)
        .unwrap();

    let a = start_with(cfg, directory).await;
    assert_eq!(a.node.contacts().await, vec![(friend, false)]);
}

#[tokio::test]
async fn startup_rejects_bad_ports() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config("alice", dir.path());
    cfg.listen_port = 80;
    let err = Node::start(
        &cfg,
        Arc::new(common::Recorder::default()),
        Arc::new(MemoryDirectory::new()),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(
        err,
        NodeError::Listener(ListenerError::PortOutOfRange(80))
    ));

    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    cfg.listen_port = taken.local_addr().unwrap().port();
    let err = Node::start(
        &cfg,
        Arc::new(common::Recorder::default()),
        Arc::new(MemoryDirectory::new()),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(err, NodeError::Listener(ListenerError::Bind { .. })));
}

#[tokio::test]
async fn refused_dial_is_reported_once() {
    let dir = tempfile::tempdir().unwrap();
    let a = start("alice", dir.path()).await;
    let port = common::free_port();
    let err = a
        .node
        .initiate_connection("127.0.0.1", port)
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::Connect(ConnectError::Refused(_))));
    assert_eq!(a.seen.errors().len(), 1);
    assert_eq!(a.node.link_count().await, 0);
}
