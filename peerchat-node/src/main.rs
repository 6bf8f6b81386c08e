// PeerChat console node: listens for peers, dials on request, chats over plain TCP.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use peerchat_core::{ContactId, MemoryDirectory};
use peerchat_node::console::{parse_command, Command, HELP};
use peerchat_node::presenter::render_entry;
use peerchat_node::{config, ConsolePresenter, Node};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "peerchat", version, about = "Peer-to-peer chat over TCP")]
struct Cli {
    /// Config file (default: ~/.config/peerchat/config.toml, then /etc/peerchat/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,
    /// Display name announced to peers
    #[arg(short, long)]
    name: Option<String>,
    /// Host announced to peers
    #[arg(long)]
    host: Option<String>,
    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let mut cfg = match &cli.config {
        Some(path) => config::load_from(path)?,
        None => config::load(),
    };
    if let Some(p) = cli.port {
        cfg.listen_port = p;
    }
    if let Some(n) = cli.name {
        cfg.display_name = n;
    }
    if let Some(h) = cli.host {
        cfg.advertise_host = h;
    }
    debug!(?cfg, "configuration");

    let node = Node::start(
        &cfg,
        Arc::new(ConsolePresenter),
        Arc::new(MemoryDirectory::new()),
    )
    .await
    .context("cannot start node")?;
    println!(
        "{} listening as {} (type /help)",
        node.local().display_name,
        node.local().contact_id
    );

    tokio::select! {
        r = run_console(&node) => r?,
        r = shutdown_signal() => r?,
    }
    node.shutdown().await;
    Ok(())
}

fn setup_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Read commands until /quit or end of input. Operation errors are already shown by the
/// presenter, so they do not end the loop.
async fn run_console(node: &Node) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let cmd = match parse_command(&line) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };
        match cmd {
            Command::Empty => {}
            Command::Quit => break,
            Command::Help => println!("{}", HELP),
            Command::Connect(ep) => {
                // Dial in the background so the prompt stays responsive.
                let _ = node.spawn_connect(ep.host, ep.port);
            }
            Command::Select(contact) => {
                if let Ok(history) = node.select_contact(&contact).await {
                    println!("-- {} --", contact);
                    for entry in &history {
                        println!("{}", render_entry(entry));
                    }
                }
            }
            Command::History => match node.selected_contact().await {
                Some(contact) => {
                    for entry in node.history(&contact).await {
                        println!("{}", render_entry(&entry));
                    }
                }
                None => eprintln!("no contact selected"),
            },
            Command::Contacts => {
                for (user, online) in node.contacts().await {
                    let mark = if online { "online" } else { "offline" };
                    println!("{} {} ({})", user.contact_id, user.display_name, mark);
                }
            }
            Command::Disconnect(target) => {
                if let Some(contact) = target_or_selected(node, target).await {
                    let _ = node.disconnect(&contact).await;
                }
            }
            Command::SendFile(path) => {
                if let Some(contact) = target_or_selected(node, None).await {
                    let _ = node.send_file_from_path(&contact, &path).await;
                }
            }
            Command::Say(text) => {
                if let Some(contact) = target_or_selected(node, None).await {
                    let _ = node.send_text(&contact, text).await;
                }
            }
        }
    }
    info!("console closed");
    Ok(())
}

async fn target_or_selected(node: &Node, target: Option<ContactId>) -> Option<ContactId> {
    if target.is_some() {
        return target;
    }
    let selected = node.selected_contact().await;
    if selected.is_none() {
        eprintln!("no contact selected (use /select host:port)");
    }
    selected
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
