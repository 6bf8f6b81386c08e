//! Console commands typed at the prompt.

use std::path::PathBuf;

use peerchat_core::{ContactId, Endpoint, EndpointParseError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect(Endpoint),
    Select(ContactId),
    SendFile(PathBuf),
    /// `None` disconnects the selected contact.
    Disconnect(Option<ContactId>),
    Contacts,
    History,
    Help,
    Quit,
    /// Plain text for the selected contact.
    Say(String),
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command /{0} (try /help)")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("bad address: {0}")]
    Address(#[from] EndpointParseError),
}

pub const HELP: &str = "\
/connect host:port   open a connection
/select host:port    show a contact's conversation; plain text goes to it
/file path           send a file to the selected contact
/disconnect [id]     close the connection (default: selected contact)
/contacts            list known contacts
/history             reprint the selected conversation
/help                this text
/quit                leave";

pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(if line.trim().is_empty() {
            Command::Empty
        } else {
            Command::Say(line.to_string())
        });
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((n, a)) => (n, a.trim()),
        None => (rest, ""),
    };
    match name {
        "connect" | "c" => {
            if arg.is_empty() {
                return Err(CommandError::Usage("/connect host:port"));
            }
            Ok(Command::Connect(Endpoint::parse(arg)?))
        }
        "select" | "s" => {
            if arg.is_empty() {
                return Err(CommandError::Usage("/select host:port"));
            }
            Ok(Command::Select(ContactId::new(arg)))
        }
        "file" | "f" => {
            if arg.is_empty() {
                return Err(CommandError::Usage("/file path"));
            }
            Ok(Command::SendFile(PathBuf::from(arg)))
        }
        "disconnect" | "d" => Ok(Command::Disconnect(
            (!arg.is_empty()).then(|| ContactId::new(arg)),
        )),
        "contacts" => Ok(Command::Contacts),
        "history" => Ok(Command::History),
        "help" | "h" | "?" => Ok(Command::Help),
        "quit" | "q" | "exit" => Ok(Command::Quit),
        other => Err(CommandError::Unknown(other.to_string())),
    }
}
