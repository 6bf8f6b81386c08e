//! Presentation seam: the node reports messages, presence changes and user-facing errors here.

use std::io::Write;

use peerchat_core::{Body, ContactId, Event, MessageEntry};

/// Callbacks arrive from receive-loop tasks; implementations must be cheap and non-blocking.
pub trait Presenter: Send + Sync {
    fn on_message(&self, contact: &ContactId, entry: &MessageEntry);
    fn on_contact_online(&self, contact: &ContactId);
    fn on_contact_offline(&self, contact: &ContactId);
    fn on_error(&self, message: &str);
    fn on_notice(&self, _text: &str) {}
}

pub(crate) fn dispatch(presenter: &dyn Presenter, event: &Event) {
    match event {
        Event::Message { contact, entry } => presenter.on_message(contact, entry),
        Event::ContactOnline(c) => presenter.on_contact_online(c),
        Event::ContactOffline(c) => presenter.on_contact_offline(c),
        Event::Notice(text) => presenter.on_notice(text),
    }
}

/// One history line as shown on a console.
pub fn render_entry(entry: &MessageEntry) -> String {
    let who = &entry.sender.display_name;
    match &entry.message.body {
        Body::Text(t) => format!("[{}] {}", who, t.content),
        Body::File(f) => format!("[{}] sent file {} ({} bytes)", who, f.name, f.bytes.len()),
        Body::System(s) => format!("[system] {}", s.text),
        other => format!("[{}] <{:?}>", who, other.kind()),
    }
}

/// Writes to stdout and stderr.
#[derive(Debug, Default)]
pub struct ConsolePresenter;

impl ConsolePresenter {
    fn line(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{}", text);
        let _ = out.flush();
    }
}

impl Presenter for ConsolePresenter {
    fn on_message(&self, contact: &ContactId, entry: &MessageEntry) {
        self.line(&format!("{} {}", contact, render_entry(entry)));
    }

    fn on_contact_online(&self, contact: &ContactId) {
        self.line(&format!("* {} is online", contact));
    }

    fn on_contact_offline(&self, contact: &ContactId) {
        self.line(&format!("* {} went offline", contact));
    }

    fn on_error(&self, message: &str) {
        eprintln!("error: {}", message);
    }

    fn on_notice(&self, text: &str) {
        self.line(&format!("[system] {}", text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerchat_core::{Message, UserIdentity};

    #[test]
    fn render_text_and_file() {
        let bob = UserIdentity::new("bob", "127.0.0.1", 9001);
        let text = MessageEntry::new(bob.clone(), Message::text("hi"));
        assert_eq!(render_entry(&text), "[bob] hi");
        let file = MessageEntry::new(bob, Message::file("a.txt", vec![1, 2, 3]));
        assert_eq!(render_entry(&file), "[bob] sent file a.txt (3 bytes)");
    }
}
