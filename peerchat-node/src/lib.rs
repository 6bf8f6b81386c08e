//! PeerChat node: TCP peer links, inbound listener, outbound connector and the task runtime
//! that drives the session coordinator from `peerchat-core`.

pub mod config;
pub mod connector;
pub mod console;
pub mod downloads;
pub mod link;
pub mod listener;
pub mod node;
pub mod presenter;

pub use config::{Config, ConfigError};
pub use connector::ConnectError;
pub use link::{LinkError, PeerLink};
pub use listener::{InboundListener, ListenerError};
pub use node::{Node, NodeError};
pub use presenter::{ConsolePresenter, Presenter};
