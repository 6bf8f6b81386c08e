//! PeerChat session coordination core.
//! Host-driven: no I/O; host passes link and message events and performs the returned actions.

pub mod coordinator;
pub mod directory;
pub mod identity;
pub mod protocol;
pub mod session;
pub mod wire;

pub use coordinator::{Action, Coordinator, Direction, Event, LinkState, StateError};
pub use directory::{DirectoryError, MemoryDirectory, UserDirectory};
pub use identity::{ContactId, Endpoint, EndpointParseError, PeerId, UserIdentity};
pub use protocol::{Body, Message, MessageKind, Timestamp};
pub use session::{ChatSession, MessageEntry, SessionKey};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};
