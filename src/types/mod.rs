//! Core types: JIDs, message ids and events.

pub mod events;
pub mod jid;

pub use events::*;
pub use jid::{new_message_id, Jid, MessageId, ParseJidError};
