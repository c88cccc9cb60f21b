//! Protocol sequencing: the per-connection session and the state machine
//! that validates frame ordering.

pub mod machine;
pub mod session;

pub use machine::{Action, Machine, Phase, ProtocolError, SyncInput};
pub use session::Session;
