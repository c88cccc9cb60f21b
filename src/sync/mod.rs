//! Chat model synchronization.
//!
//! The chat record model and the engine that reconciles deltas and history
//! loads into it.

pub mod engine;
pub mod record;

pub use engine::SyncEngine;
pub use record::{
    ApplyOutcome, ChatMessage, ChatRecord, MessageStatus, Update, UpdateKey, UpdateOp,
};
