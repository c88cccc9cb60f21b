//! Binary stanza codec.
//!
//! Post-handshake frames carry stanzas in a compact tagged binary form.

pub mod decoder;
pub mod encoder;
pub mod stanza;

pub use decoder::{DecodeError, Decoder};
pub use encoder::Encoder;
pub use stanza::{Conversation, Stanza};
