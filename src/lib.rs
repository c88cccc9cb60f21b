//! wasession: session protocol core for a WhatsApp-Web-style client.
//!
//! The pipeline: the transport channel receives length-prefixed binary
//! frames, the cryptographic session decrypts them, the protocol state
//! machine validates sequencing, the synchronization engine merges updates
//! into the in-memory chat model, and the dispatch layer notifies
//! registered listeners.
//!
//! ## Modules
//!
//! - `types` - JIDs, message ids and events
//! - `crypto` - key pairs, HKDF, the rotating transport cipher and the handshake
//! - `proto` - plaintext handshake frame payloads
//! - `transport` - WebSocket framing, bounded frame queue, reconnect backoff
//! - `wire` - binary stanza codec
//! - `protocol` - the session and the phase state machine
//! - `sync` - chat records and the idempotent synchronization engine
//! - `dispatch` - category-keyed event dispatch
//! - `client` - the high-level client tying it all together

pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod proto;
pub mod protocol;
pub mod sync;
pub mod transport;
pub mod types;
pub mod wire;

mod client;

pub use client::{Client, ClientError};
pub use config::ClientConfig;
pub use crypto::{IdentityKeyPair, StoredIdentity};
pub use dispatch::{Dispatcher, Listener, ListenerError};
pub use protocol::Phase;
pub use sync::{ApplyOutcome, ChatMessage, ChatRecord, MessageStatus, SyncEngine, Update, UpdateOp};
pub use transport::ReconnectPolicy;
pub use types::{Event, EventCategory, Jid, MessageId};
pub use wire::{Conversation, Stanza};
