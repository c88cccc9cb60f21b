//! Event types emitted by the session pipeline.
//!
//! Events are produced by the protocol state machine and the sync engine and
//! delivered to registered listeners through the dispatcher.

use crate::types::{Jid, MessageId};

/// Connected is emitted once the session reaches the ready phase.
#[derive(Debug, Clone)]
pub struct Connected {
    /// Whether this is an initial connection or a reconnection
    pub is_reconnect: bool,
}

/// Disconnected is emitted when the session ends.
#[derive(Debug, Clone)]
pub struct Disconnected {
    /// The reason for disconnection
    pub reason: DisconnectReason,
}

/// Reason for disconnection
#[derive(Debug, Clone, PartialEq)]
pub enum DisconnectReason {
    /// Normal close requested by the local caller
    ClosedByUser,
    /// Server requested disconnect
    ServerRequested,
    /// Network error
    NetworkError(String),
    /// Fatal protocol or crypto failure
    SessionFailure(String),
}

/// NewContact is emitted the first time a jid is referenced.
#[derive(Debug, Clone)]
pub struct NewContact {
    /// Jid of the contact
    pub jid: Jid,
    /// Display name if the server provided one
    pub display_name: Option<String>,
}

/// ChatUpdated is emitted after the sync engine mutates a chat record.
#[derive(Debug, Clone)]
pub struct ChatUpdated {
    /// Jid of the affected chat
    pub chat: Jid,
    /// Revision that was applied
    pub revision: u64,
}

/// Presence of a participant in a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceKind {
    Available,
    Unavailable,
    Composing,
    Paused,
    Recording,
}

/// PresenceUpdate is emitted when a participant's presence changes.
#[derive(Debug, Clone)]
pub struct PresenceUpdate {
    /// The chat the presence applies to
    pub chat: Jid,
    /// The participant whose presence changed
    pub participant: Jid,
    /// The new presence
    pub kind: PresenceKind,
    /// Last seen timestamp if available
    pub last_seen: Option<i64>,
}

/// Type of receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptKind {
    /// Message was delivered to the recipient device
    Delivered,
    /// Message was read
    Read,
    /// Media was played
    Played,
}

/// ReceiptUpdate is emitted when delivery state changes for messages.
#[derive(Debug, Clone)]
pub struct ReceiptUpdate {
    /// The chat the receipt applies to
    pub chat: Jid,
    /// The sender of the receipt
    pub sender: Jid,
    /// Message ids the receipt covers
    pub message_ids: Vec<MessageId>,
    /// What the receipt conveys
    pub kind: ReceiptKind,
    /// Timestamp of the receipt
    pub timestamp: i64,
}

/// HistorySynced is emitted after a bulk history load has been merged.
#[derive(Debug, Clone)]
pub struct HistorySynced {
    /// Number of chats touched by the merge
    pub chats: usize,
    /// Number of messages newly inserted
    pub messages: usize,
}

/// All events the pipeline can emit.
#[derive(Debug, Clone)]
pub enum Event {
    Connected(Connected),
    Disconnected(Disconnected),
    NewContact(NewContact),
    ChatUpdated(ChatUpdated),
    PresenceUpdate(PresenceUpdate),
    ReceiptUpdate(ReceiptUpdate),
    HistorySynced(HistorySynced),
}

/// Listener categories. Each event belongs to exactly one category and
/// listeners subscribe per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    Connection,
    Contact,
    Chat,
    Presence,
    Receipt,
    Sync,
}

impl Event {
    /// The category listeners subscribe to for this event.
    pub fn category(&self) -> EventCategory {
        match self {
            Event::Connected(_) | Event::Disconnected(_) => EventCategory::Connection,
            Event::NewContact(_) => EventCategory::Contact,
            Event::ChatUpdated(_) => EventCategory::Chat,
            Event::PresenceUpdate(_) => EventCategory::Presence,
            Event::ReceiptUpdate(_) => EventCategory::Receipt,
            Event::HistorySynced(_) => EventCategory::Sync,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_categories() {
        let evt = Event::Connected(Connected { is_reconnect: false });
        assert_eq!(evt.category(), EventCategory::Connection);

        let evt = Event::NewContact(NewContact {
            jid: Jid::new("123", "s.whatsapp.net"),
            display_name: None,
        });
        assert_eq!(evt.category(), EventCategory::Contact);

        let evt = Event::HistorySynced(HistorySynced { chats: 1, messages: 2 });
        assert_eq!(evt.category(), EventCategory::Sync);
    }
}
