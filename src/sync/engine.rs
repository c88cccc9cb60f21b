//! Synchronization engine.
//!
//! Reconciles incoming deltas and history loads into the in-memory chat
//! model. Updates to one chat are serialized by a per-record lock;
//! independent chats can be processed concurrently. Every mutation path is
//! idempotent, so replaying a delta after a reconnect is harmless.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::sync::{ApplyOutcome, ChatRecord, Update};
use crate::types::{
    ChatUpdated, Event, HistorySynced, Jid, MessageId, NewContact, PresenceKind, PresenceUpdate,
    ReceiptKind, ReceiptUpdate,
};
use crate::wire::Conversation;

/// The in-memory chat model and the logic that keeps it consistent.
#[derive(Default)]
pub struct SyncEngine {
    chats: RwLock<HashMap<Jid, Arc<Mutex<ChatRecord>>>>,
}

impl SyncEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch or create the record for a jid. Returns the record and whether
    /// it was newly created.
    async fn record(&self, jid: &Jid) -> (Arc<Mutex<ChatRecord>>, bool) {
        {
            let chats = self.chats.read().await;
            if let Some(record) = chats.get(jid) {
                return (Arc::clone(record), false);
            }
        }

        let mut chats = self.chats.write().await;
        // Double-checked: another task may have created it between locks
        if let Some(record) = chats.get(jid) {
            return (Arc::clone(record), false);
        }
        let record = Arc::new(Mutex::new(ChatRecord::new(jid.clone())));
        chats.insert(jid.clone(), Arc::clone(&record));
        (record, true)
    }

    fn new_contact_event(jid: &Jid, display_name: Option<String>) -> Option<Event> {
        // Groups are chats, not contacts
        if jid.is_group() {
            return None;
        }
        Some(Event::NewContact(NewContact {
            jid: jid.clone(),
            display_name,
        }))
    }

    /// Apply one revision-gated delta to a chat. Idempotent; a superseded
    /// revision is discarded without effect.
    pub async fn apply_update(&self, chat: &Jid, update: Update) -> (ApplyOutcome, Vec<Event>) {
        let (record, created) = self.record(chat).await;
        let mut events = Vec::new();
        if created {
            events.extend(Self::new_contact_event(chat, None));
        }

        let revision = update.revision;
        let outcome = record.lock().await.apply(update);
        if outcome == ApplyOutcome::Applied {
            events.push(Event::ChatUpdated(ChatUpdated {
                chat: chat.clone(),
                revision,
            }));
        }
        (outcome, events)
    }

    /// Merge a bulk history load. Set-union on message id per chat, linear
    /// in the combined message count.
    pub async fn apply_history(&self, conversations: Vec<Conversation>) -> Vec<Event> {
        let mut events = Vec::new();
        let chat_count = conversations.len();
        let mut inserted_total = 0;

        for conversation in conversations {
            let (record, created) = self.record(&conversation.jid).await;
            if created {
                events.extend(Self::new_contact_event(
                    &conversation.jid,
                    conversation.name.clone(),
                ));
            }

            let mut guard = record.lock().await;
            if let Some(name) = conversation.name {
                // History names are a bulk seed, not a revisioned rename
                if guard.name() == guard.jid.user {
                    guard.apply(Update {
                        revision: 0,
                        op: crate::sync::UpdateOp::Rename(name),
                    });
                }
            }
            inserted_total += guard.merge_history(conversation.messages);
        }

        events.push(Event::HistorySynced(HistorySynced {
            chats: chat_count,
            messages: inserted_total,
        }));
        events
    }

    /// Record a participant's presence in a chat.
    pub async fn apply_presence(
        &self,
        chat: &Jid,
        participant: Jid,
        kind: PresenceKind,
        last_seen: Option<i64>,
    ) -> Vec<Event> {
        let (record, created) = self.record(chat).await;
        let mut events = Vec::new();
        if created {
            events.extend(Self::new_contact_event(chat, None));
        }

        record.lock().await.set_presence(participant.clone(), kind);
        events.push(Event::PresenceUpdate(PresenceUpdate {
            chat: chat.clone(),
            participant,
            kind,
            last_seen,
        }));
        events
    }

    /// Apply a delivery receipt to stored messages.
    pub async fn apply_receipt(
        &self,
        chat: &Jid,
        sender: Jid,
        message_ids: &[MessageId],
        kind: ReceiptKind,
        timestamp: i64,
    ) -> Vec<Event> {
        let (record, _created) = self.record(chat).await;
        let changed = record.lock().await.apply_receipt(message_ids, kind);
        if changed.is_empty() {
            return Vec::new();
        }
        vec![Event::ReceiptUpdate(ReceiptUpdate {
            chat: chat.clone(),
            sender,
            message_ids: changed,
            kind,
            timestamp,
        })]
    }

    /// Record a message sent from this device. Goes through the same
    /// set-union insert as history, so a server echo of the same id is a
    /// no-op later.
    pub async fn record_outgoing(
        &self,
        chat: &Jid,
        message: crate::sync::ChatMessage,
    ) -> Vec<Event> {
        let (record, created) = self.record(chat).await;
        let mut events = Vec::new();
        if created {
            events.extend(Self::new_contact_event(chat, None));
        }

        let inserted = record.lock().await.merge_history(vec![message]);
        if inserted > 0 {
            events.push(Event::ChatUpdated(ChatUpdated {
                chat: chat.clone(),
                revision: 0,
            }));
        }
        events
    }

    /// Register a contact announced by the server.
    pub async fn register_contact(&self, jid: &Jid, display_name: Option<String>) -> Vec<Event> {
        let (record, created) = self.record(jid).await;
        if let Some(name) = display_name.clone() {
            record.lock().await.apply(Update {
                revision: 0,
                op: crate::sync::UpdateOp::Rename(name),
            });
        }
        if created {
            Self::new_contact_event(jid, display_name)
                .into_iter()
                .collect()
        } else {
            Vec::new()
        }
    }

    /// A point-in-time copy of one chat for external consumers.
    pub async fn snapshot(&self, chat: &Jid) -> Option<ChatRecord> {
        let record = {
            let chats = self.chats.read().await;
            chats.get(chat).cloned()?
        };
        let guard = record.lock().await;
        Some(guard.clone())
    }

    /// All known chat jids.
    pub async fn jids(&self) -> Vec<Jid> {
        self.chats.read().await.keys().cloned().collect()
    }

    /// Number of known chats.
    pub async fn len(&self) -> usize {
        self.chats.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.chats.read().await.is_empty()
    }

    /// Explicitly remove a chat. In-flight applies on the record finish
    /// first; the record is detached from the map atomically.
    pub async fn remove(&self, chat: &Jid) -> bool {
        self.chats.write().await.remove(chat).is_some()
    }
}
