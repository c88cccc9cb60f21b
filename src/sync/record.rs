//! In-memory chat model.
//!
//! A [`ChatRecord`] holds everything the pipeline knows about one chat: the
//! chronologically sorted message list, unread counters, archive/pin/mute
//! flags and per-participant presences. Records are mutated only by the sync
//! engine; consumers read cloned snapshots.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::types::{Jid, MessageId, PresenceKind, ReceiptKind};

/// Delivery state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Played,
}

/// One message in a chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender: Jid,
    /// Seconds since the epoch
    pub timestamp: i64,
    pub text: String,
    pub from_me: bool,
    pub status: MessageStatus,
}

/// A single field change, addition or removal for one chat.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    /// Set the archived flag
    Archive(bool),
    /// Pin timestamp in seconds; 0 unpins
    Pin(u64),
    /// Mute until this timestamp in seconds; 0 unmutes
    Mute(i64),
    /// Set the display name
    Rename(String),
    /// Clear the unread counter
    MarkRead,
    /// Manually flag the chat as unread
    MarkUnread,
    /// Add (or replace) a message
    Message(ChatMessage),
    /// Remove a message by id
    RemoveMessage(MessageId),
}

/// A delta applied atomically to one chat, ordered by its revision.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    /// Monotonic per-chat revision disambiguating update ordering
    pub revision: u64,
    pub op: UpdateOp,
}

/// The field a revision gates. Conflicting writes to the same field resolve
/// last-writer-wins by revision; writes to different fields are independent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UpdateKey {
    Archived,
    Pinned,
    Mute,
    Name,
    Unread,
    Message(MessageId),
}

impl UpdateOp {
    /// The field this op writes.
    pub fn key(&self) -> UpdateKey {
        match self {
            UpdateOp::Archive(_) => UpdateKey::Archived,
            UpdateOp::Pin(_) => UpdateKey::Pinned,
            UpdateOp::Mute(_) => UpdateKey::Mute,
            UpdateOp::Rename(_) => UpdateKey::Name,
            UpdateOp::MarkRead | UpdateOp::MarkUnread => UpdateKey::Unread,
            UpdateOp::Message(message) => UpdateKey::Message(message.id.clone()),
            UpdateOp::RemoveMessage(id) => UpdateKey::Message(id.clone()),
        }
    }
}

/// Result of applying an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The update was applied
    Applied,
    /// A higher or equal revision already covered this field
    Superseded,
}

/// All state for one chat.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRecord {
    pub jid: Jid,
    name: Option<String>,
    /// Sorted by (timestamp, id), unique by id
    messages: Vec<ChatMessage>,
    message_ids: HashSet<MessageId>,
    /// Messages that arrived after the last mark-read
    unread: u32,
    /// Manually flagged as unread
    pub marked_unread: bool,
    pub archived: bool,
    /// Pin timestamp in seconds; 0 = not pinned
    pub pinned_at: u64,
    /// Muted until this timestamp in seconds; 0 = not muted
    pub mute_until: i64,
    /// Presence of each participant, excluding ourselves
    pub presences: HashMap<Jid, PresenceKind>,
    /// Highest revision applied per field
    applied: HashMap<UpdateKey, u64>,
}

impl ChatRecord {
    /// Create an empty record for a jid.
    pub fn new(jid: Jid) -> Self {
        Self {
            jid,
            name: None,
            messages: Vec::new(),
            message_ids: HashSet::new(),
            unread: 0,
            marked_unread: false,
            archived: false,
            pinned_at: 0,
            mute_until: 0,
            presences: HashMap::new(),
            applied: HashMap::new(),
        }
    }

    /// The display name, falling back to the jid user part.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.jid.user)
    }

    /// Messages in chronological order.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// The oldest message, if any.
    pub fn first_message(&self) -> Option<&ChatMessage> {
        self.messages.first()
    }

    /// The newest message, if any.
    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// Number of unread messages; the manual unread flag counts as one.
    pub fn unread(&self) -> u32 {
        self.unread
    }

    /// Whether the chat shows as unread.
    pub fn has_unread(&self) -> bool {
        self.unread > 0 || self.marked_unread
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned_at != 0
    }

    pub fn is_muted(&self, now: i64) -> bool {
        self.mute_until != 0 && now < self.mute_until
    }

    /// The mark-read watermark: revisions at or below it are read.
    fn read_watermark(&self) -> u64 {
        self.applied.get(&UpdateKey::Unread).copied().unwrap_or(0)
    }

    /// Apply one revision-gated update. Applying the same update twice, or an
    /// update superseded by a higher revision on the same field, is a no-op.
    pub fn apply(&mut self, update: Update) -> ApplyOutcome {
        let key = update.op.key();
        if let Some(&last) = self.applied.get(&key) {
            if update.revision <= last {
                return ApplyOutcome::Superseded;
            }
        }

        match update.op {
            UpdateOp::Archive(archived) => self.archived = archived,
            UpdateOp::Pin(at) => self.pinned_at = at,
            UpdateOp::Mute(until) => self.mute_until = until,
            UpdateOp::Rename(name) => self.name = Some(name),
            UpdateOp::MarkRead => {
                self.marked_unread = false;
                // Watermark moves to this revision; recount what is newer
                self.applied.insert(key.clone(), update.revision);
                self.unread = self.count_unread(update.revision);
                return ApplyOutcome::Applied;
            }
            UpdateOp::MarkUnread => self.marked_unread = true,
            UpdateOp::Message(message) => {
                let counts = !message.from_me && update.revision > self.read_watermark();
                let inserted = self.insert_message(message);
                if inserted && counts {
                    self.unread += 1;
                }
            }
            UpdateOp::RemoveMessage(ref id) => {
                if let Some(removed) = self.remove_message(id) {
                    let was_unread = !removed.from_me
                        && self.applied.get(&key).copied().unwrap_or(0) > self.read_watermark();
                    if was_unread && self.unread > 0 {
                        self.unread -= 1;
                    }
                }
            }
        }

        self.applied.insert(key, update.revision);
        ApplyOutcome::Applied
    }

    /// Messages newer than the given watermark revision.
    fn count_unread(&self, watermark: u64) -> u32 {
        self.messages
            .iter()
            .filter(|m| {
                !m.from_me
                    && self
                        .applied
                        .get(&UpdateKey::Message(m.id.clone()))
                        .copied()
                        .unwrap_or(0)
                        > watermark
            })
            .count() as u32
    }

    /// Insert a message keeping (timestamp, id) order; a duplicate id
    /// replaces the stored copy in place. Returns true if the id was new.
    fn insert_message(&mut self, message: ChatMessage) -> bool {
        if self.message_ids.contains(&message.id) {
            if let Some(existing) = self.messages.iter_mut().find(|m| m.id == message.id) {
                *existing = message;
            }
            return false;
        }

        let pos = self
            .messages
            .partition_point(|m| (m.timestamp, &m.id) < (message.timestamp, &message.id));
        self.message_ids.insert(message.id.clone());
        self.messages.insert(pos, message);
        true
    }

    fn remove_message(&mut self, id: &MessageId) -> Option<ChatMessage> {
        if !self.message_ids.remove(id) {
            return None;
        }
        let pos = self.messages.iter().position(|m| &m.id == id)?;
        Some(self.messages.remove(pos))
    }

    /// Merge a bulk history load: set-union on message id, ordered by
    /// (timestamp, id). Runs in linear time over the combined size (plus the
    /// sort of the incoming batch). Returns the number of messages inserted.
    pub fn merge_history(&mut self, mut incoming: Vec<ChatMessage>) -> usize {
        incoming.sort_by(|a, b| (a.timestamp, &a.id).cmp(&(b.timestamp, &b.id)));

        let mut merged = Vec::with_capacity(self.messages.len() + incoming.len());
        let mut existing = std::mem::take(&mut self.messages).into_iter().peekable();
        let mut fresh = incoming.into_iter().peekable();
        let mut inserted = 0;

        loop {
            match (existing.peek(), fresh.peek()) {
                (Some(_), Some(new)) if self.message_ids.contains(&new.id) => {
                    // Already known, drop the incoming copy
                    fresh.next();
                }
                (Some(old), Some(new)) => {
                    if (old.timestamp, &old.id) <= (new.timestamp, &new.id) {
                        merged.push(existing.next().expect("peeked"));
                    } else {
                        let message = fresh.next().expect("peeked");
                        self.message_ids.insert(message.id.clone());
                        merged.push(message);
                        inserted += 1;
                    }
                }
                (Some(_), None) => merged.push(existing.next().expect("peeked")),
                (None, Some(new)) => {
                    if self.message_ids.contains(&new.id) {
                        fresh.next();
                        continue;
                    }
                    let message = fresh.next().expect("peeked");
                    self.message_ids.insert(message.id.clone());
                    merged.push(message);
                    inserted += 1;
                }
                (None, None) => break,
            }
        }

        self.messages = merged;
        inserted
    }

    /// Apply a delivery receipt to stored messages. Status only moves
    /// forward. Returns the ids that actually changed.
    pub fn apply_receipt(&mut self, ids: &[MessageId], kind: ReceiptKind) -> Vec<MessageId> {
        let status = match kind {
            ReceiptKind::Delivered => MessageStatus::Delivered,
            ReceiptKind::Read => MessageStatus::Read,
            ReceiptKind::Played => MessageStatus::Played,
        };

        let mut changed = Vec::new();
        for message in &mut self.messages {
            if ids.contains(&message.id) && message.status < status {
                message.status = status;
                changed.push(message.id.clone());
            }
        }
        changed
    }

    /// Record a participant's presence in this chat.
    pub fn set_presence(&mut self, participant: Jid, kind: PresenceKind) {
        self.presences.insert(participant, kind);
    }
}
