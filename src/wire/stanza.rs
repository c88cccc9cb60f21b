//! Stanza types and their binary codec.
//!
//! A stanza is one decoded application-level message. On the wire a stanza
//! is a tag byte followed by its fields; post-handshake stanzas travel as
//! the plaintext inside encrypted frames.

use crate::sync::{ChatMessage, MessageStatus, Update, UpdateOp};
use crate::types::{Jid, MessageId, PresenceKind, ReceiptKind};
use crate::wire::{DecodeError, Decoder, Encoder};

mod tag {
    pub const LOGIN_REQUEST: u8 = 0x01;
    pub const LOGIN_ACK: u8 = 0x02;
    pub const CHAT_UPDATE: u8 = 0x10;
    pub const HISTORY_SYNC: u8 = 0x11;
    pub const PRESENCE: u8 = 0x12;
    pub const RECEIPT: u8 = 0x13;
    pub const NEW_CONTACT: u8 = 0x14;
    pub const REKEY: u8 = 0x20;
    pub const PING: u8 = 0x21;
    pub const PONG: u8 = 0x22;
    pub const CLOSE: u8 = 0x23;
}

mod op_tag {
    pub const ARCHIVE: u8 = 0x01;
    pub const PIN: u8 = 0x02;
    pub const MUTE: u8 = 0x03;
    pub const RENAME: u8 = 0x04;
    pub const MARK_READ: u8 = 0x05;
    pub const MARK_UNREAD: u8 = 0x06;
    pub const MESSAGE: u8 = 0x07;
    pub const REMOVE_MESSAGE: u8 = 0x08;
}

/// One chat worth of history in a bulk sync.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub jid: Jid,
    pub name: Option<String>,
    pub messages: Vec<ChatMessage>,
}

/// A decoded application-level protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Stanza {
    /// Client credentials after the handshake
    LoginRequest {
        jid: Jid,
        device_name: String,
        timestamp: i64,
    },
    /// Server verdict on the login
    LoginAck { ok: bool, error: Option<String> },
    /// A revision-ordered delta for one chat
    ChatUpdate { chat: Jid, update: Update },
    /// Bulk history load
    HistorySync { conversations: Vec<Conversation> },
    /// Participant presence in a chat
    Presence {
        chat: Jid,
        participant: Jid,
        kind: PresenceKind,
        last_seen: Option<i64>,
    },
    /// Delivery receipt for messages we sent
    Receipt {
        chat: Jid,
        sender: Jid,
        message_ids: Vec<MessageId>,
        kind: ReceiptKind,
        timestamp: i64,
    },
    /// A contact the server introduces
    NewContact { jid: Jid, display_name: Option<String> },
    /// The peer rotated its send key
    Rekey,
    /// Keepalive
    Ping,
    /// Keepalive reply
    Pong,
    /// Orderly teardown
    Close { reason: Option<String> },
}

impl Stanza {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Stanza::LoginRequest { .. } => "login-request",
            Stanza::LoginAck { .. } => "login-ack",
            Stanza::ChatUpdate { .. } => "chat-update",
            Stanza::HistorySync { .. } => "history-sync",
            Stanza::Presence { .. } => "presence",
            Stanza::Receipt { .. } => "receipt",
            Stanza::NewContact { .. } => "new-contact",
            Stanza::Rekey => "rekey",
            Stanza::Ping => "ping",
            Stanza::Pong => "pong",
            Stanza::Close { .. } => "close",
        }
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        match self {
            Stanza::LoginRequest { jid, device_name, timestamp } => {
                enc.write_u8(tag::LOGIN_REQUEST);
                write_jid(&mut enc, jid);
                enc.write_string(device_name);
                enc.write_i64(*timestamp);
            }
            Stanza::LoginAck { ok, error } => {
                enc.write_u8(tag::LOGIN_ACK);
                enc.write_bool(*ok);
                enc.write_opt_string(error.as_deref());
            }
            Stanza::ChatUpdate { chat, update } => {
                enc.write_u8(tag::CHAT_UPDATE);
                write_jid(&mut enc, chat);
                enc.write_u64(update.revision);
                write_op(&mut enc, &update.op);
            }
            Stanza::HistorySync { conversations } => {
                enc.write_u8(tag::HISTORY_SYNC);
                enc.write_u16(conversations.len() as u16);
                for conversation in conversations {
                    write_jid(&mut enc, &conversation.jid);
                    enc.write_opt_string(conversation.name.as_deref());
                    enc.write_u16(conversation.messages.len() as u16);
                    for message in &conversation.messages {
                        write_message(&mut enc, message);
                    }
                }
            }
            Stanza::Presence { chat, participant, kind, last_seen } => {
                enc.write_u8(tag::PRESENCE);
                write_jid(&mut enc, chat);
                write_jid(&mut enc, participant);
                enc.write_u8(presence_byte(*kind));
                enc.write_opt_i64(*last_seen);
            }
            Stanza::Receipt { chat, sender, message_ids, kind, timestamp } => {
                enc.write_u8(tag::RECEIPT);
                write_jid(&mut enc, chat);
                write_jid(&mut enc, sender);
                enc.write_u16(message_ids.len() as u16);
                for id in message_ids {
                    enc.write_string(id);
                }
                enc.write_u8(receipt_byte(*kind));
                enc.write_i64(*timestamp);
            }
            Stanza::NewContact { jid, display_name } => {
                enc.write_u8(tag::NEW_CONTACT);
                write_jid(&mut enc, jid);
                enc.write_opt_string(display_name.as_deref());
            }
            Stanza::Rekey => enc.write_u8(tag::REKEY),
            Stanza::Ping => enc.write_u8(tag::PING),
            Stanza::Pong => enc.write_u8(tag::PONG),
            Stanza::Close { reason } => {
                enc.write_u8(tag::CLOSE);
                enc.write_opt_string(reason.as_deref());
            }
        }
        enc.into_bytes()
    }

    /// Decode one stanza from wire bytes.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut dec = Decoder::new(data);
        let stanza = match dec.read_u8()? {
            tag::LOGIN_REQUEST => Stanza::LoginRequest {
                jid: read_jid(&mut dec)?,
                device_name: dec.read_string()?,
                timestamp: dec.read_i64()?,
            },
            tag::LOGIN_ACK => Stanza::LoginAck {
                ok: dec.read_bool()?,
                error: dec.read_opt_string()?,
            },
            tag::CHAT_UPDATE => Stanza::ChatUpdate {
                chat: read_jid(&mut dec)?,
                update: Update {
                    revision: dec.read_u64()?,
                    op: read_op(&mut dec)?,
                },
            },
            tag::HISTORY_SYNC => {
                let count = dec.read_u16()? as usize;
                let mut conversations = Vec::with_capacity(count);
                for _ in 0..count {
                    let jid = read_jid(&mut dec)?;
                    let name = dec.read_opt_string()?;
                    let message_count = dec.read_u16()? as usize;
                    let mut messages = Vec::with_capacity(message_count);
                    for _ in 0..message_count {
                        messages.push(read_message(&mut dec)?);
                    }
                    conversations.push(Conversation { jid, name, messages });
                }
                Stanza::HistorySync { conversations }
            }
            tag::PRESENCE => Stanza::Presence {
                chat: read_jid(&mut dec)?,
                participant: read_jid(&mut dec)?,
                kind: presence_kind(dec.read_u8()?)?,
                last_seen: dec.read_opt_i64()?,
            },
            tag::RECEIPT => {
                let chat = read_jid(&mut dec)?;
                let sender = read_jid(&mut dec)?;
                let count = dec.read_u16()? as usize;
                let mut message_ids = Vec::with_capacity(count);
                for _ in 0..count {
                    message_ids.push(dec.read_string()?);
                }
                Stanza::Receipt {
                    chat,
                    sender,
                    message_ids,
                    kind: receipt_kind(dec.read_u8()?)?,
                    timestamp: dec.read_i64()?,
                }
            }
            tag::NEW_CONTACT => Stanza::NewContact {
                jid: read_jid(&mut dec)?,
                display_name: dec.read_opt_string()?,
            },
            tag::REKEY => Stanza::Rekey,
            tag::PING => Stanza::Ping,
            tag::PONG => Stanza::Pong,
            tag::CLOSE => Stanza::Close {
                reason: dec.read_opt_string()?,
            },
            other => {
                return Err(DecodeError(format!("unknown stanza tag: 0x{:02x}", other)));
            }
        };
        dec.expect_end()?;
        Ok(stanza)
    }
}

fn write_jid(enc: &mut Encoder, jid: &Jid) {
    enc.write_string(&jid.to_string());
}

fn read_jid(dec: &mut Decoder<'_>) -> Result<Jid, DecodeError> {
    let raw = dec.read_string()?;
    raw.parse()
        .map_err(|e| DecodeError(format!("invalid jid: {}", e)))
}

fn write_message(enc: &mut Encoder, message: &ChatMessage) {
    enc.write_string(&message.id);
    write_jid(enc, &message.sender);
    enc.write_i64(message.timestamp);
    enc.write_string(&message.text);
    enc.write_bool(message.from_me);
    enc.write_u8(status_byte(message.status));
}

fn read_message(dec: &mut Decoder<'_>) -> Result<ChatMessage, DecodeError> {
    Ok(ChatMessage {
        id: dec.read_string()?,
        sender: read_jid(dec)?,
        timestamp: dec.read_i64()?,
        text: dec.read_string()?,
        from_me: dec.read_bool()?,
        status: message_status(dec.read_u8()?)?,
    })
}

fn write_op(enc: &mut Encoder, op: &UpdateOp) {
    match op {
        UpdateOp::Archive(v) => {
            enc.write_u8(op_tag::ARCHIVE);
            enc.write_bool(*v);
        }
        UpdateOp::Pin(at) => {
            enc.write_u8(op_tag::PIN);
            enc.write_u64(*at);
        }
        UpdateOp::Mute(until) => {
            enc.write_u8(op_tag::MUTE);
            enc.write_i64(*until);
        }
        UpdateOp::Rename(name) => {
            enc.write_u8(op_tag::RENAME);
            enc.write_string(name);
        }
        UpdateOp::MarkRead => enc.write_u8(op_tag::MARK_READ),
        UpdateOp::MarkUnread => enc.write_u8(op_tag::MARK_UNREAD),
        UpdateOp::Message(message) => {
            enc.write_u8(op_tag::MESSAGE);
            write_message(enc, message);
        }
        UpdateOp::RemoveMessage(id) => {
            enc.write_u8(op_tag::REMOVE_MESSAGE);
            enc.write_string(id);
        }
    }
}

fn read_op(dec: &mut Decoder<'_>) -> Result<UpdateOp, DecodeError> {
    match dec.read_u8()? {
        op_tag::ARCHIVE => Ok(UpdateOp::Archive(dec.read_bool()?)),
        op_tag::PIN => Ok(UpdateOp::Pin(dec.read_u64()?)),
        op_tag::MUTE => Ok(UpdateOp::Mute(dec.read_i64()?)),
        op_tag::RENAME => Ok(UpdateOp::Rename(dec.read_string()?)),
        op_tag::MARK_READ => Ok(UpdateOp::MarkRead),
        op_tag::MARK_UNREAD => Ok(UpdateOp::MarkUnread),
        op_tag::MESSAGE => Ok(UpdateOp::Message(read_message(dec)?)),
        op_tag::REMOVE_MESSAGE => Ok(UpdateOp::RemoveMessage(dec.read_string()?)),
        other => Err(DecodeError(format!("unknown update op tag: 0x{:02x}", other))),
    }
}

fn status_byte(status: MessageStatus) -> u8 {
    match status {
        MessageStatus::Pending => 0,
        MessageStatus::Sent => 1,
        MessageStatus::Delivered => 2,
        MessageStatus::Read => 3,
        MessageStatus::Played => 4,
    }
}

fn message_status(b: u8) -> Result<MessageStatus, DecodeError> {
    match b {
        0 => Ok(MessageStatus::Pending),
        1 => Ok(MessageStatus::Sent),
        2 => Ok(MessageStatus::Delivered),
        3 => Ok(MessageStatus::Read),
        4 => Ok(MessageStatus::Played),
        other => Err(DecodeError(format!("unknown message status: {}", other))),
    }
}

fn presence_byte(kind: PresenceKind) -> u8 {
    match kind {
        PresenceKind::Available => 0,
        PresenceKind::Unavailable => 1,
        PresenceKind::Composing => 2,
        PresenceKind::Paused => 3,
        PresenceKind::Recording => 4,
    }
}

fn presence_kind(b: u8) -> Result<PresenceKind, DecodeError> {
    match b {
        0 => Ok(PresenceKind::Available),
        1 => Ok(PresenceKind::Unavailable),
        2 => Ok(PresenceKind::Composing),
        3 => Ok(PresenceKind::Paused),
        4 => Ok(PresenceKind::Recording),
        other => Err(DecodeError(format!("unknown presence kind: {}", other))),
    }
}

fn receipt_byte(kind: ReceiptKind) -> u8 {
    match kind {
        ReceiptKind::Delivered => 0,
        ReceiptKind::Read => 1,
        ReceiptKind::Played => 2,
    }
}

fn receipt_kind(b: u8) -> Result<ReceiptKind, DecodeError> {
    match b {
        0 => Ok(ReceiptKind::Delivered),
        1 => Ok(ReceiptKind::Read),
        2 => Ok(ReceiptKind::Played),
        other => Err(DecodeError(format!("unknown receipt kind: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jid(user: &str) -> Jid {
        Jid::new(user, "s.whatsapp.net")
    }

    fn sample_message() -> ChatMessage {
        ChatMessage {
            id: "MSG1".to_string(),
            sender: jid("123"),
            timestamp: 1_700_000_123,
            text: "hello there".to_string(),
            from_me: false,
            status: MessageStatus::Delivered,
        }
    }

    #[test]
    fn test_chat_update_roundtrip() {
        let stanza = Stanza::ChatUpdate {
            chat: jid("123"),
            update: Update {
                revision: 42,
                op: UpdateOp::Message(sample_message()),
            },
        };
        assert_eq!(Stanza::decode(&stanza.encode()).unwrap(), stanza);
    }

    #[test]
    fn test_history_sync_roundtrip() {
        let stanza = Stanza::HistorySync {
            conversations: vec![
                Conversation {
                    jid: jid("123"),
                    name: Some("Alice".to_string()),
                    messages: vec![sample_message()],
                },
                Conversation {
                    jid: Jid::new("456-789", "g.us"),
                    name: None,
                    messages: vec![],
                },
            ],
        };
        assert_eq!(Stanza::decode(&stanza.encode()).unwrap(), stanza);
    }

    #[test]
    fn test_control_stanzas_roundtrip() {
        for stanza in [
            Stanza::Rekey,
            Stanza::Ping,
            Stanza::Pong,
            Stanza::Close { reason: Some("bye".to_string()) },
            Stanza::LoginAck { ok: false, error: Some("denied".to_string()) },
        ] {
            assert_eq!(Stanza::decode(&stanza.encode()).unwrap(), stanza);
        }
    }

    #[test]
    fn test_archive_op_roundtrip() {
        let stanza = Stanza::ChatUpdate {
            chat: jid("9"),
            update: Update { revision: 3, op: UpdateOp::Archive(true) },
        };
        assert_eq!(Stanza::decode(&stanza.encode()).unwrap(), stanza);
    }

    #[test]
    fn test_unknown_tag_rejected() {
        assert!(Stanza::decode(&[0xEE]).is_err());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = Stanza::Ping.encode();
        bytes.push(0);
        assert!(Stanza::decode(&bytes).is_err());
    }

    #[test]
    fn test_truncated_rejected() {
        let bytes = Stanza::LoginAck { ok: true, error: None }.encode();
        assert!(Stanza::decode(&bytes[..bytes.len() - 1]).is_err());
    }
}
