//! Protocol state machine.
//!
//! Sequences the session through handshake, authentication, ready and
//! teardown, and validates that every received frame is legal for the
//! current phase. An unexpected frame in the ready phase is dropped and
//! logged; a frame that breaks the handshake sequence tears the session
//! down. Only in the ready phase are application stanzas handed to the
//! sync engine.

use log::{debug, warn};

use crate::protocol::Session;
use crate::sync::Update;
use crate::transport::{Frame, FrameTag};
use crate::types::{
    Connected, DisconnectReason, Event, Jid, MessageId, PresenceKind, ReceiptKind,
};
use crate::wire::{Conversation, Stanza};

/// Connection lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    Handshaking,
    Authenticating,
    Ready,
    Closing,
}

/// Work the state machine asks its driver to perform.
#[derive(Debug)]
pub enum Action {
    /// Send a stanza back to the server
    Reply(Stanza),
    /// Hand a model mutation to the sync engine
    Sync(SyncInput),
    /// Notify listeners
    Emit(Event),
    /// The session is dead; stop the frame loop
    Teardown(DisconnectReason),
}

/// A model mutation extracted from an application stanza.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncInput {
    Update {
        chat: Jid,
        update: Update,
    },
    History(Vec<Conversation>),
    Presence {
        chat: Jid,
        participant: Jid,
        kind: PresenceKind,
        last_seen: Option<i64>,
    },
    Receipt {
        chat: Jid,
        sender: Jid,
        message_ids: Vec<MessageId>,
        kind: ReceiptKind,
        timestamp: i64,
    },
    Contact {
        jid: Jid,
        display_name: Option<String>,
    },
}

/// Errors from the outbound (encrypt) path.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// No session in a phase that allows sending
    NotReady,
    /// Encryption failure
    Crypto(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::NotReady => write!(f, "session not ready"),
            ProtocolError::Crypto(e) => write!(f, "crypto error: {}", e),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// The state machine owning the session.
pub struct Machine {
    phase: Phase,
    session: Option<Session>,
    reconnected: bool,
}

impl Machine {
    pub fn new() -> Self {
        Self {
            phase: Phase::Disconnected,
            session: None,
            reconnected: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Enter the handshaking phase for a new connection attempt.
    pub fn begin_handshake(&mut self) {
        self.session = None;
        self.phase = Phase::Handshaking;
    }

    /// Install the session negotiated by the handshake driver and move to
    /// authentication.
    pub fn install_session(&mut self, session: Session) {
        self.session = Some(session);
        self.phase = Phase::Authenticating;
    }

    /// Begin an orderly local close.
    pub fn begin_close(&mut self) {
        self.phase = Phase::Closing;
    }

    /// Finish teardown: the session is destroyed.
    pub fn finish_close(&mut self) {
        self.session = None;
        self.phase = Phase::Disconnected;
    }

    /// Encrypt a stanza into a transport frame. Allowed while
    /// authenticating (the login request) and in the ready phase.
    pub fn encrypt_stanza(&mut self, stanza: &Stanza) -> Result<Frame, ProtocolError> {
        if !matches!(self.phase, Phase::Authenticating | Phase::Ready) {
            return Err(ProtocolError::NotReady);
        }
        let session = self.session.as_mut().ok_or(ProtocolError::NotReady)?;
        let ciphertext = session
            .encrypt(&stanza.encode())
            .map_err(|e| ProtocolError::Crypto(e.to_string()))?;
        Ok(Frame::encrypted(ciphertext))
    }

    /// Rotate the send key and produce the announcement for the peer. The
    /// announcement is encrypted under the outgoing key, then the rotation
    /// takes effect for every later frame.
    pub fn rekey_send(&mut self) -> Result<Frame, ProtocolError> {
        let frame = self.encrypt_stanza(&Stanza::Rekey)?;
        if let Some(session) = self.session.as_mut() {
            session.rotate_send();
        }
        Ok(frame)
    }

    /// Process one received frame and return the work it implies.
    pub fn on_frame(&mut self, frame: Frame) -> Vec<Action> {
        match self.phase {
            Phase::Disconnected | Phase::Closing => {
                // Late frames after teardown carry no weight
                debug!("dropping frame received in phase {:?}", self.phase);
                Vec::new()
            }
            Phase::Handshaking => {
                // The handshake driver reads its frames directly; anything
                // arriving here breaks the handshake sequence.
                self.teardown("frame outside handshake sequence")
            }
            Phase::Authenticating => self.on_frame_authenticating(frame),
            Phase::Ready => self.on_frame_ready(frame),
        }
    }

    fn teardown(&mut self, reason: &str) -> Vec<Action> {
        warn!("fatal protocol failure: {}", reason);
        self.session = None;
        self.phase = Phase::Closing;
        vec![Action::Teardown(DisconnectReason::SessionFailure(
            reason.to_string(),
        ))]
    }

    fn decrypt(&mut self, frame: &Frame) -> Result<Vec<u8>, ()> {
        let Some(session) = self.session.as_mut() else {
            return Err(());
        };
        session.decrypt(&frame.payload).map_err(|_| ())
    }

    fn on_frame_authenticating(&mut self, frame: Frame) -> Vec<Action> {
        if frame.tag != FrameTag::Encrypted {
            return self.teardown("plaintext frame after handshake");
        }
        let Ok(plaintext) = self.decrypt(&frame) else {
            return self.teardown("decryption failed during authentication");
        };
        let stanza = match Stanza::decode(&plaintext) {
            Ok(stanza) => stanza,
            Err(e) => return self.teardown(&format!("undecodable auth stanza: {}", e)),
        };

        match stanza {
            Stanza::LoginAck { ok: true, .. } => {
                self.phase = Phase::Ready;
                let is_reconnect = self.reconnected;
                self.reconnected = true;
                vec![Action::Emit(Event::Connected(Connected { is_reconnect }))]
            }
            Stanza::LoginAck { ok: false, error } => {
                self.teardown(&format!(
                    "login rejected: {}",
                    error.as_deref().unwrap_or("unspecified")
                ))
            }
            other => {
                // Authentication admits exactly one stanza
                self.teardown(&format!("unexpected {} during authentication", other.kind()))
            }
        }
    }

    fn on_frame_ready(&mut self, frame: Frame) -> Vec<Action> {
        if frame.tag != FrameTag::Encrypted {
            warn!("protocol violation: plaintext frame in ready phase, dropped");
            return Vec::new();
        }
        let Ok(plaintext) = self.decrypt(&frame) else {
            return self.teardown("decryption failed");
        };
        let stanza = match Stanza::decode(&plaintext) {
            Ok(stanza) => stanza,
            Err(e) => {
                warn!("protocol violation: {}, frame dropped", e);
                return Vec::new();
            }
        };

        match stanza {
            Stanza::ChatUpdate { chat, update } => {
                vec![Action::Sync(SyncInput::Update { chat, update })]
            }
            Stanza::HistorySync { conversations } => {
                vec![Action::Sync(SyncInput::History(conversations))]
            }
            Stanza::Presence { chat, participant, kind, last_seen } => {
                vec![Action::Sync(SyncInput::Presence { chat, participant, kind, last_seen })]
            }
            Stanza::Receipt { chat, sender, message_ids, kind, timestamp } => {
                vec![Action::Sync(SyncInput::Receipt {
                    chat,
                    sender,
                    message_ids,
                    kind,
                    timestamp,
                })]
            }
            Stanza::NewContact { jid, display_name } => {
                vec![Action::Sync(SyncInput::Contact { jid, display_name })]
            }
            Stanza::Rekey => {
                debug!("peer rotated its send key");
                if let Some(session) = self.session.as_mut() {
                    session.rotate_recv();
                }
                Vec::new()
            }
            Stanza::Ping => vec![Action::Reply(Stanza::Pong)],
            Stanza::Pong => Vec::new(),
            Stanza::Close { reason } => {
                debug!("server closed the session: {:?}", reason);
                self.session = None;
                self.phase = Phase::Closing;
                vec![Action::Teardown(DisconnectReason::ServerRequested)]
            }
            other @ (Stanza::LoginRequest { .. } | Stanza::LoginAck { .. }) => {
                warn!(
                    "protocol violation: unexpected {} in ready phase, dropped",
                    other.kind()
                );
                Vec::new()
            }
        }
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::UpdateOp;

    /// A machine authenticated against an in-memory peer session.
    fn machine_with_peer() -> (Machine, Session) {
        let k1 = [0x11; 32];
        let k2 = [0x22; 32];
        let mut machine = Machine::new();
        machine.begin_handshake();
        machine.install_session(Session::new(k1, k2, [0xaa; 32], 0));
        (machine, Session::new(k2, k1, [0xbb; 32], 0))
    }

    fn peer_frame(peer: &mut Session, stanza: &Stanza) -> Frame {
        Frame::encrypted(peer.encrypt(&stanza.encode()).unwrap())
    }

    fn ready_machine() -> (Machine, Session) {
        let (mut machine, mut peer) = machine_with_peer();
        let frame = peer_frame(&mut peer, &Stanza::LoginAck { ok: true, error: None });
        let actions = machine.on_frame(frame);
        assert!(matches!(
            actions[0],
            Action::Emit(Event::Connected(Connected { is_reconnect: false }))
        ));
        assert_eq!(machine.phase(), Phase::Ready);
        (machine, peer)
    }

    #[test]
    fn test_frame_dropped_when_disconnected() {
        let mut machine = Machine::new();
        let actions = machine.on_frame(Frame::encrypted(vec![1, 2, 3]));
        assert!(actions.is_empty());
        assert_eq!(machine.phase(), Phase::Disconnected);
    }

    #[test]
    fn test_login_ack_reaches_ready() {
        let (machine, _peer) = ready_machine();
        assert_eq!(machine.phase(), Phase::Ready);
    }

    #[test]
    fn test_login_rejection_is_fatal() {
        let (mut machine, mut peer) = machine_with_peer();
        let frame = peer_frame(
            &mut peer,
            &Stanza::LoginAck { ok: false, error: Some("denied".into()) },
        );
        let actions = machine.on_frame(frame);
        assert!(matches!(actions[0], Action::Teardown(_)));
        assert_eq!(machine.phase(), Phase::Closing);
    }

    #[test]
    fn test_wrong_stanza_during_auth_is_fatal() {
        let (mut machine, mut peer) = machine_with_peer();
        let frame = peer_frame(&mut peer, &Stanza::Ping);
        let actions = machine.on_frame(frame);
        assert!(matches!(actions[0], Action::Teardown(_)));
    }

    #[test]
    fn test_unexpected_stanza_in_ready_is_dropped() {
        let (mut machine, mut peer) = ready_machine();
        let frame = peer_frame(&mut peer, &Stanza::LoginAck { ok: true, error: None });
        let actions = machine.on_frame(frame);
        assert!(actions.is_empty());
        assert_eq!(machine.phase(), Phase::Ready);
    }

    #[test]
    fn test_plaintext_frame_in_ready_is_dropped() {
        let (mut machine, _peer) = ready_machine();
        let actions = machine.on_frame(Frame::plaintext(vec![0; 8]));
        assert!(actions.is_empty());
        assert_eq!(machine.phase(), Phase::Ready);
    }

    #[test]
    fn test_chat_update_flows_to_sync() {
        let (mut machine, mut peer) = ready_machine();
        let chat = Jid::new("123", "s.whatsapp.net");
        let stanza = Stanza::ChatUpdate {
            chat: chat.clone(),
            update: Update { revision: 1, op: UpdateOp::Archive(true) },
        };

        let actions = machine.on_frame(peer_frame(&mut peer, &stanza));
        match &actions[0] {
            Action::Sync(SyncInput::Update { chat: c, update }) => {
                assert_eq!(c, &chat);
                assert_eq!(update.revision, 1);
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[test]
    fn test_ping_gets_pong() {
        let (mut machine, mut peer) = ready_machine();
        let actions = machine.on_frame(peer_frame(&mut peer, &Stanza::Ping));
        assert!(matches!(actions[0], Action::Reply(Stanza::Pong)));

        // The reply encrypts under the machine's send key and the peer reads it
        let Action::Reply(reply) = &actions[0] else { unreachable!() };
        let frame = machine.encrypt_stanza(reply).unwrap();
        let plaintext = peer.decrypt(&frame.payload).unwrap();
        assert_eq!(Stanza::decode(&plaintext).unwrap(), Stanza::Pong);
    }

    #[test]
    fn test_tampered_frame_tears_down() {
        let (mut machine, mut peer) = ready_machine();
        let mut frame = peer_frame(&mut peer, &Stanza::Ping);
        frame.payload[0] ^= 0x01;

        let actions = machine.on_frame(frame);
        assert!(matches!(
            actions[0],
            Action::Teardown(DisconnectReason::SessionFailure(_))
        ));
        assert_eq!(machine.phase(), Phase::Closing);
    }

    #[test]
    fn test_rekey_stanza_rotates_receive() {
        let (mut machine, mut peer) = ready_machine();

        // Peer announces, rotates, then sends under the fresh key
        let announce = peer_frame(&mut peer, &Stanza::Rekey);
        peer.rotate_send();
        let after = peer_frame(&mut peer, &Stanza::Ping);

        assert!(machine.on_frame(announce).is_empty());
        let actions = machine.on_frame(after);
        assert!(matches!(actions[0], Action::Reply(Stanza::Pong)));
    }

    #[test]
    fn test_rekey_send_announces_then_rotates() {
        let (mut machine, mut peer) = ready_machine();

        let announce = machine.rekey_send().unwrap();
        let plaintext = peer.decrypt(&announce.payload).unwrap();
        assert_eq!(Stanza::decode(&plaintext).unwrap(), Stanza::Rekey);

        // Frames after the announcement need the mirrored rotation
        peer.rotate_recv();
        let frame = machine.encrypt_stanza(&Stanza::Ping).unwrap();
        assert_eq!(
            Stanza::decode(&peer.decrypt(&frame.payload).unwrap()).unwrap(),
            Stanza::Ping
        );
    }

    #[test]
    fn test_server_close_transitions_to_closing() {
        let (mut machine, mut peer) = ready_machine();
        let frame = peer_frame(&mut peer, &Stanza::Close { reason: Some("bye".into()) });

        let actions = machine.on_frame(frame);
        assert!(matches!(
            actions[0],
            Action::Teardown(DisconnectReason::ServerRequested)
        ));
        assert_eq!(machine.phase(), Phase::Closing);

        // Everything after the close is dropped
        let late = peer_frame(&mut peer, &Stanza::Ping);
        assert!(machine.on_frame(late).is_empty());
    }

    #[test]
    fn test_undecodable_stanza_dropped_in_ready() {
        let (mut machine, mut peer) = ready_machine();
        let frame = Frame::encrypted(peer.encrypt(&[0xEE, 0x00]).unwrap());

        let actions = machine.on_frame(frame);
        assert!(actions.is_empty());
        assert_eq!(machine.phase(), Phase::Ready);
    }

    #[test]
    fn test_encrypt_requires_session() {
        let mut machine = Machine::new();
        assert_eq!(
            machine.encrypt_stanza(&Stanza::Ping),
            Err(ProtocolError::NotReady)
        );
    }

    #[test]
    fn test_handshake_derived_sessions_drive_machine() {
        use crate::crypto::{Handshake, KeyPair, Role};
        use crate::sync::{ChatMessage, MessageStatus};
        use crate::wire::Conversation;

        const PROLOGUE: &[u8] = &[b'W', b'S', 1, 0];

        // Real 3-message exchange between both roles
        let mut initiator = Handshake::new(Role::Initiator, KeyPair::generate(), PROLOGUE);
        let mut responder = Handshake::new(Role::Responder, KeyPair::generate(), PROLOGUE);

        let e1 = initiator.write_message_one().unwrap();
        responder.read_message_one(&e1).unwrap();
        let (e2, enc_s, enc_p) = responder.write_message_two(b"").unwrap();
        initiator.read_message_two(&e2, &enc_s, &enc_p).unwrap();
        let (enc_s, enc_p) = initiator.write_message_three(b"").unwrap();
        responder.read_message_three(&enc_s, &enc_p).unwrap();

        let remote_static = initiator.remote_static().unwrap();
        let (i_send, i_recv) = initiator.split();
        let (r_send, r_recv) = responder.split();

        let mut machine = Machine::new();
        machine.begin_handshake();
        machine.install_session(Session::new(i_send, i_recv, remote_static, 0));
        let mut server = Session::new(r_send, r_recv, [0u8; 32], 0);

        // Server acks the login, then delivers history out of timestamp order
        let ack = Frame::encrypted(
            server
                .encrypt(&Stanza::LoginAck { ok: true, error: None }.encode())
                .unwrap(),
        );
        machine.on_frame(ack);
        assert_eq!(machine.phase(), Phase::Ready);

        let chat = Jid::new("123", "s.whatsapp.net");
        let message = |id: &str, timestamp: i64| ChatMessage {
            id: id.to_string(),
            sender: chat.clone(),
            timestamp,
            text: String::new(),
            from_me: false,
            status: MessageStatus::Sent,
        };
        let history = Stanza::HistorySync {
            conversations: vec![Conversation {
                jid: chat.clone(),
                name: None,
                messages: vec![message("m1", 5), message("m2", 3)],
            }],
        };
        let frame = Frame::encrypted(server.encrypt(&history.encode()).unwrap());

        let actions = machine.on_frame(frame);
        match &actions[0] {
            Action::Sync(SyncInput::History(conversations)) => {
                assert_eq!(conversations[0].messages.len(), 2);
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[test]
    fn test_reconnect_flag_on_second_login() {
        let (mut machine, _peer) = ready_machine();

        // Tear down and authenticate again, as a reconnect would
        machine.begin_close();
        machine.finish_close();
        machine.begin_handshake();
        let k1 = [0x31; 32];
        let k2 = [0x32; 32];
        machine.install_session(Session::new(k1, k2, [0xcc; 32], 0));
        let mut peer = Session::new(k2, k1, [0xdd; 32], 0);

        let frame = peer_frame(&mut peer, &Stanza::LoginAck { ok: true, error: None });
        let actions = machine.on_frame(frame);
        assert!(matches!(
            actions[0],
            Action::Emit(Event::Connected(Connected { is_reconnect: true }))
        ));
    }
}
