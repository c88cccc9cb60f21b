//! High-level session client.
//!
//! Wires the transport, handshake, state machine, sync engine and
//! dispatcher together: connect performs the 3-message handshake and the
//! encrypted login, run drives the frame loop with automatic reconnect,
//! and disconnect tears the session down in order.

use std::sync::Arc;

use log::{debug, info, warn};
use prost::Message as ProstMessage;
use thiserror::Error;
use tokio::time::sleep;

use crate::config::ClientConfig;
use crate::crypto::{verify_signature, Handshake, IdentityKeyPair, Role};
use crate::dispatch::{Dispatcher, ListenerError};
use crate::proto::{signed_ephemerals, AuthPayload, HandshakeFrame};
use crate::protocol::{Action, Machine, Phase, ProtocolError, Session, SyncInput};
use crate::sync::{ChatMessage, MessageStatus, SyncEngine, Update, UpdateOp};
use crate::transport::{
    Frame, FrameReader, FrameTag, FrameWriter, Transport, TransportError, CONNECTION_HEADER,
};
use crate::types::{
    new_message_id, DisconnectReason, Disconnected, Event, EventCategory, Jid, MessageId,
};
use crate::wire::Stanza;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("already connected")]
    AlreadyConnected,
    #[error("not connected")]
    NotConnected,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("gave up after {0} reconnect attempts")]
    ReconnectExhausted(u32),
}

/// How a driven session ended.
enum SessionEnd {
    /// The local caller asked for the close
    LocalClose,
    /// The server closed, or the session failed fatally
    Terminal(DisconnectReason),
    /// Transient transport failure, eligible for reconnect
    Transient(TransportError),
}

/// A connected session pipeline.
pub struct Client {
    config: ClientConfig,
    identity: IdentityKeyPair,
    jid: Jid,
    machine: Machine,
    engine: Arc<SyncEngine>,
    dispatcher: Arc<Dispatcher>,
    writer: Option<FrameWriter>,
    frames: Option<FrameReader>,
    closing: bool,
}

impl Client {
    /// Create a client for an identity and its registered jid.
    pub fn new(config: ClientConfig, identity: IdentityKeyPair, jid: Jid) -> Self {
        Self {
            config,
            identity,
            jid,
            machine: Machine::new(),
            engine: Arc::new(SyncEngine::new()),
            dispatcher: Arc::new(Dispatcher::new()),
            writer: None,
            frames: None,
            closing: false,
        }
    }

    /// The in-memory chat model.
    pub fn chats(&self) -> Arc<SyncEngine> {
        Arc::clone(&self.engine)
    }

    /// The jid this client is registered as.
    pub fn jid(&self) -> &Jid {
        &self.jid
    }

    /// Current protocol phase.
    pub fn phase(&self) -> Phase {
        self.machine.phase()
    }

    /// Whether the session is in the ready phase.
    pub fn is_connected(&self) -> bool {
        self.machine.phase() == Phase::Ready
    }

    /// Register an event listener for one category.
    pub fn add_listener<F>(&self, category: EventCategory, listener: F)
    where
        F: Fn(&Event) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.dispatcher.add_listener(category, listener);
    }

    /// Connect, handshake and log in. On success the machine sits in the
    /// authenticating phase waiting for the server's ack; [`Client::run`]
    /// drives it the rest of the way.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        if self.writer.is_some() {
            return Err(ClientError::AlreadyConnected);
        }
        self.closing = false;
        self.establish().await
    }

    /// Dial, run the 3-message handshake, install the session and send the
    /// login request.
    async fn establish(&mut self) -> Result<(), ClientError> {
        self.machine.begin_handshake();
        let mut transport = Transport::connect(&self.config.endpoint).await?;

        let mut handshake =
            Handshake::new(Role::Initiator, self.identity.dh.clone(), &CONNECTION_HEADER);

        // -> e
        let local_ephemeral = handshake
            .write_message_one()
            .map_err(|e| ClientError::Handshake(e.to_string()))?;
        let hello = HandshakeFrame::hello(local_ephemeral);
        transport
            .send_frame(&Frame::plaintext(hello.to_bytes()))
            .await?;

        // <- e, ee, s, es
        let frame = transport.recv_frame().await?;
        if frame.tag != FrameTag::Plaintext {
            return Err(ClientError::Handshake(
                "expected plaintext handshake frame".into(),
            ));
        }
        let decoded = HandshakeFrame::decode(&frame.payload[..])
            .map_err(|e| ClientError::Handshake(e.to_string()))?;
        let server_hello = decoded
            .server_hello
            .ok_or_else(|| ClientError::Handshake("missing server hello".into()))?;

        let ephemeral = server_hello
            .ephemeral
            .ok_or_else(|| ClientError::Handshake("missing server ephemeral".into()))?;
        let server_ephemeral: [u8; 32] = ephemeral
            .try_into()
            .map_err(|_| ClientError::Handshake("invalid server ephemeral length".into()))?;
        let encrypted_static = server_hello
            .r#static
            .ok_or_else(|| ClientError::Handshake("missing server static".into()))?;
        let encrypted_payload = server_hello
            .payload
            .ok_or_else(|| ClientError::Handshake("missing server payload".into()))?;

        let payload = handshake
            .read_message_two(&server_ephemeral, &encrypted_static, &encrypted_payload)
            .map_err(|e| ClientError::Handshake(e.to_string()))?;
        verify_auth_payload(&payload, &server_ephemeral, &local_ephemeral)?;

        // -> s, se
        let signature = self
            .identity
            .sign(&signed_ephemerals(&local_ephemeral, &server_ephemeral));
        let auth = AuthPayload {
            jid: Some(self.jid.to_string()),
            device_name: Some(self.config.device_name.clone()),
            verify_key: Some(self.identity.verify_key().to_vec()),
            signature: Some(signature.to_vec()),
            timestamp: Some(chrono::Utc::now().timestamp()),
        };
        let mut payload_bytes = Vec::with_capacity(auth.encoded_len());
        auth.encode(&mut payload_bytes)
            .map_err(|e| ClientError::Handshake(e.to_string()))?;
        let (encrypted_static, encrypted_payload) = handshake
            .write_message_three(&payload_bytes)
            .map_err(|e| ClientError::Handshake(e.to_string()))?;
        let finish = HandshakeFrame::finish(encrypted_static, encrypted_payload);
        transport
            .send_frame(&Frame::plaintext(finish.to_bytes()))
            .await?;

        let remote_static = handshake
            .remote_static()
            .ok_or_else(|| ClientError::Handshake("no remote static key".into()))?;
        let (send_key, recv_key) = handshake.split();
        self.machine.install_session(Session::new(
            send_key,
            recv_key,
            remote_static,
            self.config.rekey_after,
        ));
        debug!("handshake complete, authenticating as {}", self.jid);

        // Login request travels encrypted; the reply drives the machine to
        // the ready phase inside run()
        let (mut writer, frames) = transport.split(self.config.queue_depth);
        let login = Stanza::LoginRequest {
            jid: self.jid.clone(),
            device_name: self.config.device_name.clone(),
            timestamp: chrono::Utc::now().timestamp(),
        };
        let frame = self.machine.encrypt_stanza(&login)?;
        writer.send_frame(&frame).await?;

        self.writer = Some(writer);
        self.frames = Some(frames);
        Ok(())
    }

    /// Drop both transport halves and finish the machine teardown.
    fn teardown_halves(&mut self) {
        self.writer = None;
        self.frames = None;
        self.machine.finish_close();
    }

    /// Process a single inbound frame, the way a caller-driven receive loop
    /// wants it. Returns `Ok(true)` while the session is alive, `Ok(false)`
    /// once it ended in order. Transient transport failures surface as
    /// errors; use [`Client::run`] for automatic reconnects instead.
    pub async fn process_next(&mut self) -> Result<bool, ClientError> {
        let Some(frames) = self.frames.as_mut() else {
            return Err(ClientError::NotConnected);
        };

        match frames.next().await {
            None => {
                self.teardown_halves();
                Err(TransportError::ConnectionClosed.into())
            }
            Some(Err(e)) => {
                self.teardown_halves();
                Err(e.into())
            }
            Some(Ok(frame)) => {
                let actions = self.machine.on_frame(frame);
                match self.handle_actions(actions).await {
                    None => Ok(true),
                    Some(SessionEnd::LocalClose) => {
                        self.teardown_halves();
                        Ok(false)
                    }
                    Some(SessionEnd::Terminal(reason)) => {
                        self.teardown_halves();
                        self.dispatcher
                            .dispatch(&Event::Disconnected(Disconnected { reason }));
                        Ok(false)
                    }
                    Some(SessionEnd::Transient(e)) => {
                        self.teardown_halves();
                        Err(e.into())
                    }
                }
            }
        }
    }

    /// Drive the session until it ends. Transient failures reconnect with
    /// exponential backoff and full jitter, re-entering at the handshake
    /// with a fresh session, unless the caller closed the client.
    pub async fn run(&mut self) -> Result<(), ClientError> {
        if self.writer.is_none() {
            return Err(ClientError::NotConnected);
        }

        loop {
            let end = self.drive_session().await;
            self.teardown_halves();

            match end {
                SessionEnd::LocalClose => {
                    self.dispatcher.dispatch(&Event::Disconnected(Disconnected {
                        reason: DisconnectReason::ClosedByUser,
                    }));
                    return Ok(());
                }
                SessionEnd::Terminal(DisconnectReason::ServerRequested) => {
                    self.dispatcher.dispatch(&Event::Disconnected(Disconnected {
                        reason: DisconnectReason::ServerRequested,
                    }));
                    return Ok(());
                }
                SessionEnd::Terminal(reason) => {
                    self.dispatcher.dispatch(&Event::Disconnected(Disconnected {
                        reason: reason.clone(),
                    }));
                    if !self.config.auto_reconnect {
                        return Ok(());
                    }
                    info!("session failed ({:?}), restarting handshake", reason);
                }
                SessionEnd::Transient(error) => {
                    self.dispatcher.dispatch(&Event::Disconnected(Disconnected {
                        reason: DisconnectReason::NetworkError(error.to_string()),
                    }));
                    if !self.config.auto_reconnect {
                        return Err(ClientError::Transport(error));
                    }
                }
            }

            self.reconnect().await?;
        }
    }

    /// Reconnect with backoff until a session is established or the
    /// configured attempt cap is reached.
    async fn reconnect(&mut self) -> Result<(), ClientError> {
        let mut attempt: u32 = 0;
        loop {
            if self.closing {
                return Err(ClientError::NotConnected);
            }
            let delay = self.config.reconnect.delay(attempt);
            debug!("reconnect attempt {} in {:?}", attempt + 1, delay);
            sleep(delay).await;

            match self.establish().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("reconnect attempt {} failed: {}", attempt + 1, e);
                    attempt += 1;
                    let cap = self.config.max_reconnect_attempts;
                    if cap != 0 && attempt >= cap {
                        return Err(ClientError::ReconnectExhausted(cap));
                    }
                }
            }
        }
    }

    /// Consume frames until the session ends one way or another.
    async fn drive_session(&mut self) -> SessionEnd {
        loop {
            if self.closing {
                return SessionEnd::LocalClose;
            }
            let Some(frames) = self.frames.as_mut() else {
                return SessionEnd::LocalClose;
            };

            match frames.next().await {
                None => return SessionEnd::Transient(TransportError::ConnectionClosed),
                Some(Err(e)) if e.is_transient() => return SessionEnd::Transient(e),
                Some(Err(e)) => {
                    return SessionEnd::Terminal(DisconnectReason::SessionFailure(e.to_string()))
                }
                Some(Ok(frame)) => {
                    let actions = self.machine.on_frame(frame);
                    if let Some(end) = self.handle_actions(actions).await {
                        return end;
                    }
                }
            }
        }
    }

    /// Execute the work one frame produced.
    async fn handle_actions(&mut self, actions: Vec<Action>) -> Option<SessionEnd> {
        for action in actions {
            match action {
                Action::Reply(stanza) => {
                    if let Some(end) = self.send_stanza(&stanza).await {
                        return Some(end);
                    }
                }
                Action::Sync(input) => {
                    let events = self.apply_sync(input).await;
                    for event in events {
                        self.dispatcher.dispatch(&event);
                    }
                }
                Action::Emit(event) => self.dispatcher.dispatch(&event),
                Action::Teardown(reason) => return Some(SessionEnd::Terminal(reason)),
            }
        }
        None
    }

    async fn send_stanza(&mut self, stanza: &Stanza) -> Option<SessionEnd> {
        let frame = match self.machine.encrypt_stanza(stanza) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("dropping outbound {}: {}", stanza.kind(), e);
                return None;
            }
        };
        let writer = self.writer.as_mut()?;
        match writer.send_frame(&frame).await {
            Ok(_seq) => None,
            Err(e) => Some(SessionEnd::Transient(e)),
        }
    }

    /// Route a model mutation into the sync engine.
    async fn apply_sync(&mut self, input: SyncInput) -> Vec<Event> {
        match input {
            SyncInput::Update { chat, update } => {
                let (_outcome, events) = self.engine.apply_update(&chat, update).await;
                events
            }
            SyncInput::History(conversations) => self.engine.apply_history(conversations).await,
            SyncInput::Presence { chat, participant, kind, last_seen } => {
                self.engine
                    .apply_presence(&chat, participant, kind, last_seen)
                    .await
            }
            SyncInput::Receipt { chat, sender, message_ids, kind, timestamp } => {
                self.engine
                    .apply_receipt(&chat, sender, &message_ids, kind, timestamp)
                    .await
            }
            SyncInput::Contact { jid, display_name } => {
                self.engine.register_contact(&jid, display_name).await
            }
        }
    }

    /// Send a text message. Only valid in the ready phase. The local echo
    /// goes through the sync engine so a later server echo deduplicates.
    pub async fn send_message(&mut self, to: Jid, text: &str) -> Result<MessageId, ClientError> {
        if self.machine.phase() != Phase::Ready {
            return Err(ClientError::NotConnected);
        }

        let message = ChatMessage {
            id: new_message_id(),
            sender: self.jid.clone(),
            timestamp: chrono::Utc::now().timestamp(),
            text: text.to_string(),
            from_me: true,
            status: MessageStatus::Sent,
        };
        let id = message.id.clone();

        let stanza = Stanza::ChatUpdate {
            chat: to.clone(),
            update: Update {
                revision: 0,
                op: UpdateOp::Message(message.clone()),
            },
        };
        let frame = self.machine.encrypt_stanza(&stanza)?;
        let writer = self.writer.as_mut().ok_or(ClientError::NotConnected)?;
        writer.send_frame(&frame).await?;

        let events = self.engine.record_outgoing(&to, message).await;
        for event in events {
            self.dispatcher.dispatch(&event);
        }
        Ok(id)
    }

    /// Rotate the send key now and tell the peer.
    pub async fn force_rekey(&mut self) -> Result<(), ClientError> {
        if self.machine.phase() != Phase::Ready {
            return Err(ClientError::NotConnected);
        }
        let frame = self.machine.rekey_send()?;
        let writer = self.writer.as_mut().ok_or(ClientError::NotConnected)?;
        writer.send_frame(&frame).await?;
        Ok(())
    }

    /// Close the session: pending sends are cancelled, no further frames
    /// are flushed, and the machine walks closing into disconnected.
    pub async fn disconnect(&mut self) -> Result<(), ClientError> {
        if self.writer.is_none() {
            return Err(ClientError::NotConnected);
        }
        self.closing = true;

        // Best-effort close announcement while the session still exists
        if let Ok(frame) = self.machine.encrypt_stanza(&Stanza::Close { reason: None }) {
            if let Some(writer) = self.writer.as_mut() {
                let _ = writer.send_frame(&frame).await;
            }
        }

        self.machine.begin_close();
        if let Some(writer) = self.writer.as_mut() {
            let _ = writer.close().await;
        }
        self.teardown_halves();

        self.dispatcher.dispatch(&Event::Disconnected(Disconnected {
            reason: DisconnectReason::ClosedByUser,
        }));
        Ok(())
    }
}

/// Check the server's identity signature over the session ephemerals.
fn verify_auth_payload(
    payload: &[u8],
    server_ephemeral: &[u8; 32],
    local_ephemeral: &[u8; 32],
) -> Result<(), ClientError> {
    let auth = AuthPayload::decode(payload)
        .map_err(|e| ClientError::Handshake(format!("invalid auth payload: {}", e)))?;

    let verify_key: [u8; 32] = auth
        .verify_key
        .ok_or_else(|| ClientError::Handshake("missing server verify key".into()))?
        .try_into()
        .map_err(|_| ClientError::Handshake("invalid server verify key length".into()))?;
    let signature: [u8; 64] = auth
        .signature
        .ok_or_else(|| ClientError::Handshake("missing server signature".into()))?
        .try_into()
        .map_err(|_| ClientError::Handshake("invalid server signature length".into()))?;

    // The server signs its own ephemeral first
    let message = signed_ephemerals(server_ephemeral, local_ephemeral);
    if !verify_signature(&verify_key, &message, &signature) {
        return Err(ClientError::Handshake(
            "server identity verification failed".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn test_client() -> Client {
        Client::new(
            ClientConfig::default().without_auto_reconnect(),
            IdentityKeyPair::generate(),
            Jid::new("15550001111", "s.whatsapp.net"),
        )
    }

    #[test]
    fn test_new_client_is_disconnected() {
        let client = test_client();
        assert_eq!(client.phase(), Phase::Disconnected);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_send_requires_ready() {
        let mut client = test_client();
        let to = Jid::new("15550002222", "s.whatsapp.net");
        assert!(matches!(
            client.send_message(to, "hi").await,
            Err(ClientError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_requires_connection() {
        let mut client = test_client();
        assert!(matches!(
            client.disconnect().await,
            Err(ClientError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_run_requires_connection() {
        let mut client = test_client();
        assert!(matches!(client.run().await, Err(ClientError::NotConnected)));
    }

    #[test]
    fn test_verify_auth_payload_accepts_valid_signature() {
        let identity = IdentityKeyPair::generate();
        let server_e = KeyPair::generate().public;
        let client_e = KeyPair::generate().public;

        let auth = AuthPayload {
            jid: None,
            device_name: Some("server".into()),
            verify_key: Some(identity.verify_key().to_vec()),
            signature: Some(
                identity
                    .sign(&signed_ephemerals(&server_e, &client_e))
                    .to_vec(),
            ),
            timestamp: None,
        };
        let mut bytes = Vec::new();
        auth.encode(&mut bytes).unwrap();

        assert!(verify_auth_payload(&bytes, &server_e, &client_e).is_ok());
    }

    #[test]
    fn test_verify_auth_payload_rejects_wrong_ephemerals() {
        let identity = IdentityKeyPair::generate();
        let server_e = KeyPair::generate().public;
        let client_e = KeyPair::generate().public;

        // Signature over the reversed order does not verify
        let auth = AuthPayload {
            jid: None,
            device_name: None,
            verify_key: Some(identity.verify_key().to_vec()),
            signature: Some(
                identity
                    .sign(&signed_ephemerals(&client_e, &server_e))
                    .to_vec(),
            ),
            timestamp: None,
        };
        let mut bytes = Vec::new();
        auth.encode(&mut bytes).unwrap();

        assert!(verify_auth_payload(&bytes, &server_e, &client_e).is_err());
    }
}
