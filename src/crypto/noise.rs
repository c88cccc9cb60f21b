//! Noise-style handshake for session establishment.
//!
//! A 3-message XX-pattern key exchange (`-> e`, `<- e, ee, s, es`,
//! `-> s, se`) over a SHA-256 transcript hash and an HKDF-SHA256 chaining
//! key. Both roles are implemented so a session pair can be driven fully
//! in-memory. Mutual authentication is layered on top by each side signing
//! the session's ephemeral keys with its long-term identity key (see
//! [`crate::proto::AuthPayload`]).

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use sha2::{Digest, Sha256};

use crate::crypto::{derive_key_pair, KeyPair};

/// Handshake pattern identifier (exactly 32 bytes).
const PATTERN: &[u8; 32] = b"Noise_XX_25519_AESGCM_SHA256\x00\x00\x00\x00";

/// Which side of the handshake this state drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Handshake state for one side of the exchange.
pub struct Handshake {
    role: Role,
    local_static: KeyPair,
    local_ephemeral: KeyPair,
    remote_static: Option<[u8; 32]>,
    remote_ephemeral: Option<[u8; 32]>,
    /// Transcript hash (h)
    hash: [u8; 32],
    /// Chaining key (ck)
    chaining_key: [u8; 32],
    /// Current handshake cipher key, valid once a DH result was mixed in
    key: Option<[u8; 32]>,
    /// Nonce counter for the handshake cipher, reset on every mix_key
    counter: u32,
}

impl Handshake {
    /// Initialize handshake state. The prologue (connection header) is mixed
    /// into the transcript so both sides must agree on it.
    pub fn new(role: Role, local_static: KeyPair, prologue: &[u8]) -> Self {
        let mut hs = Self {
            role,
            local_static,
            local_ephemeral: KeyPair::generate(),
            remote_static: None,
            remote_ephemeral: None,
            hash: *PATTERN,
            chaining_key: *PATTERN,
            key: None,
            counter: 0,
        };
        hs.mix_hash(prologue);
        hs
    }

    /// The ephemeral public key generated for this session.
    pub fn local_ephemeral_public(&self) -> [u8; 32] {
        self.local_ephemeral.public
    }

    /// The peer's ephemeral public key, once received.
    pub fn remote_ephemeral(&self) -> Option<[u8; 32]> {
        self.remote_ephemeral
    }

    /// The peer's static public key, once received.
    pub fn remote_static(&self) -> Option<[u8; 32]> {
        self.remote_static
    }

    /// Mix data into the transcript hash.
    fn mix_hash(&mut self, data: &[u8]) {
        let mut hasher = Sha256::new();
        hasher.update(self.hash);
        hasher.update(data);
        self.hash = hasher.finalize().into();
    }

    /// Mix a DH result into the chaining key and install a fresh cipher key.
    fn mix_key(&mut self, ikm: &[u8]) {
        let (ck, key) = derive_key_pair(&self.chaining_key, ikm);
        self.chaining_key = ck;
        self.key = Some(key);
        self.counter = 0;
    }

    /// Counter in the last 4 bytes, big-endian.
    fn handshake_nonce(&self) -> [u8; 12] {
        let mut iv = [0u8; 12];
        iv[8..12].copy_from_slice(&self.counter.to_be_bytes());
        iv
    }

    /// Encrypt with the handshake cipher, authenticating the transcript.
    fn encrypt_and_hash(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        let key = self.key.ok_or(HandshakeError::OutOfOrder)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| HandshakeError::EncryptionFailed)?;
        let nonce = self.handshake_nonce();
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                aes_gcm::aead::Payload { msg: plaintext, aad: &self.hash },
            )
            .map_err(|_| HandshakeError::EncryptionFailed)?;
        self.counter += 1;
        self.mix_hash(&ciphertext);
        Ok(ciphertext)
    }

    /// Decrypt with the handshake cipher, verifying the transcript.
    fn decrypt_and_hash(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        let key = self.key.ok_or(HandshakeError::OutOfOrder)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| HandshakeError::DecryptionFailed)?;
        let nonce = self.handshake_nonce();
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                aes_gcm::aead::Payload { msg: ciphertext, aad: &self.hash },
            )
            .map_err(|_| HandshakeError::DecryptionFailed)?;
        self.counter += 1;
        self.mix_hash(ciphertext);
        Ok(plaintext)
    }

    /// Initiator message 1 (`-> e`): the bare ephemeral public key.
    pub fn write_message_one(&mut self) -> Result<[u8; 32], HandshakeError> {
        if self.role != Role::Initiator {
            return Err(HandshakeError::OutOfOrder);
        }
        let ephemeral = self.local_ephemeral.public;
        self.mix_hash(&ephemeral);
        Ok(ephemeral)
    }

    /// Responder side of message 1.
    pub fn read_message_one(&mut self, ephemeral: &[u8; 32]) -> Result<(), HandshakeError> {
        if self.role != Role::Responder {
            return Err(HandshakeError::OutOfOrder);
        }
        self.remote_ephemeral = Some(*ephemeral);
        self.mix_hash(ephemeral);
        Ok(())
    }

    /// Responder message 2 (`<- e, ee, s, es` + payload).
    ///
    /// Returns the ephemeral public key, the encrypted static key and the
    /// encrypted payload.
    pub fn write_message_two(
        &mut self,
        payload: &[u8],
    ) -> Result<([u8; 32], Vec<u8>, Vec<u8>), HandshakeError> {
        if self.role != Role::Responder {
            return Err(HandshakeError::OutOfOrder);
        }
        let remote_e = self.remote_ephemeral.ok_or(HandshakeError::MissingRemoteKey)?;

        let ephemeral = self.local_ephemeral.public;
        self.mix_hash(&ephemeral);

        // ee
        let shared = self.local_ephemeral.dh(&remote_e);
        self.mix_key(&shared);

        // s
        let static_public = self.local_static.public;
        let encrypted_static = self.encrypt_and_hash(&static_public)?;

        // es (responder side: own static against peer ephemeral)
        let shared = self.local_static.dh(&remote_e);
        self.mix_key(&shared);

        let encrypted_payload = self.encrypt_and_hash(payload)?;

        Ok((ephemeral, encrypted_static, encrypted_payload))
    }

    /// Initiator side of message 2. Returns the decrypted payload.
    pub fn read_message_two(
        &mut self,
        ephemeral: &[u8; 32],
        encrypted_static: &[u8],
        encrypted_payload: &[u8],
    ) -> Result<Vec<u8>, HandshakeError> {
        if self.role != Role::Initiator {
            return Err(HandshakeError::OutOfOrder);
        }

        self.remote_ephemeral = Some(*ephemeral);
        self.mix_hash(ephemeral);

        // ee
        let shared = self.local_ephemeral.dh(ephemeral);
        self.mix_key(&shared);

        // s
        let remote_static = self.decrypt_and_hash(encrypted_static)?;
        if remote_static.len() != 32 {
            return Err(HandshakeError::InvalidKeySize);
        }
        let mut remote_s = [0u8; 32];
        remote_s.copy_from_slice(&remote_static);
        self.remote_static = Some(remote_s);

        // es
        let shared = self.local_ephemeral.dh(&remote_s);
        self.mix_key(&shared);

        self.decrypt_and_hash(encrypted_payload)
    }

    /// Initiator message 3 (`-> s, se` + payload).
    ///
    /// Returns the encrypted static key and the encrypted payload.
    pub fn write_message_three(
        &mut self,
        payload: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>), HandshakeError> {
        if self.role != Role::Initiator {
            return Err(HandshakeError::OutOfOrder);
        }
        let remote_e = self.remote_ephemeral.ok_or(HandshakeError::MissingRemoteKey)?;

        // s
        let static_public = self.local_static.public;
        let encrypted_static = self.encrypt_and_hash(&static_public)?;

        // se
        let shared = self.local_static.dh(&remote_e);
        self.mix_key(&shared);

        let encrypted_payload = self.encrypt_and_hash(payload)?;

        Ok((encrypted_static, encrypted_payload))
    }

    /// Responder side of message 3. Returns the decrypted payload.
    pub fn read_message_three(
        &mut self,
        encrypted_static: &[u8],
        encrypted_payload: &[u8],
    ) -> Result<Vec<u8>, HandshakeError> {
        if self.role != Role::Responder {
            return Err(HandshakeError::OutOfOrder);
        }

        // s
        let remote_static = self.decrypt_and_hash(encrypted_static)?;
        if remote_static.len() != 32 {
            return Err(HandshakeError::InvalidKeySize);
        }
        let mut remote_s = [0u8; 32];
        remote_s.copy_from_slice(&remote_static);
        self.remote_static = Some(remote_s);

        // se (responder side: own ephemeral against peer static)
        let shared = self.local_ephemeral.dh(&remote_s);
        self.mix_key(&shared);

        self.decrypt_and_hash(encrypted_payload)
    }

    /// Split into directional transport keys after the exchange completes.
    ///
    /// Returns `(send_key, recv_key)` for this side's role.
    pub fn split(self) -> ([u8; 32], [u8; 32]) {
        let (first, second) = derive_key_pair(&self.chaining_key, &[]);
        match self.role {
            Role::Initiator => (first, second),
            Role::Responder => (second, first),
        }
    }
}

/// Handshake errors.
#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeError {
    MessageTooShort,
    DecryptionFailed,
    EncryptionFailed,
    InvalidKeySize,
    MissingRemoteKey,
    OutOfOrder,
}

impl std::fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandshakeError::MessageTooShort => write!(f, "message too short"),
            HandshakeError::DecryptionFailed => write!(f, "decryption failed"),
            HandshakeError::EncryptionFailed => write!(f, "encryption failed"),
            HandshakeError::InvalidKeySize => write!(f, "invalid key size"),
            HandshakeError::MissingRemoteKey => write!(f, "missing remote key"),
            HandshakeError::OutOfOrder => write!(f, "handshake message out of order"),
        }
    }
}

impl std::error::Error for HandshakeError {}

#[cfg(test)]
mod tests {
    use super::*;

    const PROLOGUE: &[u8] = &[b'W', b'S', 1, 0];

    fn run_handshake() -> (Handshake, Handshake) {
        let mut initiator =
            Handshake::new(Role::Initiator, KeyPair::generate(), PROLOGUE);
        let mut responder =
            Handshake::new(Role::Responder, KeyPair::generate(), PROLOGUE);

        let e1 = initiator.write_message_one().unwrap();
        responder.read_message_one(&e1).unwrap();

        let (e2, enc_s, enc_payload) = responder.write_message_two(b"server payload").unwrap();
        let payload = initiator.read_message_two(&e2, &enc_s, &enc_payload).unwrap();
        assert_eq!(payload, b"server payload");

        let (enc_s, enc_payload) = initiator.write_message_three(b"client payload").unwrap();
        let payload = responder.read_message_three(&enc_s, &enc_payload).unwrap();
        assert_eq!(payload, b"client payload");

        (initiator, responder)
    }

    #[test]
    fn test_full_exchange_derives_matching_keys() {
        let (initiator, responder) = run_handshake();

        assert_eq!(initiator.remote_static(), Some(responder.local_static.public));
        assert_eq!(responder.remote_static(), Some(initiator.local_static.public));

        let (i_send, i_recv) = initiator.split();
        let (r_send, r_recv) = responder.split();
        assert_eq!(i_send, r_recv);
        assert_eq!(i_recv, r_send);
        assert_ne!(i_send, i_recv);
    }

    #[test]
    fn test_prologue_mismatch_fails() {
        let mut initiator =
            Handshake::new(Role::Initiator, KeyPair::generate(), PROLOGUE);
        let mut responder =
            Handshake::new(Role::Responder, KeyPair::generate(), b"different");

        let e1 = initiator.write_message_one().unwrap();
        responder.read_message_one(&e1).unwrap();

        // Transcripts diverge, so the first authenticated read fails
        let (e2, enc_s, enc_payload) = responder.write_message_two(b"payload").unwrap();
        assert_eq!(
            initiator.read_message_two(&e2, &enc_s, &enc_payload),
            Err(HandshakeError::DecryptionFailed)
        );
    }

    #[test]
    fn test_tampered_static_fails() {
        let mut initiator =
            Handshake::new(Role::Initiator, KeyPair::generate(), PROLOGUE);
        let mut responder =
            Handshake::new(Role::Responder, KeyPair::generate(), PROLOGUE);

        let e1 = initiator.write_message_one().unwrap();
        responder.read_message_one(&e1).unwrap();

        let (e2, mut enc_s, enc_payload) = responder.write_message_two(b"payload").unwrap();
        enc_s[0] ^= 0x01;
        assert_eq!(
            initiator.read_message_two(&e2, &enc_s, &enc_payload),
            Err(HandshakeError::DecryptionFailed)
        );
    }

    #[test]
    fn test_role_enforcement() {
        let mut responder =
            Handshake::new(Role::Responder, KeyPair::generate(), PROLOGUE);
        assert_eq!(responder.write_message_one(), Err(HandshakeError::OutOfOrder));

        let mut initiator =
            Handshake::new(Role::Initiator, KeyPair::generate(), PROLOGUE);
        assert_eq!(
            initiator.read_message_one(&[0u8; 32]),
            Err(HandshakeError::OutOfOrder)
        );
        // Message 3 before message 2 has no remote ephemeral to bind to
        assert_eq!(
            initiator.write_message_three(b"payload"),
            Err(HandshakeError::MissingRemoteKey)
        );
    }
}
