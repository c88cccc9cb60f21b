//! AES-GCM transport cipher.
//!
//! One cipher instance covers one direction of a session. Nonces are derived
//! from a message counter and never reused; the key ratchets forward every
//! `rekey_after` messages or on an explicit rotate call. All calls take
//! `&mut self` and are funneled through the state-machine task, so a rotation
//! can never race an in-flight encrypt or decrypt.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};

use crate::crypto::Hkdf;

/// Domain separator for the key ratchet.
const REKEY_INFO: &[u8] = b"transport key ratchet";

/// Default number of messages a key covers before it rotates.
pub const DEFAULT_REKEY_AFTER: u64 = 1024;

/// AES-256-GCM cipher with a counter nonce and a forward key ratchet.
pub struct Cipher {
    key: [u8; 32],
    nonce_counter: u64,
    rekey_after: u64,
    generation: u64,
}

impl Cipher {
    /// Create a new cipher with the given key and the default rotation cadence.
    pub fn new(key: [u8; 32]) -> Self {
        Self::with_rekey_after(key, DEFAULT_REKEY_AFTER)
    }

    /// Create a new cipher that rotates after `rekey_after` messages.
    /// A cadence of 0 disables automatic rotation.
    pub fn with_rekey_after(key: [u8; 32], rekey_after: u64) -> Self {
        Self {
            key,
            nonce_counter: 0,
            rekey_after,
            generation: 0,
        }
    }

    /// Encrypt data with associated data.
    pub fn encrypt(&mut self, plaintext: &[u8], ad: &[u8]) -> Result<Vec<u8>, CipherError> {
        self.rotate_if_due();
        let nonce = self.next_nonce();

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|_| CipherError::InvalidKey)?;
        cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                aes_gcm::aead::Payload { msg: plaintext, aad: ad },
            )
            .map_err(|_| CipherError::EncryptionFailed)
    }

    /// Decrypt data with associated data.
    ///
    /// A tag mismatch is fatal to the session: the counter state is left
    /// untouched so the caller can tear the session down.
    pub fn decrypt(&mut self, ciphertext: &[u8], ad: &[u8]) -> Result<Vec<u8>, CipherError> {
        self.rotate_if_due();
        let nonce = self.peek_nonce();

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|_| CipherError::InvalidKey)?;
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                aes_gcm::aead::Payload { msg: ciphertext, aad: ad },
            )
            .map_err(|_| CipherError::DecryptionFailed)?;

        self.nonce_counter += 1;
        Ok(plaintext)
    }

    /// Ratchet to a fresh key immediately (peer re-key signal).
    pub fn rotate(&mut self) {
        let derived = Hkdf::derive(Some(&self.key), REKEY_INFO, b"", 32);
        self.key.copy_from_slice(&derived);
        self.nonce_counter = 0;
        self.generation += 1;
    }

    /// The number of completed key rotations.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Messages processed under the current key.
    pub fn messages_under_key(&self) -> u64 {
        self.nonce_counter
    }

    fn rotate_if_due(&mut self) {
        if self.rekey_after > 0 && self.nonce_counter >= self.rekey_after {
            self.rotate();
        }
    }

    /// Build the next nonce and advance the counter.
    fn next_nonce(&mut self) -> [u8; 12] {
        let nonce = self.peek_nonce();
        self.nonce_counter += 1;
        nonce
    }

    /// Counter in the last 8 bytes, big-endian.
    fn peek_nonce(&self) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[4..12].copy_from_slice(&self.nonce_counter.to_be_bytes());
        nonce
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher")
            .field("key", &"[REDACTED]")
            .field("nonce_counter", &self.nonce_counter)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Cipher errors.
#[derive(Debug, Clone, PartialEq)]
pub enum CipherError {
    InvalidKey,
    EncryptionFailed,
    DecryptionFailed,
}

impl std::fmt::Display for CipherError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CipherError::InvalidKey => write!(f, "invalid key"),
            CipherError::EncryptionFailed => write!(f, "encryption failed"),
            CipherError::DecryptionFailed => write!(f, "decryption failed"),
        }
    }
}

impl std::error::Error for CipherError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(rekey_after: u64) -> (Cipher, Cipher) {
        let key = [0xab; 32];
        (
            Cipher::with_rekey_after(key, rekey_after),
            Cipher::with_rekey_after(key, rekey_after),
        )
    }

    #[test]
    fn test_encrypt_decrypt() {
        let (mut sender, mut receiver) = pair(0);

        let plaintext = b"hello session";
        let ad = b"frame header";

        let ciphertext = sender.encrypt(plaintext, ad).unwrap();
        let decrypted = receiver.decrypt(&ciphertext, ad).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_decrypt_wrong_ad_fails() {
        let (mut sender, mut receiver) = pair(0);

        let ciphertext = sender.encrypt(b"payload", b"correct ad").unwrap();
        let result = receiver.decrypt(&ciphertext, b"wrong ad");

        assert_eq!(result, Err(CipherError::DecryptionFailed));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let (mut sender, mut receiver) = pair(0);

        let ciphertext = sender.encrypt(b"payload", &[]).unwrap();
        for i in 0..ciphertext.len() {
            let mut copy = ciphertext.clone();
            copy[i] ^= 0x01;
            let mut fresh = Cipher::with_rekey_after([0xab; 32], 0);
            assert!(fresh.decrypt(&copy, &[]).is_err(), "byte {} accepted", i);
        }
        // Untampered still decrypts
        assert_eq!(receiver.decrypt(&ciphertext, &[]).unwrap(), b"payload");
    }

    #[test]
    fn test_counter_keeps_directions_in_step() {
        let (mut sender, mut receiver) = pair(0);

        for i in 0..5u8 {
            let ciphertext = sender.encrypt(&[i], &[]).unwrap();
            assert_eq!(receiver.decrypt(&ciphertext, &[]).unwrap(), vec![i]);
        }
        assert_eq!(sender.messages_under_key(), 5);
        assert_eq!(receiver.messages_under_key(), 5);
    }

    #[test]
    fn test_automatic_rotation_stays_in_sync() {
        let (mut sender, mut receiver) = pair(3);

        for i in 0..10u8 {
            let ciphertext = sender.encrypt(&[i], &[]).unwrap();
            assert_eq!(receiver.decrypt(&ciphertext, &[]).unwrap(), vec![i]);
        }
        assert_eq!(sender.generation(), 3);
        assert_eq!(receiver.generation(), 3);
    }

    #[test]
    fn test_explicit_rotation_changes_key() {
        let (mut sender, mut receiver) = pair(0);

        let before = sender.encrypt(b"x", &[]).unwrap();
        sender.rotate();
        let after = sender.encrypt(b"x", &[]).unwrap();
        assert_ne!(before, after);

        // Receiver that does not rotate can no longer decrypt
        receiver.decrypt(&before, &[]).unwrap();
        assert!(receiver.decrypt(&after, &[]).is_err());

        // After mirroring the rotation it can
        let mut mirrored = Cipher::with_rekey_after([0xab; 32], 0);
        mirrored.rotate();
        assert_eq!(mirrored.decrypt(&after, &[]).unwrap(), b"x");
    }

    #[test]
    fn test_failed_decrypt_leaves_counter() {
        let (mut sender, mut receiver) = pair(0);

        let good = sender.encrypt(b"one", &[]).unwrap();
        let mut bad = good.clone();
        bad[0] ^= 0xff;

        assert!(receiver.decrypt(&bad, &[]).is_err());
        // Counter did not advance on failure
        assert_eq!(receiver.decrypt(&good, &[]).unwrap(), b"one");
    }
}
