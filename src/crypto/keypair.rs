//! Key pair utilities for the session protocol.
//!
//! Curve25519 key pairs cover Diffie-Hellman during the handshake; the
//! long-term identity additionally carries an Ed25519 signing key used to
//! authenticate handshake payloads.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

/// A Curve25519 key pair.
#[derive(Clone)]
pub struct KeyPair {
    /// Public key (32 bytes)
    pub public: [u8; 32],
    /// Private key (32 bytes)
    pub private: [u8; 32],
}

impl KeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut private = [0u8; 32];
        rng.fill_bytes(&mut private);

        // Apply clamping as per Curve25519 spec
        private[0] &= 248;
        private[31] &= 127;
        private[31] |= 64;

        Self::from_private_key(private)
    }

    /// Create a key pair from an existing private key.
    pub fn from_private_key(private: [u8; 32]) -> Self {
        let secret = StaticSecret::from(private);
        let public = PublicKey::from(&secret);

        Self {
            public: *public.as_bytes(),
            private,
        }
    }

    /// Perform X25519 Diffie-Hellman key agreement.
    pub fn dh(&self, their_public: &[u8; 32]) -> [u8; 32] {
        let secret = StaticSecret::from(self.private);
        let their_key = PublicKey::from(*their_public);
        let shared = secret.diffie_hellman(&their_key);
        *shared.as_bytes()
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &hex::encode(self.public))
            .field("private", &"[REDACTED]")
            .finish()
    }
}

/// The long-term identity of a device: a Curve25519 pair for handshake DH
/// plus an Ed25519 pair for payload signatures.
#[derive(Clone)]
pub struct IdentityKeyPair {
    /// DH key pair, used as the Noise static key
    pub dh: KeyPair,
    /// Signing key bytes (Ed25519 seed)
    signing: [u8; 32],
}

impl IdentityKeyPair {
    /// Generate a fresh identity.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut signing = [0u8; 32];
        rng.fill_bytes(&mut signing);

        Self {
            dh: KeyPair::generate(),
            signing,
        }
    }

    /// Rebuild an identity from stored key material.
    pub fn from_parts(dh_private: [u8; 32], signing: [u8; 32]) -> Self {
        Self {
            dh: KeyPair::from_private_key(dh_private),
            signing,
        }
    }

    /// The Ed25519 verification key for this identity.
    pub fn verify_key(&self) -> [u8; 32] {
        SigningKey::from_bytes(&self.signing)
            .verifying_key()
            .to_bytes()
    }

    /// Sign a message with the identity signing key.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        let signing_key = SigningKey::from_bytes(&self.signing);
        signing_key.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("dh", &self.dh)
            .field("signing", &"[REDACTED]")
            .finish()
    }
}

/// Serializable form of an identity, for session stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredIdentity {
    /// Base64 DH private key
    pub dh_private: String,
    /// Base64 Ed25519 seed
    pub signing: String,
}

/// Error rebuilding an identity from stored form.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidIdentity(pub String);

impl std::fmt::Display for InvalidIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid stored identity: {}", self.0)
    }
}

impl std::error::Error for InvalidIdentity {}

impl IdentityKeyPair {
    /// Export key material for storage.
    pub fn export(&self) -> StoredIdentity {
        StoredIdentity {
            dh_private: BASE64.encode(self.dh.private),
            signing: BASE64.encode(self.signing),
        }
    }

    /// Rebuild an identity from its stored form.
    pub fn import(stored: &StoredIdentity) -> Result<Self, InvalidIdentity> {
        let dh_private = decode_key(&stored.dh_private)?;
        let signing = decode_key(&stored.signing)?;
        Ok(Self::from_parts(dh_private, signing))
    }
}

fn decode_key(encoded: &str) -> Result<[u8; 32], InvalidIdentity> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| InvalidIdentity(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| InvalidIdentity("wrong key length".to_string()))
}

/// Verify an Ed25519 signature against a verification key.
pub fn verify_signature(verify_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(verify_key) else {
        return false;
    };
    key.verify(message, &Signature::from_bytes(signature)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_pair_generation() {
        let kp = KeyPair::generate();
        assert_ne!(kp.public, [0u8; 32]);
        assert_ne!(kp.private, [0u8; 32]);
    }

    #[test]
    fn test_dh_agreement() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();

        let alice_shared = alice.dh(&bob.public);
        let bob_shared = bob.dh(&alice.public);

        assert_eq!(alice_shared, bob_shared);
    }

    #[test]
    fn test_identity_sign_verify() {
        let identity = IdentityKeyPair::generate();
        let sig = identity.sign(b"handshake transcript");

        assert!(verify_signature(&identity.verify_key(), b"handshake transcript", &sig));
        assert!(!verify_signature(&identity.verify_key(), b"something else", &sig));
    }

    #[test]
    fn test_identity_from_parts_is_stable() {
        let identity = IdentityKeyPair::generate();
        let rebuilt = IdentityKeyPair::from_parts(identity.dh.private, identity.signing);

        assert_eq!(identity.dh.public, rebuilt.dh.public);
        assert_eq!(identity.verify_key(), rebuilt.verify_key());
    }

    #[test]
    fn test_export_import_roundtrip() {
        let identity = IdentityKeyPair::generate();
        let stored = identity.export();

        let json = serde_json::to_string(&stored).unwrap();
        let parsed: StoredIdentity = serde_json::from_str(&json).unwrap();
        let rebuilt = IdentityKeyPair::import(&parsed).unwrap();

        assert_eq!(identity.dh.public, rebuilt.dh.public);
        assert_eq!(identity.verify_key(), rebuilt.verify_key());
    }

    #[test]
    fn test_import_rejects_garbage() {
        let stored = StoredIdentity {
            dh_private: "not base64!!".to_string(),
            signing: String::new(),
        };
        assert!(IdentityKeyPair::import(&stored).is_err());
    }
}
