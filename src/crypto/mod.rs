//! Cryptographic primitives for the session protocol.
//!
//! Key pairs and identity signatures, HKDF, the rotating transport cipher,
//! and the 3-message handshake.

pub mod cipher;
pub mod hkdf;
pub mod keypair;
pub mod noise;

pub use cipher::{Cipher, CipherError, DEFAULT_REKEY_AFTER};
pub use hkdf::{derive_key_pair, Hkdf};
pub use keypair::{verify_signature, IdentityKeyPair, InvalidIdentity, KeyPair, StoredIdentity};
pub use noise::{Handshake, HandshakeError, Role};
