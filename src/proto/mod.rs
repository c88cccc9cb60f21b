//! Plaintext handshake frame payloads.

pub mod handshake;

pub use handshake::{
    signed_ephemerals, AuthPayload, ClientFinish, ClientHello, HandshakeFrame, ServerHello,
};
