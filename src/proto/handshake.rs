//! Protobuf definitions for the plaintext handshake frames.
//!
//! Only the handshake travels as structured plaintext; everything after it
//! is an opaque encrypted blob carrying stanzas.

use prost::Message;

/// Envelope for the three handshake messages.
#[derive(Clone, PartialEq, Message)]
pub struct HandshakeFrame {
    #[prost(message, optional, tag = "2")]
    pub client_hello: Option<ClientHello>,
    #[prost(message, optional, tag = "3")]
    pub server_hello: Option<ServerHello>,
    #[prost(message, optional, tag = "4")]
    pub client_finish: Option<ClientFinish>,
}

/// Message 1: the client's ephemeral key.
#[derive(Clone, PartialEq, Message)]
pub struct ClientHello {
    #[prost(bytes, optional, tag = "1")]
    pub ephemeral: Option<Vec<u8>>,
}

/// Message 2: the server's ephemeral key, its encrypted static key and its
/// encrypted auth payload.
#[derive(Clone, PartialEq, Message)]
pub struct ServerHello {
    #[prost(bytes, optional, tag = "1")]
    pub ephemeral: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "2")]
    pub r#static: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "3")]
    pub payload: Option<Vec<u8>>,
}

/// Message 3: the client's encrypted static key and encrypted auth payload.
#[derive(Clone, PartialEq, Message)]
pub struct ClientFinish {
    #[prost(bytes, optional, tag = "1")]
    pub r#static: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "2")]
    pub payload: Option<Vec<u8>>,
}

/// Identity payload carried encrypted inside messages 2 and 3.
///
/// The signature covers `own_ephemeral || peer_ephemeral`, binding the
/// long-term identity to this session's ephemerals.
#[derive(Clone, PartialEq, Message)]
pub struct AuthPayload {
    #[prost(string, optional, tag = "1")]
    pub jid: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub device_name: Option<String>,
    #[prost(bytes, optional, tag = "3")]
    pub verify_key: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "4")]
    pub signature: Option<Vec<u8>>,
    #[prost(int64, optional, tag = "5")]
    pub timestamp: Option<i64>,
}

impl HandshakeFrame {
    /// Wrap a client hello.
    pub fn hello(ephemeral: [u8; 32]) -> Self {
        Self {
            client_hello: Some(ClientHello {
                ephemeral: Some(ephemeral.to_vec()),
            }),
            server_hello: None,
            client_finish: None,
        }
    }

    /// Wrap a server hello.
    pub fn server(ephemeral: [u8; 32], r#static: Vec<u8>, payload: Vec<u8>) -> Self {
        Self {
            client_hello: None,
            server_hello: Some(ServerHello {
                ephemeral: Some(ephemeral.to_vec()),
                r#static: Some(r#static),
                payload: Some(payload),
            }),
            client_finish: None,
        }
    }

    /// Wrap a client finish.
    pub fn finish(r#static: Vec<u8>, payload: Vec<u8>) -> Self {
        Self {
            client_hello: None,
            server_hello: None,
            client_finish: Some(ClientFinish {
                r#static: Some(r#static),
                payload: Some(payload),
            }),
        }
    }

    /// Encode to bytes for a plaintext frame.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode(&mut buf).expect("vec write cannot fail");
        buf
    }
}

/// Build the byte string an auth signature covers.
pub fn signed_ephemerals(own: &[u8; 32], peer: &[u8; 32]) -> Vec<u8> {
    let mut message = Vec::with_capacity(64);
    message.extend_from_slice(own);
    message.extend_from_slice(peer);
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let frame = HandshakeFrame::hello([7u8; 32]);
        let bytes = frame.to_bytes();
        let decoded = HandshakeFrame::decode(&bytes[..]).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(
            decoded.client_hello.unwrap().ephemeral.unwrap(),
            vec![7u8; 32]
        );
    }

    #[test]
    fn test_auth_payload_roundtrip() {
        let payload = AuthPayload {
            jid: Some("123@s.whatsapp.net".to_string()),
            device_name: Some("test device".to_string()),
            verify_key: Some(vec![1; 32]),
            signature: Some(vec![2; 64]),
            timestamp: Some(1_700_000_000),
        };
        let mut buf = Vec::new();
        payload.encode(&mut buf).unwrap();
        assert_eq!(AuthPayload::decode(&buf[..]).unwrap(), payload);
    }

    #[test]
    fn test_signed_ephemerals_order_matters() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        assert_ne!(signed_ephemerals(&a, &b), signed_ephemerals(&b, &a));
    }
}
