//! Transport channel.
//!
//! Maintains the WebSocket byte stream, frames and deframes binary messages,
//! and hands decoded frames to the protocol layer through a bounded queue.
//! The read pump suspends when the queue is full, so a slow consumer
//! backpressures the socket instead of growing memory.

pub mod frame;

use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

pub use frame::{Frame, FrameError, FrameTag};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection header sent in front of the first frame and mixed into the
/// handshake transcript as the prologue.
pub const CONNECTION_HEADER: [u8; 4] = [b'W', b'S', 1, 0];

/// Reconnect backoff policy: exponential with full jitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// First retry delay ceiling
    pub base: Duration,
    /// Upper bound for any retry delay
    pub cap: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (0-based), drawn uniformly from
    /// `0..=min(cap, base * 2^attempt)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base
            .saturating_mul(2u32.saturating_pow(attempt.min(16)));
        let ceiling = exp.min(self.cap);
        let millis = ceiling.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
    }

    /// The jitter ceiling for retry number `attempt`, without the draw.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        self.base
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
            .min(self.cap)
    }
}

/// A connected transport channel.
///
/// Used sequentially during the handshake; [`Transport::split`] hands the
/// receive side to a background pump for the steady state.
pub struct Transport {
    ws: WsStream,
    sequence: u64,
    sent_header: bool,
}

impl Transport {
    /// Connect to the server endpoint.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            ws,
            sequence: 0,
            sent_header: false,
        })
    }

    /// Frames sent so far on this connection.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Send one frame. The connection header precedes the very first frame.
    pub async fn send_frame(&mut self, frame: &Frame) -> Result<u64, TransportError> {
        let encoded = frame.encode().map_err(TransportError::InvalidFrame)?;

        let data = if self.sent_header {
            encoded
        } else {
            self.sent_header = true;
            let mut with_header = Vec::with_capacity(CONNECTION_HEADER.len() + encoded.len());
            with_header.extend_from_slice(&CONNECTION_HEADER);
            with_header.extend_from_slice(&encoded);
            with_header
        };

        self.ws
            .send(Message::Binary(data.into()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        let seq = self.sequence;
        self.sequence += 1;
        Ok(seq)
    }

    /// Receive one frame, skipping keepalive messages.
    pub async fn recv_frame(&mut self) -> Result<Frame, TransportError> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Binary(data))) => {
                    return Frame::decode(&data).map_err(TransportError::InvalidFrame);
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => {
                    return Err(TransportError::ConnectionClosed);
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
            }
        }
    }

    /// Close the connection.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.ws
            .close(None)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    /// Split into a writer and a pumped reader with a bounded queue of
    /// `queue_depth` decoded frames.
    pub fn split(self, queue_depth: usize) -> (FrameWriter, FrameReader) {
        let (sink, stream) = self.ws.split();
        let (tx, rx) = mpsc::channel(queue_depth.max(1));

        let handle = tokio::spawn(read_pump(stream, tx));

        (
            FrameWriter {
                sink,
                sequence: self.sequence,
            },
            FrameReader { rx, handle },
        )
    }
}

/// Decode incoming messages into frames and feed the bounded queue.
/// `tx.send` parks when the queue is full, which suspends socket reads.
async fn read_pump(
    mut stream: SplitStream<WsStream>,
    tx: mpsc::Sender<Result<Frame, TransportError>>,
) {
    loop {
        let item = match stream.next().await {
            Some(Ok(Message::Binary(data))) => {
                Frame::decode(&data).map_err(TransportError::InvalidFrame)
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => Err(TransportError::ConnectionClosed),
            Some(Ok(_)) => continue,
            Some(Err(e)) => Err(TransportError::ReceiveFailed(e.to_string())),
        };

        let fatal = item.is_err();
        if tx.send(item).await.is_err() {
            // Consumer dropped the reader
            return;
        }
        if fatal {
            return;
        }
    }
}

/// Outbound half of a split transport.
pub struct FrameWriter {
    sink: SplitSink<WsStream, Message>,
    sequence: u64,
}

impl FrameWriter {
    /// Send one frame; returns its sequence number.
    pub async fn send_frame(&mut self, frame: &Frame) -> Result<u64, TransportError> {
        let encoded = frame.encode().map_err(TransportError::InvalidFrame)?;
        self.sink
            .send(Message::Binary(encoded.into()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        let seq = self.sequence;
        self.sequence += 1;
        Ok(seq)
    }

    /// Frames sent so far on this connection.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Close the outbound side. Pending sends are abandoned.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.sink
            .send(Message::Close(None))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

/// Inbound half of a split transport: decoded frames from the pump.
pub struct FrameReader {
    rx: mpsc::Receiver<Result<Frame, TransportError>>,
    handle: JoinHandle<()>,
}

impl FrameReader {
    /// Next decoded frame, or `None` once the pump has stopped.
    pub async fn next(&mut self) -> Option<Result<Frame, TransportError>> {
        self.rx.recv().await
    }
}

impl Drop for FrameReader {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Transport errors.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    ConnectionFailed(String),
    SendFailed(String),
    ReceiveFailed(String),
    InvalidFrame(FrameError),
    ConnectionClosed,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::ConnectionFailed(e) => write!(f, "connection failed: {}", e),
            TransportError::SendFailed(e) => write!(f, "send failed: {}", e),
            TransportError::ReceiveFailed(e) => write!(f, "receive failed: {}", e),
            TransportError::InvalidFrame(e) => write!(f, "invalid frame: {}", e),
            TransportError::ConnectionClosed => write!(f, "connection closed"),
        }
    }
}

impl std::error::Error for TransportError {}

impl TransportError {
    /// Transient errors are retried with backoff; the rest tear the
    /// session down.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionFailed(_)
                | TransportError::SendFailed(_)
                | TransportError::ReceiveFailed(_)
                | TransportError::ConnectionClosed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_bounded() {
        let policy = ReconnectPolicy::default();
        for attempt in 0..20 {
            let ceiling = policy.ceiling(attempt);
            assert!(ceiling <= policy.cap);
            for _ in 0..50 {
                assert!(policy.delay(attempt) <= ceiling);
            }
        }
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.ceiling(0), Duration::from_secs(1));
        assert_eq!(policy.ceiling(1), Duration::from_secs(2));
        assert_eq!(policy.ceiling(4), Duration::from_secs(16));
        assert_eq!(policy.ceiling(5), Duration::from_secs(30));
        assert_eq!(policy.ceiling(12), Duration::from_secs(30));
    }

    #[test]
    fn test_transient_classification() {
        assert!(TransportError::ConnectionClosed.is_transient());
        assert!(TransportError::SendFailed("eof".into()).is_transient());
        assert!(!TransportError::InvalidFrame(FrameError::Truncated).is_transient());
    }
}
