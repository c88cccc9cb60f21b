use serde::{Deserialize, Serialize};

use crate::crypto::DEFAULT_REKEY_AFTER;
use crate::transport::ReconnectPolicy;

/// Well-known server endpoints.
pub mod endpoints {
    pub const MAIN: &str = "wss://web.whatsapp.com/ws/chat";
    pub const FALLBACK: &str = "wss://w1.web.whatsapp.com/ws/chat";
}

/// Connection configuration for a client session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// WebSocket endpoint URL.
    pub endpoint: String,
    /// Human-readable name announced for this device.
    pub device_name: String,
    /// Depth of the bounded frame queue between transport and state machine.
    pub queue_depth: usize,
    /// Messages per transport key before it rotates; 0 disables rotation.
    pub rekey_after: u64,
    /// Backoff policy for automatic reconnects.
    pub reconnect: ReconnectPolicy,
    /// Whether to reconnect automatically after transient failures.
    pub auto_reconnect: bool,
    /// Give up after this many consecutive failed reconnects; 0 = never.
    pub max_reconnect_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: endpoints::MAIN.into(),
            device_name: "wasession".into(),
            queue_depth: 32,
            rekey_after: DEFAULT_REKEY_AFTER,
            reconnect: ReconnectPolicy::default(),
            auto_reconnect: true,
            max_reconnect_attempts: 0,
        }
    }
}

impl ClientConfig {
    /// Override the endpoint URL.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Override the announced device name.
    pub fn with_device_name(mut self, device_name: impl Into<String>) -> Self {
        self.device_name = device_name.into();
        self
    }

    /// Override the bounded frame queue depth.
    pub fn with_queue_depth(mut self, queue_depth: usize) -> Self {
        self.queue_depth = queue_depth;
        self
    }

    /// Override the key rotation cadence.
    pub fn with_rekey_after(mut self, rekey_after: u64) -> Self {
        self.rekey_after = rekey_after;
        self
    }

    /// Override the reconnect backoff policy.
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Disable automatic reconnects.
    pub fn without_auto_reconnect(mut self) -> Self {
        self.auto_reconnect = false;
        self
    }

    /// Cap consecutive reconnect attempts.
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.endpoint, endpoints::MAIN);
        assert!(config.auto_reconnect);
        assert_eq!(config.rekey_after, DEFAULT_REKEY_AFTER);
    }

    #[test]
    fn test_builder_overrides() {
        let config = ClientConfig::default()
            .with_endpoint("wss://localhost:9090/ws")
            .with_device_name("test rig")
            .with_queue_depth(4)
            .without_auto_reconnect();

        assert_eq!(config.endpoint, "wss://localhost:9090/ws");
        assert_eq!(config.device_name, "test rig");
        assert_eq!(config.queue_depth, 4);
        assert!(!config.auto_reconnect);
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = ClientConfig::default().with_max_reconnect_attempts(3);
        let json = serde_json::to_string(&config).unwrap();
        let parsed: ClientConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
