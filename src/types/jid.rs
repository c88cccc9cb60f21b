//! JID (Jabber ID) types.
//!
//! JIDs identify users, groups, and other entities on the wire and in the
//! in-memory chat model.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Known JID servers
pub mod servers {
    pub const DEFAULT_USER: &str = "s.whatsapp.net";
    pub const GROUP: &str = "g.us";
    pub const BROADCAST: &str = "broadcast";
}

/// MessageId is the unique id of a message within a chat.
pub type MessageId = String;

/// Generate a fresh random message id.
pub fn new_message_id() -> MessageId {
    uuid::Uuid::new_v4().simple().to_string().to_uppercase()
}

/// Jid represents a user, group or broadcast address.
///
/// A plain Jid is a user and server pair; a device Jid additionally carries
/// the device index of a linked companion device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Jid {
    pub user: String,
    pub device: u16,
    pub server: String,
}

impl Jid {
    /// Creates a new plain Jid.
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            server: server.into(),
            device: 0,
        }
    }

    /// Creates a new device Jid.
    pub fn new_device(user: impl Into<String>, device: u16) -> Self {
        Self {
            user: user.into(),
            server: servers::DEFAULT_USER.to_string(),
            device,
        }
    }

    /// Returns a version of this Jid without the device part.
    pub fn to_non_device(&self) -> Self {
        Self {
            user: self.user.clone(),
            server: self.server.clone(),
            device: 0,
        }
    }

    /// Returns true if this Jid addresses a group.
    pub fn is_group(&self) -> bool {
        self.server == servers::GROUP
    }

    /// Returns true if this is a broadcast list (not status broadcast).
    pub fn is_broadcast_list(&self) -> bool {
        self.server == servers::BROADCAST && self.user != "status"
    }

    /// Returns true if the Jid is empty (no server).
    pub fn is_empty(&self) -> bool {
        self.server.is_empty()
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.device > 0 {
            write!(f, "{}:{}@{}", self.user, self.device, self.server)
        } else if !self.user.is_empty() {
            write!(f, "{}@{}", self.user, self.server)
        } else {
            write!(f, "{}", self.server)
        }
    }
}

/// Error type for Jid parsing
#[derive(Debug, Clone, PartialEq)]
pub struct ParseJidError(pub String);

impl fmt::Display for ParseJidError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse JID: {}", self.0)
    }
}

impl std::error::Error for ParseJidError {}

impl FromStr for Jid {
    type Err = ParseJidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(2, '@');
        let first = parts.next().unwrap_or_default();

        let Some(server) = parts.next() else {
            // No user part, just a server
            return Ok(Jid::new("", first));
        };

        let mut jid = Jid::new(first, server);

        // Device Jid format: user:device@server
        if first.contains(':') {
            let user_parts: Vec<&str> = first.split(':').collect();
            if user_parts.len() != 2 {
                return Err(ParseJidError("unexpected number of colons in JID".to_string()));
            }
            jid.user = user_parts[0].to_string();
            jid.device = user_parts[1]
                .parse()
                .map_err(|_| ParseJidError("failed to parse device from JID".to_string()))?;
        }

        Ok(jid)
    }
}

// Common Jids
lazy_static::lazy_static! {
    pub static ref EMPTY_JID: Jid = Jid::default();
    pub static ref GROUP_SERVER_JID: Jid = Jid::new("", servers::GROUP);
    pub static ref SERVER_JID: Jid = Jid::new("", servers::DEFAULT_USER);
    pub static ref STATUS_BROADCAST_JID: Jid = Jid::new("status", servers::BROADCAST);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_jid() {
        let jid: Jid = "1234567890@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.user, "1234567890");
        assert_eq!(jid.server, servers::DEFAULT_USER);
        assert_eq!(jid.device, 0);
    }

    #[test]
    fn test_parse_device_jid() {
        let jid: Jid = "1234567890:2@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.user, "1234567890");
        assert_eq!(jid.server, servers::DEFAULT_USER);
        assert_eq!(jid.device, 2);
    }

    #[test]
    fn test_jid_to_string() {
        let jid = Jid::new("1234567890", servers::DEFAULT_USER);
        assert_eq!(jid.to_string(), "1234567890@s.whatsapp.net");

        let jid = Jid::new_device("1234567890", 2);
        assert_eq!(jid.to_string(), "1234567890:2@s.whatsapp.net");
    }

    #[test]
    fn test_group_jid() {
        let jid: Jid = "123456789-1234567890@g.us".parse().unwrap();
        assert_eq!(jid.user, "123456789-1234567890");
        assert!(jid.is_group());
    }

    #[test]
    fn test_non_device_strips_device() {
        let jid: Jid = "555:7@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.to_non_device().to_string(), "555@s.whatsapp.net");
    }

    #[test]
    fn test_message_ids_unique() {
        assert_ne!(new_message_id(), new_message_id());
    }
}
