//! Application protocols and the messages carried inside encrypted frames.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Handshake version byte. Both sides must send the same value.
pub const PROTOCOL_VERSION: u8 = 1;

/// Wire name of the chat protocol.
pub const CHAT_PROTOCOL: &str = "/chat/1.0.0";

/// Application protocols a stream can be opened under.
///
/// Negotiation on the wire uses the string name; anything that does not parse
/// into a variant here is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolId {
    /// Newline-delimited text chat.
    Chat,
}

impl ProtocolId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolId::Chat => CHAT_PROTOCOL,
        }
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolId {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            CHAT_PROTOCOL => Ok(ProtocolId::Chat),
            other => Err(UnknownProtocol(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown protocol {0:?}")]
pub struct UnknownProtocol(pub String);

/// Messages exchanged after the handshake. Encoding is bincode; framing and
/// encryption live in the wire module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Dialer asks to open a stream under the named protocol.
    Propose { protocol: String },
    /// Listener has a handler for the protocol; stream bytes follow.
    Accept { protocol: String },
    /// Listener has no handler for the protocol; connection closes.
    Reject { protocol: String },
    /// Stream payload.
    Data(Vec<u8>),
    /// Sender will write no more stream bytes.
    Close,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_protocol_name() {
        assert_eq!(ProtocolId::Chat.as_str(), "/chat/1.0.0");
        assert_eq!(ProtocolId::Chat.to_string(), CHAT_PROTOCOL);
    }

    #[test]
    fn parse_known_and_unknown_names() {
        assert_eq!("/chat/1.0.0".parse::<ProtocolId>(), Ok(ProtocolId::Chat));
        assert_eq!(
            "/chat/2.0.0".parse::<ProtocolId>(),
            Err(UnknownProtocol("/chat/2.0.0".into()))
        );
        assert!("chat".parse::<ProtocolId>().is_err());
    }
}
