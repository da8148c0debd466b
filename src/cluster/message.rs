//! Gossip wire format: plain UTF-8 datagrams, no length prefix.
//!
//! ```text
//! "000"              join request
//! "001"              join acknowledgment
//! "upd,<partition>"  invalidation notice
//! ```
//!
//! `upd, <partition>` (space after the comma) and the older fixed-width
//! `100<partition>` form are accepted on input; output always uses `upd,`.

use thiserror::Error;

/// Largest datagram read from the socket; longer ones are truncated by the kernel.
pub const MAX_DATAGRAM: usize = 1024;

const JOIN: &str = "000";
const JOIN_ACK: &str = "001";
const LEGACY_INVALIDATE: &str = "100";
const INVALIDATE_PREFIX: &str = "upd,";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GossipMessage {
    Join,
    JoinAck,
    Invalidate { partition: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("datagram is not valid utf-8")]
    NotUtf8,
    #[error("datagram too short ({0} bytes)")]
    TooShort(usize),
    #[error("invalidation notice without a partition name")]
    MissingPartition,
    #[error("unknown message code: {0:?}")]
    UnknownCode(String),
}

impl GossipMessage {
    #[must_use]
    pub fn invalidate(partition: impl Into<String>) -> Self {
        Self::Invalidate {
            partition: partition.into(),
        }
    }

    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Join => JOIN.to_string(),
            Self::JoinAck => JOIN_ACK.to_string(),
            Self::Invalidate { partition } => format!("{INVALIDATE_PREFIX}{partition}"),
        }
    }

    /// Parse one datagram. Never panics, whatever the input.
    ///
    /// # Errors
    /// Returns a `MessageError` describing why the datagram was rejected.
    pub fn parse(datagram: &[u8]) -> Result<Self, MessageError> {
        let text = std::str::from_utf8(datagram).map_err(|_| MessageError::NotUtf8)?;
        let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');

        if let Some(rest) = text.strip_prefix(INVALIDATE_PREFIX) {
            return invalidation(rest);
        }
        if text.len() < 3 {
            return Err(MessageError::TooShort(text.len()));
        }

        match text.get(..3) {
            Some(JOIN) if text.len() == 3 => Ok(Self::Join),
            Some(JOIN_ACK) if text.len() == 3 => Ok(Self::JoinAck),
            Some(LEGACY_INVALIDATE) => invalidation(&text[3..]),
            _ => Err(MessageError::UnknownCode(text.chars().take(16).collect())),
        }
    }
}

fn invalidation(name: &str) -> Result<GossipMessage, MessageError> {
    let name = name.trim();
    if name.is_empty() {
        Err(MessageError::MissingPartition)
    } else {
        Ok(GossipMessage::invalidate(name))
    }
}
