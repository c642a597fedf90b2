//! Messages and identity records as read from the ledger.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::Address;

/// A message exactly as the chat registry returns it.
///
/// `timestamp` is in ledger seconds.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Sending account.
    pub sender: Address,
    /// Receiving account, or [`Address::ZERO`] for broadcasts.
    pub recipient: Address,
    /// Message text.
    pub content: String,
    /// Inclusion time in seconds.
    pub timestamp: u64,
    /// Read flag kept by the ledger.
    pub is_read: bool,
}

impl fmt::Debug for RawMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawMessage")
            .field("sender", &self.sender)
            .field("recipient", &self.recipient)
            .field("content", &format!("[{} bytes]", self.content.len()))
            .field("timestamp", &self.timestamp)
            .field("is_read", &self.is_read)
            .finish()
    }
}

/// Whether a message goes to the whole room or to one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Sent to every participant of the global room.
    Broadcast,
    /// Sent to a single recipient through a direct room.
    Direct,
}

/// A message in local form.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Sending account.
    pub sender: Address,
    /// Receiving account, or [`Address::ZERO`] for broadcasts.
    pub recipient: Address,
    /// Message text.
    pub content: String,
    /// Inclusion time in milliseconds.
    pub timestamp_ms: u64,
    /// Read flag kept by the ledger.
    pub is_read: bool,
}

impl Message {
    /// Whether this message was a broadcast.
    pub fn kind(&self) -> MessageKind {
        if self.recipient.is_zero() {
            MessageKind::Broadcast
        } else {
            MessageKind::Direct
        }
    }
}

impl From<RawMessage> for Message {
    fn from(raw: RawMessage) -> Self {
        Self {
            sender: raw.sender,
            recipient: raw.recipient,
            content: raw.content,
            timestamp_ms: raw.timestamp.saturating_mul(1000),
            is_read: raw.is_read,
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("sender", &self.sender)
            .field("recipient", &self.recipient)
            .field("content", &format!("[{} bytes]", self.content.len()))
            .field("timestamp_ms", &self.timestamp_ms)
            .field("is_read", &self.is_read)
            .finish()
    }
}

/// A registered identity as stored by the identity registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// Owning account.
    pub owner: Address,
    /// Registered name, including the registry suffix.
    pub ens_name: String,
    /// Profile image reference (content-store URL or inline data URL).
    pub profile_image_ref: String,
    /// Free-form bio.
    pub bio: String,
    /// Registration time in ledger seconds.
    pub registration_time: u64,
    /// Whether the registry still considers this identity active.
    pub is_active: bool,
}
