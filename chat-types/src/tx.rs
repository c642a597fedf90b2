//! Transaction purposes and lifecycle values.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::{TransactionId, TxHash};

/// Why a write was submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxPurpose {
    /// Joining a room.
    Join,
    /// Sending a message.
    Send,
    /// Registering an identity.
    Register,
    /// Creating a direct room.
    CreateRoom,
}

impl fmt::Display for TxPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxPurpose::Join => write!(f, "join"),
            TxPurpose::Send => write!(f, "send"),
            TxPurpose::Register => write!(f, "register"),
            TxPurpose::CreateRoom => write!(f, "create-room"),
        }
    }
}

/// Lifecycle status of a tracked write.
///
/// Ordered: a transaction only ever moves to a later status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TxStatus {
    /// Accepted by the provider.
    Submitted,
    /// Waiting for inclusion.
    Confirming,
    /// Included and settled.
    Confirmed,
    /// Reverted or timed out.
    Failed,
}

impl TxStatus {
    /// Whether this status is final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Confirmed | TxStatus::Failed)
    }
}

/// A write being tracked by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransaction {
    /// Local handle.
    pub id: TransactionId,
    /// Why it was submitted.
    pub purpose: TxPurpose,
    /// Ledger hash returned by the provider.
    pub hash: TxHash,
    /// Current lifecycle status.
    pub status: TxStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_order_follows_lifecycle() {
        assert!(TxStatus::Submitted < TxStatus::Confirming);
        assert!(TxStatus::Confirming < TxStatus::Confirmed);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!TxStatus::Submitted.is_terminal());
        assert!(!TxStatus::Confirming.is_terminal());
        assert!(TxStatus::Confirmed.is_terminal());
        assert!(TxStatus::Failed.is_terminal());
    }

    #[test]
    fn purpose_display() {
        assert_eq!(TxPurpose::CreateRoom.to_string(), "create-room");
    }
}
