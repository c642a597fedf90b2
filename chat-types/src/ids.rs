//! Identity types for ledger accounts, rooms and transactions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when parsing a hex id fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseIdError {
    /// The string is not valid hex.
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    /// The decoded value has the wrong length.
    #[error("expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Expected byte length.
        expected: usize,
        /// Actual byte length.
        actual: usize,
    },
}

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], ParseIdError> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    let bytes = hex::decode(digits).map_err(|e| ParseIdError::InvalidHex(e.to_string()))?;
    if bytes.len() != N {
        return Err(ParseIdError::InvalidLength {
            expected: N,
            actual: bytes.len(),
        });
    }
    let mut arr = [0u8; N];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

/// A ledger account address.
///
/// 20 bytes, displayed as `0x`-prefixed lowercase hex. The all-zero address
/// is the broadcast recipient of group messages.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address([u8; 20]);

impl Address {
    /// The zero address (broadcast sentinel).
    pub const ZERO: Address = Address([0u8; 20]);

    /// Create an Address from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() == 20 {
            let mut arr = [0u8; 20];
            arr.copy_from_slice(bytes);
            Some(Self(arr))
        } else {
            None
        }
    }

    /// Create an Address whose low 8 bytes hold `value` (big-endian).
    pub fn from_low_u64_be(value: u64) -> Self {
        let mut arr = [0u8; 20];
        arr[12..].copy_from_slice(&value.to_be_bytes());
        Self(arr)
    }

    /// Get the raw bytes of this Address.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Check if this is the broadcast sentinel.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl FromStr for Address {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_fixed::<20>(s).map(Self)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let full = hex::encode(self.0);
        write!(f, "Address(0x{}…{})", &full[..6], &full[36..])
    }
}

/// A chat room identifier (`bytes32` on the ledger).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoomId([u8; 32]);

impl RoomId {
    /// Create a RoomId from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() == 32 {
            let mut arr = [0u8; 32];
            arr.copy_from_slice(bytes);
            Some(Self(arr))
        } else {
            None
        }
    }

    /// Create a RoomId whose low 8 bytes hold `value` (big-endian).
    pub fn from_low_u64_be(value: u64) -> Self {
        let mut arr = [0u8; 32];
        arr[24..].copy_from_slice(&value.to_be_bytes());
        Self(arr)
    }

    /// Get the raw bytes of this RoomId.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl FromStr for RoomId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_fixed::<32>(s).map(Self)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let full = hex::encode(self.0);
        write!(f, "RoomId(0x{}…{})", &full[..6], &full[58..])
    }
}

/// Hash of a transaction accepted by the ledger provider.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHash([u8; 32]);

impl TxHash {
    /// Create a TxHash from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() == 32 {
            let mut arr = [0u8; 32];
            arr.copy_from_slice(bytes);
            Some(Self(arr))
        } else {
            None
        }
    }

    /// Create a TxHash whose low 8 bytes hold `value` (big-endian).
    pub fn from_low_u64_be(value: u64) -> Self {
        let mut arr = [0u8; 32];
        arr[24..].copy_from_slice(&value.to_be_bytes());
        Self(arr)
    }

    /// Get the raw bytes of this TxHash.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash(0x{}…)", &hex::encode(self.0)[..8])
    }
}

/// Local handle for a tracked write.
///
/// UUID v4, assigned when the write is submitted. Independent of the
/// ledger hash so a handle exists before the provider answers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(uuid::Uuid);

impl TransactionId {
    /// Create a new random TransactionId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_parses_with_and_without_prefix() {
        let a: Address = "0x00000000000000000000000000000000000000ab".parse().unwrap();
        let b: Address = "00000000000000000000000000000000000000ab".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a, Address::from_low_u64_be(0xab));
    }

    #[test]
    fn address_display_is_lowercase_hex() {
        let a: Address = "0xABCDEF0000000000000000000000000000000001".parse().unwrap();
        assert_eq!(a.to_string(), "0xabcdef0000000000000000000000000000000001");
    }

    #[test]
    fn address_rejects_wrong_length() {
        let err = "0x1234".parse::<Address>().unwrap_err();
        assert_eq!(
            err,
            ParseIdError::InvalidLength {
                expected: 20,
                actual: 2
            }
        );
    }

    #[test]
    fn address_rejects_non_hex() {
        let err = "0xzz00000000000000000000000000000000000000".parse::<Address>();
        assert!(matches!(err, Err(ParseIdError::InvalidHex(_))));
    }

    #[test]
    fn zero_address_is_broadcast_sentinel() {
        assert!(Address::ZERO.is_zero());
        assert!(!Address::from_low_u64_be(1).is_zero());
    }

    #[test]
    fn room_id_display_parse_agree() {
        let room = RoomId::from_low_u64_be(42);
        let parsed: RoomId = room.to_string().parse().unwrap();
        assert_eq!(parsed, room);
    }

    #[test]
    fn debug_output_is_abbreviated() {
        let room = RoomId::from_low_u64_be(7);
        let debug = format!("{:?}", room);
        assert!(debug.starts_with("RoomId(0x000000"));
        assert!(debug.len() < 30);
    }

    #[test]
    fn transaction_ids_are_unique() {
        assert_ne!(TransactionId::new(), TransactionId::new());
    }
}
