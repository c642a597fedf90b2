//! Error taxonomy for ledger calls.
//!
//! Providers report failures as loosely structured strings and JSON-RPC
//! codes. [`LedgerError::classify`] turns a raw [`RpcFailure`] into one of a
//! small set of classes the session can act on.

use thiserror::Error;

use crate::calls::Contract;

/// JSON-RPC / EIP-1193 code for a signature the user declined.
pub const CODE_USER_REJECTED: i64 = 4001;

/// HTTP-style code some providers use for throttling.
pub const CODE_TOO_MANY_REQUESTS: i64 = 429;

/// JSON-RPC internal error code.
pub const CODE_INTERNAL_ERROR: i64 = -32603;

/// A raw provider failure, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcFailure {
    /// Numeric code, if the provider sent one.
    pub code: Option<i64>,
    /// Provider message.
    pub message: String,
}

impl RpcFailure {
    /// Failure with a message only.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// Failure with a code and message.
    pub fn with_code(code: i64, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }
}

/// Classified ledger errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Provider throttled the request.
    #[error("rate limited by provider")]
    RateLimited,

    /// Provider unreachable or failing internally.
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// Contract address unset or placeholder.
    #[error("{0} is not configured")]
    NotConfigured(Contract),

    /// The account is not a participant of the room.
    #[error("not a participant of this chat room")]
    NotAParticipant,

    /// The user declined to sign.
    #[error("signature rejected by user")]
    UserRejectedSignature,

    /// The call or transaction reverted.
    #[error("reverted: {0}")]
    Reverted(String),

    /// Confirmation did not arrive before the deadline.
    #[error("timed out waiting for confirmation")]
    Timeout,

    /// Anything else.
    #[error("{0}")]
    Unknown(String),
}

impl LedgerError {
    /// Classify a raw provider failure.
    ///
    /// Order matters: reverts are checked before throttling, so a revert
    /// reason that happens to mention 429 is still a revert, and throttling
    /// before connectivity. Participation reverts come before generic ones.
    pub fn classify(failure: &RpcFailure) -> Self {
        let msg = failure.message.to_ascii_lowercase();

        if failure.code == Some(CODE_USER_REJECTED)
            || msg.contains("user rejected")
            || msg.contains("user denied")
        {
            return LedgerError::UserRejectedSignature;
        }
        if msg.contains("not a participant") {
            return LedgerError::NotAParticipant;
        }
        if msg.contains("revert") {
            return LedgerError::Reverted(failure.message.clone());
        }
        if failure.code == Some(CODE_TOO_MANY_REQUESTS)
            || msg.contains("too many requests")
            || has_status_token(&msg)
        {
            return LedgerError::RateLimited;
        }
        if failure.code == Some(CODE_INTERNAL_ERROR)
            || msg.contains("internal json-rpc error")
            || msg.contains("network")
            || msg.contains("connection")
            || msg.contains("fetch failed")
        {
            return LedgerError::Connectivity(failure.message.clone());
        }
        if msg.contains("timeout") || msg.contains("timed out") {
            return LedgerError::Timeout;
        }
        LedgerError::Unknown(failure.message.clone())
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LedgerError::RateLimited | LedgerError::Connectivity(_) | LedgerError::Timeout
        )
    }
}

/// `429` as a word of its own ("HTTP 429", "status: 429"), not as digits
/// inside an address or id.
fn has_status_token(msg: &str) -> bool {
    msg.split(|c: char| !c.is_ascii_alphanumeric())
        .any(|word| word == "429")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_rate_limits() {
        assert_eq!(
            LedgerError::classify(&RpcFailure::new("HTTP request failed: Too Many Requests")),
            LedgerError::RateLimited
        );
        assert_eq!(
            LedgerError::classify(&RpcFailure::new("status 429")),
            LedgerError::RateLimited
        );
        assert_eq!(
            LedgerError::classify(&RpcFailure::with_code(429, "slow down")),
            LedgerError::RateLimited
        );
    }

    #[test]
    fn classifies_connectivity() {
        let err = LedgerError::classify(&RpcFailure::new("Internal JSON-RPC error."));
        assert!(matches!(err, LedgerError::Connectivity(_)));
        let err = LedgerError::classify(&RpcFailure::with_code(-32603, "boom"));
        assert!(matches!(err, LedgerError::Connectivity(_)));
    }

    #[test]
    fn participation_revert_beats_generic_revert() {
        let err = LedgerError::classify(&RpcFailure::new(
            "execution reverted: Not a participant of this chat room",
        ));
        assert_eq!(err, LedgerError::NotAParticipant);
    }

    #[test]
    fn classifies_generic_revert_verbatim() {
        let err = LedgerError::classify(&RpcFailure::new("execution reverted: Name taken"));
        assert_eq!(
            err,
            LedgerError::Reverted("execution reverted: Name taken".into())
        );
    }

    #[test]
    fn revert_mentioning_429_is_not_a_rate_limit() {
        let message = "execution reverted: room 0x4290ab does not exist";
        let err = LedgerError::classify(&RpcFailure::new(message));
        assert_eq!(err, LedgerError::Reverted(message.into()));
        assert!(!err.is_transient());

        let err = LedgerError::classify(&RpcFailure::new("unknown account 0xabc4290"));
        assert!(matches!(err, LedgerError::Unknown(_)));
        assert_eq!(
            LedgerError::classify(&RpcFailure::new("HTTP 429")),
            LedgerError::RateLimited
        );
    }

    #[test]
    fn classifies_user_rejection() {
        assert_eq!(
            LedgerError::classify(&RpcFailure::with_code(4001, "whatever")),
            LedgerError::UserRejectedSignature
        );
        assert_eq!(
            LedgerError::classify(&RpcFailure::new("User rejected the request.")),
            LedgerError::UserRejectedSignature
        );
    }

    #[test]
    fn unknown_is_verbatim() {
        let err = LedgerError::classify(&RpcFailure::new("weird"));
        assert_eq!(err.to_string(), "weird");
        assert!(!err.is_transient());
    }

    #[test]
    fn transient_classes() {
        assert!(LedgerError::RateLimited.is_transient());
        assert!(LedgerError::Connectivity("x".into()).is_transient());
        assert!(!LedgerError::NotAParticipant.is_transient());
        assert!(!LedgerError::UserRejectedSignature.is_transient());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LedgerError>();
    }
}
