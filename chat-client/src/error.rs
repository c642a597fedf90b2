//! Session errors.
//!
//! Every session operation returns [`SessionError`]. Ledger failures keep
//! their class so callers can decide on retries; everything else is local
//! validation or a collaborator failure.

use talk2me_chat_types::LedgerError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::network::WalletError;

/// Errors from session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A classified ledger failure.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The request does not fit the session's configuration or state.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Message content was empty.
    #[error("message content is empty")]
    EmptyContent,

    /// Registration input was rejected.
    #[error("invalid registration: {0}")]
    InvalidRegistration(String),

    /// Profile image was missing or too large.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// Wallet is on another chain.
    #[error("wrong network: connected to chain {current}, expected {expected}")]
    WrongNetwork {
        /// Chain the wallet is on.
        current: u64,
        /// Chain the registries are on.
        expected: u64,
    },

    /// Wallet request failed.
    #[error(transparent)]
    Wallet(#[from] WalletError),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Session state was invalidated (chain change) while the operation ran.
    #[error("session invalidated by a network change")]
    Invalidated,
}

impl SessionError {
    /// Short message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Ledger(e) => match e {
                LedgerError::RateLimited => {
                    "Too many requests. Please wait a moment and try again.".into()
                }
                LedgerError::Connectivity(_) => {
                    "Network connection issue. Please check your connection and try again.".into()
                }
                LedgerError::NotConfigured(contract) => format!("{contract} is not configured."),
                LedgerError::NotAParticipant => {
                    "You are not a participant of this chat room.".into()
                }
                LedgerError::UserRejectedSignature => "Transaction was rejected in your wallet.".into(),
                LedgerError::Reverted(reason) => format!("Transaction failed: {reason}"),
                LedgerError::Timeout => "Transaction timed out. Please try again.".into(),
                LedgerError::Unknown(message) => message.clone(),
            },
            SessionError::InvalidConfiguration(reason) => reason.clone(),
            SessionError::EmptyContent => "Message cannot be empty.".into(),
            SessionError::InvalidRegistration(reason) | SessionError::InvalidImage(reason) => {
                reason.clone()
            }
            SessionError::WrongNetwork { .. } => {
                "Please switch your wallet to the correct network.".into()
            }
            SessionError::Wallet(WalletError::UserRejected) => {
                "Request was rejected in your wallet.".into()
            }
            SessionError::Wallet(WalletError::Unavailable(_)) => {
                "No wallet detected. Please install or unlock your wallet.".into()
            }
            SessionError::Wallet(e) => e.to_string(),
            SessionError::Config(e) => e.to_string(),
            SessionError::Invalidated => "Network changed. Please try again.".into(),
        }
    }

    /// Whether trying again later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::Ledger(e) => e.is_transient(),
            SessionError::Wallet(WalletError::Unavailable(_)) | SessionError::Invalidated => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use talk2me_chat_types::Contract;

    #[test]
    fn ledger_errors_keep_their_class() {
        let err: SessionError = LedgerError::RateLimited.into();
        assert!(matches!(err, SessionError::Ledger(LedgerError::RateLimited)));
        assert!(err.is_retryable());
        assert!(err.user_message().contains("Too many requests"));
    }

    #[test]
    fn unknown_ledger_error_is_verbatim() {
        let err: SessionError = LedgerError::Unknown("gas price too low".into()).into();
        assert_eq!(err.user_message(), "gas price too low");
        assert_eq!(err.to_string(), "gas price too low");
        assert!(!err.is_retryable());
    }

    #[test]
    fn not_configured_names_contract() {
        let err: SessionError = LedgerError::NotConfigured(Contract::ChatRegistry).into();
        assert!(err.user_message().contains(&Contract::ChatRegistry.to_string()));
    }

    #[test]
    fn validation_errors_are_terminal() {
        assert!(!SessionError::EmptyContent.is_retryable());
        assert!(!SessionError::InvalidConfiguration("x".into()).is_retryable());
        assert_eq!(SessionError::EmptyContent.user_message(), "Message cannot be empty.");
    }

    #[test]
    fn wallet_errors_map() {
        let err: SessionError = WalletError::UserRejected.into();
        assert!(matches!(err, SessionError::Wallet(WalletError::UserRejected)));
        assert!(err.user_message().contains("rejected"));

        let err: SessionError = WalletError::Unavailable("none".into()).into();
        assert!(err.is_retryable());
    }

    #[test]
    fn invalidated_is_retryable() {
        let err = SessionError::Invalidated;
        assert!(err.is_retryable());
        assert_eq!(err.user_message(), "Network changed. Please try again.");
    }

    #[test]
    fn display_is_human_readable() {
        let err = SessionError::WrongNetwork {
            current: 1,
            expected: 4202,
        };
        assert_eq!(
            err.to_string(),
            "wrong network: connected to chain 1, expected 4202"
        );
    }
}
