//! Ledger gateway for Talk2Me.
//!
//! This module provides the seam between the session and whatever actually
//! talks to the chain (a JSON-RPC provider, a wallet, the in-memory mock).
//!
//! # Design
//!
//! The [`Ledger`] trait is the raw provider seam. It knows nothing about
//! error classes: failures come back as [`RpcFailure`] values carrying the
//! provider's code and message. [`LedgerGateway`] wraps a ledger and:
//! - refuses calls to contracts that are not configured
//! - classifies every raw failure into a [`LedgerError`]
//!
//! It never caches and never retries; those live in the read cache and the
//! session's retry policy.
//!
//! # Example
//!
//! ```ignore
//! let ledger = MockLedger::new();
//! let gateway = LedgerGateway::new(ledger, config.contracts.clone());
//! let room = gateway.read_call(&ReadCall::GetGlobalRoomId).await?.into_room()?;
//! ```

mod mock;

pub use mock::MockLedger;

use async_trait::async_trait;
use talk2me_chat_types::{LedgerError, ReadCall, ReadValue, RpcFailure, TxHash, WriteCall};
use tracing::{debug, warn};

use crate::config::ContractsConfig;

/// Raw ledger provider.
///
/// Implementations execute calls against both registries. They report
/// failures as the provider reported them; classification happens in
/// [`LedgerGateway`].
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Execute a read-only call.
    async fn read(&self, call: &ReadCall) -> Result<ReadValue, RpcFailure>;

    /// Sign and submit a state-changing call, returning its hash.
    ///
    /// Returns once the provider accepted the transaction, not once it was
    /// included.
    async fn write(&self, call: &WriteCall) -> Result<TxHash, RpcFailure>;

    /// Wait for the receipt of `hash`.
    ///
    /// Resolves `Ok` if the transaction was included successfully, `Err` if
    /// it reverted. May never resolve; callers bound it with a deadline.
    async fn confirmation(&self, hash: &TxHash) -> Result<(), RpcFailure>;
}

/// Classifying wrapper around a [`Ledger`].
#[derive(Debug, Clone)]
pub struct LedgerGateway<L> {
    ledger: L,
    contracts: ContractsConfig,
}

impl<L: Ledger> LedgerGateway<L> {
    /// Create a gateway over `ledger` for the given contract addresses.
    pub fn new(ledger: L, contracts: ContractsConfig) -> Self {
        Self { ledger, contracts }
    }

    /// The wrapped ledger.
    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Configured contract addresses.
    pub fn contracts(&self) -> &ContractsConfig {
        &self.contracts
    }

    /// Execute a read.
    pub async fn read_call(&self, call: &ReadCall) -> Result<ReadValue, LedgerError> {
        let contract = call.contract();
        if !self.contracts.is_configured(contract) {
            debug!(function = call.function_name(), %contract, "Contract not configured");
            return Err(LedgerError::NotConfigured(contract));
        }

        self.ledger.read(call).await.map_err(|failure| {
            let error = LedgerError::classify(&failure);
            debug!(
                function = call.function_name(),
                code = ?failure.code,
                error = %error,
                "Read failed"
            );
            error
        })
    }

    /// Submit a write.
    pub async fn write_call(&self, call: &WriteCall) -> Result<TxHash, LedgerError> {
        let contract = call.contract();
        if !self.contracts.is_configured(contract) {
            warn!(function = call.function_name(), %contract, "Contract not configured");
            return Err(LedgerError::NotConfigured(contract));
        }

        let hash = self.ledger.write(call).await.map_err(|failure| {
            let error = LedgerError::classify(&failure);
            warn!(
                function = call.function_name(),
                code = ?failure.code,
                error = %error,
                "Write rejected"
            );
            error
        })?;
        debug!(function = call.function_name(), %hash, "Write accepted");
        Ok(hash)
    }

    /// Wait for the receipt of `hash`. Unbounded; the tracker applies the deadline.
    pub async fn await_confirmation(&self, hash: &TxHash) -> Result<(), LedgerError> {
        self.ledger
            .confirmation(hash)
            .await
            .map_err(|failure| LedgerError::classify(&failure))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use talk2me_chat_types::{Address, Contract};

    fn gateway(ledger: MockLedger) -> LedgerGateway<MockLedger> {
        LedgerGateway::new(ledger, ContractsConfig::default())
    }

    #[tokio::test]
    async fn read_passes_through() {
        let ledger = MockLedger::new();
        let room = ledger.global_room();
        let gw = gateway(ledger);

        let value = gw.read_call(&ReadCall::GetGlobalRoomId).await.unwrap();
        assert_eq!(value.into_room().unwrap(), room);
    }

    #[tokio::test]
    async fn unconfigured_contract_fails_fast() {
        let ledger = MockLedger::new();
        let contracts = ContractsConfig {
            identity_registry: "0x...".into(),
            chat_registry: String::new(),
        };
        let gw = LedgerGateway::new(ledger.clone(), contracts);

        let err = gw.read_call(&ReadCall::GetGlobalRoomId).await.unwrap_err();
        assert_eq!(err, LedgerError::NotConfigured(Contract::ChatRegistry));

        let err = gw
            .read_call(&ReadCall::IsRegistered(Address::from_low_u64_be(1)))
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::NotConfigured(Contract::IdentityRegistry));

        let err = gw.write_call(&WriteCall::JoinGlobalRoom).await.unwrap_err();
        assert_eq!(err, LedgerError::NotConfigured(Contract::ChatRegistry));

        // The provider was never touched.
        assert_eq!(ledger.total_reads(), 0);
        assert_eq!(ledger.total_writes(), 0);
    }

    #[tokio::test]
    async fn rate_limit_is_classified() {
        let ledger = MockLedger::new();
        ledger.fail_next_reads(1, RpcFailure::with_code(429, "Too Many Requests"));
        let gw = gateway(ledger);

        let err = gw.read_call(&ReadCall::GetGlobalRoomId).await.unwrap_err();
        assert_eq!(err, LedgerError::RateLimited);
    }

    #[tokio::test]
    async fn rejected_signature_is_classified() {
        let ledger = MockLedger::new();
        ledger.reject_next_signature();
        let gw = gateway(ledger);

        let err = gw.write_call(&WriteCall::JoinGlobalRoom).await.unwrap_err();
        assert_eq!(err, LedgerError::UserRejectedSignature);
    }

    #[tokio::test]
    async fn reverted_receipt_is_classified() {
        let ledger = MockLedger::new();
        ledger.revert_next_receipt("execution reverted: already joined");
        let gw = gateway(ledger);

        let hash = gw.write_call(&WriteCall::JoinGlobalRoom).await.unwrap();
        let err = gw.await_confirmation(&hash).await.unwrap_err();
        assert!(matches!(err, LedgerError::Reverted(_)));
    }
}
