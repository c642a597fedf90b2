//! Network guard.
//!
//! Verifies that the wallet is connected to the chain the registries live on
//! and repairs it when it is not: ask the wallet to switch, and when the
//! wallet does not know the chain, add it first.
//!
//! All remediation runs under one lock, so two callers never race each other
//! into duplicate wallet prompts.

mod mock;

pub use mock::MockWallet;

use async_trait::async_trait;
use talk2me_chat_core::{ChainDefinition, NetworkStatus};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// EIP-1193 code for a chain the wallet has not been told about.
pub const CODE_UNRECOGNIZED_CHAIN: i64 = 4902;

/// Wallet errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    /// The wallet does not know this chain.
    #[error("wallet does not know chain {0}")]
    UnknownChain(u64),

    /// The wallet already knows this chain.
    #[error("wallet already knows chain {0}")]
    AlreadyKnown(u64),

    /// The user declined the request.
    #[error("request rejected by user")]
    UserRejected,

    /// No wallet is available.
    #[error("wallet unavailable: {0}")]
    Unavailable(String),

    /// Anything else.
    #[error("wallet error: {0}")]
    Other(String),
}

impl WalletError {
    /// Classify a raw wallet error for a request about `chain_id`.
    pub fn classify(code: Option<i64>, message: &str, chain_id: u64) -> Self {
        let msg = message.to_ascii_lowercase();
        match code {
            Some(CODE_UNRECOGNIZED_CHAIN) => WalletError::UnknownChain(chain_id),
            Some(4001) => WalletError::UserRejected,
            _ if msg.contains("unrecognized chain") => WalletError::UnknownChain(chain_id),
            _ if msg.contains("already") => WalletError::AlreadyKnown(chain_id),
            _ if msg.contains("user rejected") || msg.contains("user denied") => {
                WalletError::UserRejected
            }
            _ if msg.contains("no wallet") || msg.contains("not installed") => {
                WalletError::Unavailable(message.to_string())
            }
            _ => WalletError::Other(message.to_string()),
        }
    }
}

/// The wallet, as far as the network guard needs it.
#[async_trait]
pub trait Wallet: Send + Sync {
    /// Chain the wallet is currently connected to.
    async fn chain_id(&self) -> Result<u64, WalletError>;

    /// Ask the wallet to switch to `chain_id`.
    async fn switch_chain(&self, chain_id: u64) -> Result<(), WalletError>;

    /// Ask the wallet to add (and switch to) `chain`.
    async fn add_chain(&self, chain: &ChainDefinition) -> Result<(), WalletError>;
}

/// Keeps the wallet on the target chain.
pub struct NetworkGuard<W> {
    wallet: W,
    target: ChainDefinition,
    status: Mutex<NetworkStatus>,
}

impl<W: Wallet> NetworkGuard<W> {
    /// Create a guard for `target`. Status starts `Unknown`.
    pub fn new(wallet: W, target: ChainDefinition) -> Self {
        Self {
            wallet,
            target,
            status: Mutex::new(NetworkStatus::Unknown),
        }
    }

    /// Chain the guard enforces.
    pub fn target(&self) -> &ChainDefinition {
        &self.target
    }

    /// The wrapped wallet.
    pub fn wallet(&self) -> &W {
        &self.wallet
    }

    /// Last known status.
    pub async fn status(&self) -> NetworkStatus {
        *self.status.lock().await
    }

    /// Compare the wallet's chain with the target.
    pub async fn check_network(&self) -> Result<NetworkStatus, WalletError> {
        let mut status = self.status.lock().await;
        self.refresh(&mut status).await
    }

    /// Ask the wallet to switch, adding the chain if the wallet lacks it.
    pub async fn switch_network(&self) -> Result<NetworkStatus, WalletError> {
        let mut status = self.status.lock().await;
        self.switch_or_add().await?;
        self.refresh(&mut status).await
    }

    /// Ask the wallet to add the chain, switching if it already has it.
    pub async fn add_network(&self) -> Result<NetworkStatus, WalletError> {
        let mut status = self.status.lock().await;
        self.add_or_switch().await?;
        self.refresh(&mut status).await
    }

    /// Check, switch if needed, and verify, as one step.
    ///
    /// Returns the verified status. A wallet that accepted the switch but
    /// still reports another chain yields `Incorrect`, not an error.
    pub async fn ensure_correct_network(&self) -> Result<NetworkStatus, WalletError> {
        let mut status = self.status.lock().await;
        if self.refresh(&mut status).await?.is_correct() {
            return Ok(*status);
        }

        info!(
            current = ?*status,
            target = self.target.chain_id,
            "Wrong network, requesting switch"
        );
        self.switch_or_add().await?;
        let verified = self.refresh(&mut status).await?;
        if !verified.is_correct() {
            warn!(status = ?verified, "Wallet still on wrong network after switch");
        }
        Ok(verified)
    }

    /// Record a chain change reported by the wallet.
    pub async fn observe_chain_change(&self, chain_id: u64) -> NetworkStatus {
        let mut status = self.status.lock().await;
        *status = NetworkStatus::evaluate(chain_id, self.target.chain_id);
        info!(chain_id, status = ?*status, "Chain changed");
        *status
    }

    async fn refresh(&self, status: &mut NetworkStatus) -> Result<NetworkStatus, WalletError> {
        match self.wallet.chain_id().await {
            Ok(current) => {
                *status = NetworkStatus::evaluate(current, self.target.chain_id);
                Ok(*status)
            }
            Err(e) => {
                *status = NetworkStatus::Unknown;
                Err(e)
            }
        }
    }

    async fn switch_or_add(&self) -> Result<(), WalletError> {
        match self.wallet.switch_chain(self.target.chain_id).await {
            Err(WalletError::UnknownChain(_)) => {
                info!(chain = %self.target.chain_name, "Chain unknown to wallet, adding it");
                self.wallet.add_chain(&self.target).await
            }
            other => other,
        }
    }

    async fn add_or_switch(&self) -> Result<(), WalletError> {
        match self.wallet.add_chain(&self.target).await {
            Err(WalletError::AlreadyKnown(_)) => {
                self.wallet.switch_chain(self.target.chain_id).await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: u64 = 4202;

    fn guard(wallet: &MockWallet) -> NetworkGuard<MockWallet> {
        NetworkGuard::new(wallet.clone(), ChainDefinition::lisk_sepolia())
    }

    // ===========================================
    // Checking
    // ===========================================

    #[tokio::test]
    async fn wrong_chain_is_incorrect() {
        let wallet = MockWallet::new(1);
        let guard = guard(&wallet);
        assert_eq!(guard.status().await, NetworkStatus::Unknown);

        let status = guard.check_network().await.unwrap();
        assert_eq!(status, NetworkStatus::Incorrect { current: 1 });
    }

    #[tokio::test]
    async fn missing_wallet_leaves_unknown() {
        let wallet = MockWallet::new(TARGET);
        wallet.set_unavailable(true);
        let guard = guard(&wallet);

        assert!(matches!(
            guard.check_network().await,
            Err(WalletError::Unavailable(_))
        ));
        assert_eq!(guard.status().await, NetworkStatus::Unknown);
    }

    // ===========================================
    // Remediation
    // ===========================================

    #[tokio::test]
    async fn switch_to_unknown_chain_falls_back_to_add() {
        let wallet = MockWallet::new(1);
        let guard = guard(&wallet);

        let status = guard.switch_network().await.unwrap();
        assert_eq!(status, NetworkStatus::Correct);
        assert_eq!(wallet.switch_calls(), 1);
        assert_eq!(wallet.add_calls(), 1);
        assert!(wallet.knows(TARGET));
    }

    #[tokio::test]
    async fn switch_to_known_chain_does_not_add() {
        let wallet = MockWallet::with_known_chains(1, &[TARGET]);
        let guard = guard(&wallet);

        assert_eq!(guard.switch_network().await.unwrap(), NetworkStatus::Correct);
        assert_eq!(wallet.add_calls(), 0);
    }

    #[tokio::test]
    async fn add_known_chain_falls_back_to_switch() {
        let wallet = MockWallet::with_known_chains(1, &[TARGET]);
        let guard = guard(&wallet);

        assert_eq!(guard.add_network().await.unwrap(), NetworkStatus::Correct);
        assert_eq!(wallet.add_calls(), 1);
        assert_eq!(wallet.switch_calls(), 1);
    }

    #[tokio::test]
    async fn rejected_switch_is_one_clean_failure() {
        let wallet = MockWallet::new(1);
        wallet.fail_next_switch(WalletError::UserRejected);
        let guard = guard(&wallet);

        assert_eq!(
            guard.ensure_correct_network().await,
            Err(WalletError::UserRejected)
        );
        assert_eq!(wallet.switch_calls(), 1);
        assert_eq!(wallet.add_calls(), 0);
        assert_eq!(wallet.current_chain(), 1);
    }

    #[tokio::test]
    async fn ensure_on_correct_chain_is_noop() {
        let wallet = MockWallet::new(TARGET);
        let guard = guard(&wallet);

        assert_eq!(
            guard.ensure_correct_network().await.unwrap(),
            NetworkStatus::Correct
        );
        assert_eq!(wallet.switch_calls(), 0);
    }

    #[tokio::test]
    async fn ensure_moves_chain_one_to_target() {
        let wallet = MockWallet::new(1);
        let guard = guard(&wallet);

        assert_eq!(
            guard.check_network().await.unwrap(),
            NetworkStatus::Incorrect { current: 1 }
        );
        assert_eq!(
            guard.ensure_correct_network().await.unwrap(),
            NetworkStatus::Correct
        );
        assert_eq!(wallet.current_chain(), TARGET);
    }

    #[tokio::test]
    async fn observed_change_updates_status() {
        let wallet = MockWallet::new(TARGET);
        let guard = guard(&wallet);

        assert_eq!(
            guard.observe_chain_change(1).await,
            NetworkStatus::Incorrect { current: 1 }
        );
        assert_eq!(guard.observe_chain_change(TARGET).await, NetworkStatus::Correct);
    }

    // ===========================================
    // Classification
    // ===========================================

    #[test]
    fn classify_wallet_errors() {
        assert_eq!(
            WalletError::classify(Some(4902), "Unrecognized chain ID", TARGET),
            WalletError::UnknownChain(TARGET)
        );
        assert_eq!(
            WalletError::classify(Some(4001), "User rejected the request.", TARGET),
            WalletError::UserRejected
        );
        assert_eq!(
            WalletError::classify(None, "Chain already added", TARGET),
            WalletError::AlreadyKnown(TARGET)
        );
        assert!(matches!(
            WalletError::classify(None, "something odd", TARGET),
            WalletError::Other(_)
        ));
    }
}
