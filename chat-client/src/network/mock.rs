//! Mock wallet for testing.

use super::{Wallet, WalletError};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use talk2me_chat_core::ChainDefinition;

/// Mock wallet.
///
/// Knows a set of chains and is connected to one of them. Switching to an
/// unknown chain fails with [`WalletError::UnknownChain`]; adding a known one
/// fails with [`WalletError::AlreadyKnown`].
#[derive(Debug)]
pub struct MockWallet {
    inner: Arc<Mutex<MockWalletInner>>,
}

#[derive(Debug, Default)]
struct MockWalletInner {
    current: u64,
    known: HashSet<u64>,
    unavailable: bool,
    fail_next_switch: Option<WalletError>,
    fail_next_add: Option<WalletError>,
    switch_calls: usize,
    add_calls: usize,
}

impl MockWallet {
    /// Wallet connected to `current`, knowing only that chain.
    pub fn new(current: u64) -> Self {
        Self::with_known_chains(current, &[])
    }

    /// Wallet connected to `current`, also knowing `known`.
    pub fn with_known_chains(current: u64, known: &[u64]) -> Self {
        let mut inner = MockWalletInner {
            current,
            ..Default::default()
        };
        inner.known.insert(current);
        inner.known.extend(known.iter().copied());
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockWalletInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Chain currently connected.
    pub fn current_chain(&self) -> u64 {
        self.lock().current
    }

    /// Whether the wallet knows `chain_id`.
    pub fn knows(&self, chain_id: u64) -> bool {
        self.lock().known.contains(&chain_id)
    }

    /// Simulate the user switching chains outside the application.
    pub fn set_chain(&self, chain_id: u64) {
        let mut inner = self.lock();
        inner.known.insert(chain_id);
        inner.current = chain_id;
    }

    /// Simulate a missing wallet.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Cause the next switch to fail with `error`.
    pub fn fail_next_switch(&self, error: WalletError) {
        self.lock().fail_next_switch = Some(error);
    }

    /// Cause the next add to fail with `error`.
    pub fn fail_next_add(&self, error: WalletError) {
        self.lock().fail_next_add = Some(error);
    }

    /// Number of switch requests.
    pub fn switch_calls(&self) -> usize {
        self.lock().switch_calls
    }

    /// Number of add requests.
    pub fn add_calls(&self) -> usize {
        self.lock().add_calls
    }
}

impl Clone for MockWallet {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Wallet for MockWallet {
    async fn chain_id(&self) -> Result<u64, WalletError> {
        let inner = self.lock();
        if inner.unavailable {
            return Err(WalletError::Unavailable("no wallet detected".into()));
        }
        Ok(inner.current)
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), WalletError> {
        let mut inner = self.lock();
        inner.switch_calls += 1;
        if inner.unavailable {
            return Err(WalletError::Unavailable("no wallet detected".into()));
        }
        if let Some(error) = inner.fail_next_switch.take() {
            return Err(error);
        }
        if !inner.known.contains(&chain_id) {
            return Err(WalletError::UnknownChain(chain_id));
        }
        inner.current = chain_id;
        Ok(())
    }

    async fn add_chain(&self, chain: &ChainDefinition) -> Result<(), WalletError> {
        let mut inner = self.lock();
        inner.add_calls += 1;
        if inner.unavailable {
            return Err(WalletError::Unavailable("no wallet detected".into()));
        }
        if let Some(error) = inner.fail_next_add.take() {
            return Err(error);
        }
        if !inner.known.insert(chain.chain_id) {
            return Err(WalletError::AlreadyKnown(chain.chain_id));
        }
        inner.current = chain.chain_id;
        Ok(())
    }
}
