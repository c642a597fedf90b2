//! Network identity evaluation.

use serde::{Deserialize, Serialize};

/// Whether the wallet is connected to the chain the contracts live on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkStatus {
    /// Not checked yet, or the check failed.
    #[default]
    Unknown,
    /// Connected to the target chain.
    Correct,
    /// Connected to some other chain.
    Incorrect {
        /// Chain id the wallet reported.
        current: u64,
    },
}

impl NetworkStatus {
    /// Compare a reported chain id with the target.
    pub fn evaluate(current: u64, target: u64) -> Self {
        if current == target {
            Self::Correct
        } else {
            Self::Incorrect { current }
        }
    }

    /// Check if on the target chain.
    pub fn is_correct(&self) -> bool {
        matches!(self, Self::Correct)
    }
}

/// Native currency of a chain, as wallets expect it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    /// Display name.
    pub name: String,
    /// Ticker symbol.
    pub symbol: String,
    /// Decimals.
    pub decimals: u8,
}

/// Everything a wallet needs to add a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainDefinition {
    /// Numeric chain id.
    pub chain_id: u64,
    /// Human-readable name.
    pub chain_name: String,
    /// RPC endpoints.
    pub rpc_urls: Vec<String>,
    /// Native currency.
    pub native_currency: NativeCurrency,
    /// Block explorers.
    pub block_explorer_urls: Vec<String>,
}

impl ChainDefinition {
    /// Lisk Sepolia testnet, where the registries are deployed.
    pub fn lisk_sepolia() -> Self {
        Self {
            chain_id: 4202,
            chain_name: "Lisk Sepolia".to_string(),
            rpc_urls: vec!["https://rpc.sepolia-api.lisk.com".to_string()],
            native_currency: NativeCurrency {
                name: "Sepolia Ether".to_string(),
                symbol: "ETH".to_string(),
                decimals: 18,
            },
            block_explorer_urls: vec!["https://sepolia-blockscout.lisk.com".to_string()],
        }
    }

    /// Chain id as wallets write it (`0x`-prefixed hex).
    pub fn chain_id_hex(&self) -> String {
        format!("{:#x}", self.chain_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluate_matches_target() {
        assert_eq!(NetworkStatus::evaluate(4202, 4202), NetworkStatus::Correct);
        assert_eq!(
            NetworkStatus::evaluate(1, 4202),
            NetworkStatus::Incorrect { current: 1 }
        );
    }

    #[test]
    fn default_is_unknown() {
        assert_eq!(NetworkStatus::default(), NetworkStatus::Unknown);
        assert!(!NetworkStatus::Unknown.is_correct());
    }

    #[test]
    fn lisk_sepolia_hex_id() {
        assert_eq!(ChainDefinition::lisk_sepolia().chain_id_hex(), "0x106a");
    }
}
