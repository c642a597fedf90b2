//! # chat-client
//!
//! Client sync layer between Talk2Me chat state and the ledger registries.
//!
//! This is the library applications drive: it reads and writes the identity
//! and chat registries, tracks writes to confirmation, and keeps a local view
//! of rooms and participation consistent with the ledger.
//!
//! ## Features
//!
//! - **Ledger Abstraction**: Pluggable [`Ledger`] (in-memory [`MockLedger`] included)
//! - **Read Cache**: TTL cache with single-flight fetches
//! - **Transaction Tracking**: Submitted → Confirming → Confirmed/Failed with a settle delay
//! - **Self-Healing Participation**: Bounded automatic re-join when the ledger disagrees
//! - **Network Guard**: Switch or add the target chain in the user's wallet
//! - **Pure State Machines**: Uses chat-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use talk2me_chat_client::{ChatSession, MockLedger, SessionConfig};
//! use talk2me_chat_types::MessageKind;
//!
//! let ledger = MockLedger::with_signer(actor);
//! let session = ChatSession::new(SessionConfig::default(), actor, ledger);
//!
//! // Global room, participation, messages, room list
//! let report = session.initialize().await?;
//!
//! // Broadcast to the global room
//! session.send_message("gm", MessageKind::Broadcast, None).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod content;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod network;
pub mod session;
pub mod tracker;

pub use cache::ReadCache;
pub use config::{
    CacheConfig, ConfigError, ContractsConfig, MessagesConfig, NetworkConfig, RegistrationConfig,
    SessionConfig, TimingConfig,
};
pub use content::{inline_reference, sniff_mime, ContentError, ContentStore, MockContentStore};
pub use error::SessionError;
pub use gateway::{Ledger, LedgerGateway, MockLedger};
pub use identity::RegistrationStatus;
pub use network::{MockWallet, NetworkGuard, Wallet, WalletError};
pub use session::{ChatSession, InitReport, JoinStatus, LoadedPage, SessionEvent};
pub use tracker::TransactionTracker;
