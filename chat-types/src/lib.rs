//! # chat-types
//!
//! Shared types for the Talk2Me chat sync layer.
//!
//! This crate provides the foundational types used across all chat crates:
//! - [`Address`], [`RoomId`], [`TxHash`], [`TransactionId`] - Identity types
//! - [`ReadCall`], [`WriteCall`], [`ReadValue`] - Ledger call descriptions
//! - [`Message`], [`IdentityRecord`] - Ledger data in local form
//! - [`TxPurpose`], [`TxStatus`], [`PendingTransaction`] - Write lifecycle
//! - [`LedgerError`] - Classified ledger errors

#![warn(missing_docs)]
#![warn(clippy::all)]

mod calls;
mod error;
mod ids;
mod message;
mod tx;

pub use calls::{Contract, ReadCall, ReadValue, WriteCall};
pub use error::{
    LedgerError, RpcFailure, CODE_INTERNAL_ERROR, CODE_TOO_MANY_REQUESTS, CODE_USER_REJECTED,
};
pub use ids::{Address, ParseIdError, RoomId, TransactionId, TxHash};
pub use message::{IdentityRecord, Message, MessageKind, RawMessage};
pub use tx::{PendingTransaction, TxPurpose, TxStatus};
