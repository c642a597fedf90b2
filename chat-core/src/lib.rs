//! # chat-core
//!
//! Pure logic for the Talk2Me chat sync layer (no I/O, instant tests).
//!
//! This crate implements the state machines and policies of the sync layer
//! without any network or wallet I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. The actual I/O (ledger calls, wallet requests) is
//! performed by `chat-client`, which interprets the actions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod lifecycle;
pub mod network;
pub mod participation;
pub mod retry;
pub mod view;

pub use lifecycle::{advance, InvalidTransition, TxEvent};
pub use network::{ChainDefinition, NativeCurrency, NetworkStatus};
pub use participation::{
    ParticipationAction, ParticipationEvent, ParticipationNotice, ParticipationState,
    RemediationBudget,
};
pub use retry::RetryPolicy;
pub use view::{RoomView, ViewTicket};
