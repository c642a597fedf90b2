//! Transaction lifecycle transitions.
//!
//! `Submitted -> Confirming -> Confirmed | Failed`, with `Submitted -> Failed`
//! allowed for writes that never reach the mempool. Nothing moves backwards
//! and terminal states are final.

use thiserror::Error;
use talk2me_chat_types::TxStatus;

/// Lifecycle signals from the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxEvent {
    /// The write is waiting for inclusion.
    Confirming,
    /// The write was included and settled.
    Confirmed,
    /// The write reverted or timed out.
    Failed,
}

/// A transition that would break monotonicity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transaction transition from {from:?} on {event:?}")]
pub struct InvalidTransition {
    /// Status before the event.
    pub from: TxStatus,
    /// Rejected event.
    pub event: TxEvent,
}

/// Apply `event` to `current`.
pub fn advance(current: TxStatus, event: TxEvent) -> Result<TxStatus, InvalidTransition> {
    match (current, event) {
        (TxStatus::Submitted, TxEvent::Confirming) => Ok(TxStatus::Confirming),
        (TxStatus::Submitted | TxStatus::Confirming, TxEvent::Failed) => Ok(TxStatus::Failed),
        (TxStatus::Confirming, TxEvent::Confirmed) => Ok(TxStatus::Confirmed),
        (from, event) => Err(InvalidTransition { from, event }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let s = advance(TxStatus::Submitted, TxEvent::Confirming).unwrap();
        let s = advance(s, TxEvent::Confirmed).unwrap();
        assert_eq!(s, TxStatus::Confirmed);
    }

    #[test]
    fn failure_from_either_open_state() {
        assert_eq!(
            advance(TxStatus::Submitted, TxEvent::Failed),
            Ok(TxStatus::Failed)
        );
        assert_eq!(
            advance(TxStatus::Confirming, TxEvent::Failed),
            Ok(TxStatus::Failed)
        );
    }

    #[test]
    fn terminal_states_never_change() {
        for event in [TxEvent::Confirming, TxEvent::Confirmed, TxEvent::Failed] {
            assert!(advance(TxStatus::Confirmed, event).is_err());
            assert!(advance(TxStatus::Failed, event).is_err());
        }
    }

    #[test]
    fn cannot_skip_confirming() {
        let err = advance(TxStatus::Submitted, TxEvent::Confirmed).unwrap_err();
        assert_eq!(err.from, TxStatus::Submitted);
    }
}
