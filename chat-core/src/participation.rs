//! Participation state machine.
//!
//! Tracks, per room, whether the local actor may read and write it. The
//! ledger's participant set is ground truth; this machine is a lagging local
//! mirror that heals itself when a read disagrees with it.
//!
//! Like the rest of this crate it is pure: it takes events and returns the
//! new state plus actions. The session interprets the actions (submitting a
//! join, reloading messages) and feeds the outcomes back as events.

use talk2me_chat_types::TransactionId;

/// Participation of the local actor in one room.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ParticipationState {
    /// Nothing known yet.
    #[default]
    Unknown,
    /// The ledger says we are not a participant.
    NotParticipant,
    /// Join write accepted by the provider.
    JoinSubmitted {
        /// Tracked join transaction.
        tx: TransactionId,
        /// Whether this join is an automatic remediation.
        remediation: bool,
    },
    /// Join waiting for inclusion.
    JoinConfirming {
        /// Tracked join transaction.
        tx: TransactionId,
        /// Whether this join is an automatic remediation.
        remediation: bool,
    },
    /// We are a participant.
    Participant,
    /// We believed we were a participant but a read was refused.
    ParticipantStale,
}

impl ParticipationState {
    /// Create a new state machine in the Unknown state.
    pub fn new() -> Self {
        Self::Unknown
    }

    /// Process an event and return the new state plus actions to execute.
    pub fn on_event(self, event: ParticipationEvent) -> (Self, Vec<ParticipationAction>) {
        use ParticipationAction as A;
        use ParticipationEvent as E;

        match (self, event) {
            // Participation checks. A check racing a pending join is ignored:
            // it may reflect the ledger before the join was included.
            (s @ (Self::JoinSubmitted { .. } | Self::JoinConfirming { .. }), E::CheckCompleted { .. }) => {
                (s, vec![])
            }
            (_, E::CheckCompleted { is_participant: true }) => {
                (Self::Participant, vec![A::LoadMessages])
            }
            (_, E::CheckCompleted {
                is_participant: false,
            }) => (Self::NotParticipant, vec![]),

            // Join requests are serialized: at most one join in flight.
            (Self::Participant, E::JoinRequested) => (Self::Participant, vec![]),
            (Self::JoinSubmitted { tx, remediation }, E::JoinRequested) => (
                Self::JoinSubmitted { tx, remediation },
                vec![A::AwaitJoin { tx }],
            ),
            (Self::JoinConfirming { tx, remediation }, E::JoinRequested) => (
                Self::JoinConfirming { tx, remediation },
                vec![A::AwaitJoin { tx }],
            ),
            (s @ (Self::Unknown | Self::NotParticipant | Self::ParticipantStale), E::JoinRequested) => {
                (s, vec![A::SubmitJoin { remediation: false }])
            }

            // Join lifecycle
            (
                Self::Unknown | Self::NotParticipant | Self::ParticipantStale,
                E::JoinSubmitted { tx, remediation },
            ) => (Self::JoinSubmitted { tx, remediation }, vec![]),
            (Self::JoinSubmitted { tx, remediation }, E::JoinConfirming) => {
                (Self::JoinConfirming { tx, remediation }, vec![])
            }
            (Self::JoinConfirming { .. }, E::JoinConfirmed) => (
                Self::Participant,
                vec![A::Emit(ParticipationNotice::Joined), A::LoadMessages],
            ),
            (
                Self::JoinSubmitted { remediation, .. } | Self::JoinConfirming { remediation, .. },
                E::JoinFailed { error },
            ) => {
                let notice = if remediation {
                    ParticipationNotice::RemediationFailed { error }
                } else {
                    ParticipationNotice::JoinFailed { error }
                };
                (Self::NotParticipant, vec![A::Emit(notice)])
            }

            // Reads: the ledger answered, so it agrees we are a participant.
            (s @ (Self::JoinSubmitted { .. } | Self::JoinConfirming { .. }), E::MessagesRead) => {
                (s, vec![])
            }
            (Self::Unknown | Self::Participant, E::MessagesRead) => (Self::Participant, vec![]),
            (Self::NotParticipant | Self::ParticipantStale, E::MessagesRead) => (
                Self::Participant,
                vec![A::Emit(ParticipationNotice::Healed)],
            ),

            // Reads refused by the ledger.
            (Self::JoinSubmitted { tx, remediation }, E::AccessDenied { .. }) => (
                Self::JoinSubmitted { tx, remediation },
                vec![A::AwaitJoin { tx }],
            ),
            (Self::JoinConfirming { tx, remediation }, E::AccessDenied { .. }) => (
                Self::JoinConfirming { tx, remediation },
                vec![A::AwaitJoin { tx }],
            ),
            (Self::Participant, E::AccessDenied { remediation_allowed: true }) => (
                Self::ParticipantStale,
                vec![
                    A::Emit(ParticipationNotice::BecameStale),
                    A::SubmitJoin { remediation: true },
                ],
            ),
            (
                Self::Unknown | Self::NotParticipant,
                E::AccessDenied {
                    remediation_allowed: true,
                },
            ) => (Self::NotParticipant, vec![A::SubmitJoin { remediation: true }]),
            (Self::ParticipantStale, E::AccessDenied { remediation_allowed: true }) => (
                Self::ParticipantStale,
                vec![A::SubmitJoin { remediation: true }],
            ),
            (_, E::AccessDenied {
                remediation_allowed: false,
            }) => (
                Self::NotParticipant,
                vec![A::Emit(ParticipationNotice::RemediationFailed {
                    error: "still not a participant".into(),
                })],
            ),

            (_, E::Invalidated) => (Self::Unknown, vec![]),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if the ledger considers us a participant.
    pub fn is_participant(&self) -> bool {
        matches!(self, Self::Participant)
    }

    /// The join transaction in flight, if any.
    pub fn pending_join(&self) -> Option<TransactionId> {
        match self {
            Self::JoinSubmitted { tx, .. } | Self::JoinConfirming { tx, .. } => Some(*tx),
            _ => None,
        }
    }
}

/// Inputs to the participation machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipationEvent {
    /// A participation-check read returned.
    CheckCompleted {
        /// What the ledger said.
        is_participant: bool,
    },
    /// Someone asked to join.
    JoinRequested,
    /// The join write was accepted.
    JoinSubmitted {
        /// Tracked join transaction.
        tx: TransactionId,
        /// Whether this join is an automatic remediation.
        remediation: bool,
    },
    /// The tracker reports the join is confirming.
    JoinConfirming,
    /// The tracker reports the join confirmed and settled.
    JoinConfirmed,
    /// The join reverted or timed out.
    JoinFailed {
        /// Classified failure.
        error: String,
    },
    /// A message read succeeded.
    MessagesRead,
    /// A message read failed with a participation error.
    AccessDenied {
        /// Whether the current load still has remediation budget.
        remediation_allowed: bool,
    },
    /// Dependent state was invalidated (e.g. chain change).
    Invalidated,
}

/// Instructions for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipationAction {
    /// Submit a join write.
    SubmitJoin {
        /// Whether this join is an automatic remediation.
        remediation: bool,
    },
    /// A join is already in flight; wait on it instead of submitting.
    AwaitJoin {
        /// The join in flight.
        tx: TransactionId,
    },
    /// Reload messages for the room.
    LoadMessages,
    /// Report something to the application.
    Emit(ParticipationNotice),
}

/// Notices surfaced to the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipationNotice {
    /// A join confirmed.
    Joined,
    /// A user-requested join failed; the user may retry.
    JoinFailed {
        /// Classified failure.
        error: String,
    },
    /// Automatic remediation failed; terminal for this load.
    RemediationFailed {
        /// Classified failure.
        error: String,
    },
    /// Local belief said Participant but the ledger refused a read.
    BecameStale,
    /// Local belief said not a participant but the ledger served a read.
    Healed,
}

/// Bounds automatic re-join attempts.
///
/// One budget is created per message load, so a load can trigger at most
/// `max` re-joins no matter how the ledger answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemediationBudget {
    remaining: u32,
}

impl RemediationBudget {
    /// Budget for a single load: one attempt.
    pub fn per_load() -> Self {
        Self::new(1)
    }

    /// Budget with `max` attempts.
    pub fn new(max: u32) -> Self {
        Self { remaining: max }
    }

    /// Take one attempt. Returns false when exhausted.
    pub fn try_consume(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }

    /// Attempts left.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}
