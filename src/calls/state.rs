//! Peer negotiation state machine.
//!
//! ```text
//! offerer:  Created -> AwaitingAnswer -> Negotiated
//! answerer: Created -> ReceivedOffer -> SentAnswer -> Negotiated
//! any phase -> Closed
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Which side of the offer/answer exchange a peer ended up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PeerRole {
    Offerer,
    Answerer,
}

/// Current phase of one peer's negotiation.
#[derive(Debug, Clone, Serialize)]
pub enum PeerPhase {
    Created,
    /// Entered when offer creation starts, so repeated negotiation-needed
    /// events never produce a second offer.
    AwaitingAnswer {
        offer_started_at: DateTime<Utc>,
    },
    ReceivedOffer {
        received_at: DateTime<Utc>,
    },
    SentAnswer {
        answer_sent_at: DateTime<Utc>,
    },
    Negotiated {
        negotiated_at: DateTime<Utc>,
    },
    Closed {
        closed_at: DateTime<Utc>,
        was_negotiated: bool,
    },
}

impl PeerPhase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::AwaitingAnswer { .. } => "AWAITING_ANSWER",
            Self::ReceivedOffer { .. } => "RECEIVED_OFFER",
            Self::SentAnswer { .. } => "SENT_ANSWER",
            Self::Negotiated { .. } => "NEGOTIATED",
            Self::Closed { .. } => "CLOSED",
        }
    }

    pub fn is_negotiated(&self) -> bool {
        matches!(self, Self::Negotiated { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerTransition {
    OfferStarted,
    OfferReceived,
    AnswerSent,
    AnswerReceived,
    /// The answerer's exchange completed once its answer went out.
    AnswerDelivered,
    Close,
}

/// Per-remote-participant bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct PeerState {
    pub remote_user_id: String,
    pub role: Option<PeerRole>,
    pub phase: PeerPhase,
    pub created_at: DateTime<Utc>,
    /// Log correlation only, never used for ordering.
    pub local_candidate_seq: u64,
    pub remote_candidate_seq: u64,
}

impl PeerState {
    pub fn new(remote_user_id: impl Into<String>) -> Self {
        Self {
            remote_user_id: remote_user_id.into(),
            role: None,
            phase: PeerPhase::Created,
            created_at: Utc::now(),
            local_candidate_seq: 0,
            remote_candidate_seq: 0,
        }
    }

    pub fn next_local_candidate(&mut self) -> u64 {
        self.local_candidate_seq += 1;
        self.local_candidate_seq
    }

    pub fn next_remote_candidate(&mut self) -> u64 {
        self.remote_candidate_seq += 1;
        self.remote_candidate_seq
    }

    /// Apply a state transition. Returns error if transition is invalid.
    pub fn apply_transition(&mut self, transition: PeerTransition) -> Result<(), InvalidTransition> {
        let now = Utc::now();
        let new_phase = match (&self.phase, transition) {
            (PeerPhase::Closed { .. }, _) => {
                return Err(InvalidTransition::new(&self.phase, transition));
            }
            (phase, PeerTransition::Close) => PeerPhase::Closed {
                closed_at: now,
                was_negotiated: phase.is_negotiated(),
            },
            (PeerPhase::Created, PeerTransition::OfferStarted) => {
                self.role = Some(PeerRole::Offerer);
                PeerPhase::AwaitingAnswer {
                    offer_started_at: now,
                }
            }
            (PeerPhase::Created, PeerTransition::OfferReceived) => {
                self.role = Some(PeerRole::Answerer);
                PeerPhase::ReceivedOffer { received_at: now }
            }
            (PeerPhase::ReceivedOffer { .. }, PeerTransition::AnswerSent) => {
                PeerPhase::SentAnswer {
                    answer_sent_at: now,
                }
            }
            (PeerPhase::SentAnswer { .. }, PeerTransition::AnswerDelivered)
            | (PeerPhase::AwaitingAnswer { .. }, PeerTransition::AnswerReceived) => {
                PeerPhase::Negotiated { negotiated_at: now }
            }
            (current, attempted) => return Err(InvalidTransition::new(current, attempted)),
        };
        self.phase = new_phase;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_state: &'static str,
    pub attempted: PeerTransition,
}

impl InvalidTransition {
    fn new(current: &PeerPhase, attempted: PeerTransition) -> Self {
        Self {
            current_state: current.name(),
            attempted,
        }
    }
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {:?} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}
