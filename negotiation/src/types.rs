//! Shared data model for a negotiation run.
//!
//! Every record produced during a run is plain data: decoding never yields an
//! absent record, and a round never mutates the proposal of an earlier round.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EngineResult, NegotiationError};
use crate::state_machine::PhaseTransition;

/// A person taking part in the negotiation. Identity is the address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    pub name: String,
    pub address: String,
}

impl Participant {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }

    /// Reject an empty participant list, blank addresses or duplicate
    /// addresses. Surrounding whitespace does not make an address distinct.
    pub fn validate_unique(participants: &[Participant]) -> EngineResult<()> {
        if participants.is_empty() {
            return Err(NegotiationError::NoParticipants);
        }
        let mut seen = HashSet::new();
        for p in participants {
            let address = p.address.trim();
            if address.is_empty() {
                return Err(NegotiationError::InvalidConfig(format!(
                    "participant '{}' has an empty address",
                    p.name
                )));
            }
            if !seen.insert(address) {
                return Err(NegotiationError::DuplicateParticipant(p.address.clone()));
            }
        }
        Ok(())
    }
}

/// Preferences decoded from one availability reply, before it is bound to a participant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityPayload {
    #[serde(default)]
    pub times: BTreeSet<String>,
    #[serde(default)]
    pub dates: BTreeSet<String>,
    #[serde(default)]
    pub places: BTreeSet<String>,
}

impl AvailabilityPayload {
    pub fn is_empty(&self) -> bool {
        self.times.is_empty() && self.dates.is_empty() && self.places.is_empty()
    }
}

/// One participant's stated availability for a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRecord {
    /// Address of the participant the reply came from.
    pub participant: String,
    #[serde(default)]
    pub times: BTreeSet<String>,
    #[serde(default)]
    pub dates: BTreeSet<String>,
    #[serde(default)]
    pub places: BTreeSet<String>,
}

impl AvailabilityRecord {
    /// A record with no preference in any dimension.
    pub fn empty(participant: impl Into<String>) -> Self {
        Self::from_payload(participant, AvailabilityPayload::default())
    }

    pub fn from_payload(participant: impl Into<String>, payload: AvailabilityPayload) -> Self {
        Self {
            participant: participant.into(),
            times: payload.times,
            dates: payload.dates,
            places: payload.places,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty() && self.dates.is_empty() && self.places.is_empty()
    }
}

/// The slot put forward for confirmation. Empty fields mean "undetermined".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProposedSlot {
    pub time: String,
    pub date: String,
    pub place: String,
}

impl ProposedSlot {
    /// Whether every dimension received at least one vote.
    pub fn is_complete(&self) -> bool {
        !self.time.is_empty() && !self.date.is_empty() && !self.place.is_empty()
    }
}

impl fmt::Display for ProposedSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn or_tbd(value: &str) -> &str {
            if value.is_empty() {
                "TBD"
            } else {
                value
            }
        }
        write!(
            f,
            "{} at {} ({})",
            or_tbd(&self.date),
            or_tbd(&self.time),
            or_tbd(&self.place)
        )
    }
}

/// One participant's answer to a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationRecord {
    pub participant: String,
    pub agreed: bool,
    /// False when no reply text arrived at all (as opposed to an unreadable one).
    #[serde(default)]
    pub responded: bool,
}

/// A single tally-and-confirm cycle. Round numbers start at 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiationRound {
    pub round_number: u32,
    pub proposal: ProposedSlot,
    pub confirmations: Vec<ConfirmationRecord>,
}

impl NegotiationRound {
    /// Addresses that did not agree with this round's proposal.
    pub fn dissenters(&self) -> Vec<&str> {
        self.confirmations
            .iter()
            .filter(|c| !c.agreed)
            .map(|c| c.participant.as_str())
            .collect()
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every in-scope participant agreed.
    Converged,
    /// The round budget ran out with disagreement left.
    BudgetExhausted,
    /// The caller cancelled between rounds.
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Converged => write!(f, "converged"),
            Self::BudgetExhausted => write!(f, "budget_exhausted"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome of a full negotiation. Non-convergence is an outcome, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationResult {
    pub final_proposal: ProposedSlot,
    pub converged: bool,
    pub rounds_used: u32,
    pub stop_reason: StopReason,
    #[serde(default)]
    pub rounds: Vec<NegotiationRound>,
    #[serde(default)]
    pub transitions: Vec<PhaseTransition>,
}
