//! Negotiation state machine: explicit phases and legal transition guards.
//!
//! The loop calls [`PhaseMachine::advance`] between phases. Each call checks
//! the edge against the transition table and records it, so a finished run
//! carries an auditable log of how it got to its terminal phase.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Phases of one negotiation.
///
/// Every run starts at `Inviting` and ends at `Converged` or `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationPhase {
    /// Collecting availability from the participants in scope.
    Inviting,
    /// Computing a proposal from the collected records.
    Tallying,
    /// Circulating the proposal and collecting answers.
    Confirming,
    /// Re-polling dissenters for fresh availability.
    Renegotiating,
    /// Everyone in scope agreed. Terminal.
    Converged,
    /// Budget spent, cancelled, or aborted. Terminal.
    Terminated,
}

impl NegotiationPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Converged | Self::Terminated)
    }
}

impl fmt::Display for NegotiationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inviting => write!(f, "Inviting"),
            Self::Tallying => write!(f, "Tallying"),
            Self::Confirming => write!(f, "Confirming"),
            Self::Renegotiating => write!(f, "Renegotiating"),
            Self::Converged => write!(f, "Converged"),
            Self::Terminated => write!(f, "Terminated"),
        }
    }
}

/// ```text
/// Inviting → Tallying
/// Tallying → Confirming
/// Confirming → Converged | Renegotiating | Terminated
/// Renegotiating → Tallying
/// any non-terminal → Terminated
/// ```
fn is_legal_transition(from: NegotiationPhase, to: NegotiationPhase) -> bool {
    use NegotiationPhase::*;

    if to == Terminated && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Inviting, Tallying)
            | (Tallying, Confirming)
            | (Confirming, Converged)
            | (Confirming, Renegotiating)
            | (Renegotiating, Tallying)
    )
}

/// A recorded phase change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: NegotiationPhase,
    pub to: NegotiationPhase,
    /// Round number at the time of the transition.
    pub round: u32,
    /// Milliseconds since the machine was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Returned when an edge is not in the transition table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: NegotiationPhase,
    pub to: NegotiationPhase,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal phase transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Tracks the current phase and the transition log.
#[derive(Debug)]
pub struct PhaseMachine {
    current: NegotiationPhase,
    round: u32,
    created_at: Instant,
    transitions: Vec<PhaseTransition>,
}

impl PhaseMachine {
    pub fn new() -> Self {
        Self {
            current: NegotiationPhase::Inviting,
            round: 0,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> NegotiationPhase {
        self.current
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn set_round(&mut self, round: u32) {
        self.round = round;
    }

    pub fn advance(
        &mut self,
        to: NegotiationPhase,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        tracing::debug!(from = %self.current, to = %to, round = self.round, "Phase transition");

        self.transitions.push(PhaseTransition {
            from: self.current,
            to,
            round: self.round,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }

    /// Move to `Terminated` from any non-terminal phase.
    pub fn terminate(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(NegotiationPhase::Terminated, Some(reason))
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[PhaseTransition] {
        &self.transitions
    }

    /// One-line history, e.g. `Inviting → Converged [Tallying → Confirming → Converged]`.
    pub fn summary(&self) -> String {
        let path: Vec<String> = self.transitions.iter().map(|t| t.to.to_string()).collect();
        let mut out = format!("{} → {}", NegotiationPhase::Inviting, self.current);
        if !path.is_empty() {
            out.push_str(&format!(" [{}]", path.join(" → ")));
        }
        out
    }
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_inviting() {
        let sm = PhaseMachine::new();
        assert_eq!(sm.current(), NegotiationPhase::Inviting);
        assert!(!sm.is_terminal());
        assert!(sm.transitions().is_empty());
    }

    #[test]
    fn converging_path() {
        let mut sm = PhaseMachine::new();
        sm.advance(NegotiationPhase::Tallying, None).unwrap();
        sm.advance(NegotiationPhase::Confirming, None).unwrap();
        sm.advance(NegotiationPhase::Converged, Some("all agreed"))
            .unwrap();
        assert!(sm.is_terminal());
        assert_eq!(sm.transitions().len(), 3);
        assert_eq!(
            sm.summary(),
            "Inviting → Converged [Tallying → Confirming → Converged]"
        );
    }

    #[test]
    fn renegotiation_loops_back_to_tallying() {
        let mut sm = PhaseMachine::new();
        sm.advance(NegotiationPhase::Tallying, None).unwrap();
        sm.advance(NegotiationPhase::Confirming, None).unwrap();
        sm.advance(NegotiationPhase::Renegotiating, Some("1 dissenter"))
            .unwrap();
        sm.set_round(1);
        sm.advance(NegotiationPhase::Tallying, None).unwrap();
        sm.advance(NegotiationPhase::Confirming, None).unwrap();
        sm.terminate("budget exhausted").unwrap();
        assert_eq!(sm.current(), NegotiationPhase::Terminated);
        assert_eq!(sm.transitions().last().unwrap().round, 1);
    }

    #[test]
    fn terminal_phases_are_final() {
        let mut sm = PhaseMachine::new();
        sm.terminate("cancelled").unwrap();
        let err = sm.advance(NegotiationPhase::Tallying, None).unwrap_err();
        assert_eq!(err.from, NegotiationPhase::Terminated);
        assert!(sm.terminate("again").is_err());
    }

    #[test]
    fn skipping_tally_is_illegal() {
        let mut sm = PhaseMachine::new();
        assert!(sm.advance(NegotiationPhase::Confirming, None).is_err());
        assert_eq!(sm.current(), NegotiationPhase::Inviting);
    }
}
