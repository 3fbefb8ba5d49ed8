//! Error taxonomy for the negotiation engine.
//!
//! Only faults the engine has no sound default for are errors. An unreadable
//! or missing reply degrades to "no preference" / "disagree" inside the
//! exchange layer and never reaches this type. Running out of rounds is a
//! defined outcome carried by [`crate::NegotiationResult`].
//!
//! | Kind                | Recovered locally | Surfaces here |
//! |---------------------|-------------------|---------------|
//! | Decode failure      | yes               | no            |
//! | No response         | yes               | no            |
//! | Rejected delivery   | yes               | no            |
//! | Transport unreachable | no              | `Transport`   |
//! | Bad configuration   | no                | `InvalidConfig`, `NoParticipants`, `DuplicateParticipant` |

use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, NegotiationError>;

/// Failure reported by a [`crate::Messenger`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The transport itself cannot be reached; no participant can be contacted.
    #[error("transport unreachable: {0}")]
    Unreachable(String),

    /// Delivery to one address was refused; other participants are unaffected.
    #[error("delivery to {address} rejected: {reason}")]
    Rejected { address: String, reason: String },
}

impl TransportError {
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Unreachable(message.into())
    }

    pub fn rejected(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Whether this fault aborts the whole round rather than one exchange.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

/// Errors that abort a negotiation.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("participant list is empty")]
    NoParticipants,

    #[error("duplicate participant address: {0}")]
    DuplicateParticipant(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("negotiation cancelled after {rounds_completed} round(s)")]
    Cancelled { rounds_completed: u32 },

    /// An engine invariant was violated (e.g. an illegal phase transition).
    #[error("internal error: {0}")]
    Internal(String),
}

impl NegotiationError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Whether the error stems from input the caller supplied.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_) | Self::NoParticipants | Self::DuplicateParticipant(_)
        )
    }

    /// Actionable hint for the operator.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Self::InvalidConfig(_) => Some(
                "Check the negotiation section of the config: max_rounds and reply_attempts \
                 must be at least 1.",
            ),
            Self::NoParticipants => Some("Add at least one entry under `participants`."),
            Self::DuplicateParticipant(_) => {
                Some("Each participant needs a distinct address. Remove or fix the duplicate.")
            }
            Self::Transport(TransportError::Unreachable(_)) => Some(
                "The message transport could not be reached. Verify the mailbox directory \
                 exists or the relay URL is up, then rerun.",
            ),
            Self::Transport(TransportError::Rejected { .. }) => None,
            Self::Cancelled { .. } => None,
            Self::Internal(_) => None,
        }
    }

    /// Error text followed by the recovery hint, if any.
    pub fn with_suggestion(&self) -> String {
        match self.recovery_suggestion() {
            Some(suggestion) => format!("{}\n\nRecovery: {}", self, suggestion),
            None => self.to_string(),
        }
    }
}
