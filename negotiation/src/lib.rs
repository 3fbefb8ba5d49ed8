//! Meeting negotiation engine.
//!
//! Collects availability from a group of participants, proposes a single
//! slot by plurality vote, circulates it for confirmation and re-polls only
//! the dissenters until everyone in scope agrees or the round budget runs out.
//!
//! The engine is transport-agnostic: all contact with participants goes
//! through the [`Messenger`] trait, injected at construction.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use negotiation::{NegotiationConfig, NegotiationLoop, Participant, TokioPacer};
//! use tokio_util::sync::CancellationToken;
//!
//! let engine = NegotiationLoop::new(messenger, Arc::new(TokioPacer), NegotiationConfig::default());
//! let result = engine.run(&participants, &CancellationToken::new()).await?;
//! println!("{} (converged: {})", result.final_proposal, result.converged);
//! ```

pub mod error;
pub mod exchange;
pub mod messages;
pub mod messenger;
pub mod negotiation_loop;
pub mod reply_codec;
pub mod state_machine;
pub mod tally;
pub mod types;

pub use error::{EngineResult, NegotiationError, TransportError};
pub use exchange::Exchange;
pub use messages::{Message, MessageTemplates};
pub use messenger::{Messenger, Pacer, ReplyPolicy, TokioPacer};
pub use negotiation_loop::{NegotiationConfig, NegotiationLoop, SilencePolicy};
pub use reply_codec::{decode_availability, decode_confirmation};
pub use state_machine::{IllegalTransition, NegotiationPhase, PhaseMachine, PhaseTransition};
pub use tally::{aggregate, tally, TallyReport, VoteCounts};
pub use types::{
    AvailabilityPayload, AvailabilityRecord, ConfirmationRecord, NegotiationResult,
    NegotiationRound, Participant, ProposedSlot, StopReason,
};
