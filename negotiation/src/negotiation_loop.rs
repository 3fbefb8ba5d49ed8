//! The bounded renegotiation loop.
//!
//! ```text
//! Inviting ─► Tallying ─► Confirming ─┬─► Converged
//!                ▲                     ├─► Terminated   (budget spent / cancelled)
//!                └──── Renegotiating ◄─┘                (dissenters only)
//! ```
//!
//! Round 0 polls everybody. Each later round re-polls only the participants
//! that blocked the previous proposal, tallies their fresh availability into
//! a new proposal and asks only them to confirm it. The loop runs at most
//! `max_rounds` rounds.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{EngineResult, NegotiationError};
use crate::exchange::Exchange;
use crate::messages::MessageTemplates;
use crate::messenger::{Messenger, Pacer, ReplyPolicy};
use crate::state_machine::{NegotiationPhase, PhaseMachine};
use crate::tally::aggregate;
use crate::types::{
    ConfirmationRecord, NegotiationResult, NegotiationRound, Participant, StopReason,
};

/// How a participant who never answers a confirmation is counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SilencePolicy {
    /// Silence blocks consensus, same as an explicit "no".
    #[default]
    Blocking,
    /// Silent participants drop out of the agreement requirement and later rounds.
    ///
    /// Consensus still needs at least one agreement over the run: a round in
    /// which everyone is silent and nobody has agreed so far keeps the whole
    /// scope blocking.
    Exclude,
}

impl SilencePolicy {
    /// Whether this confirmation prevents convergence.
    pub fn blocks(self, confirmation: &ConfirmationRecord) -> bool {
        match self {
            Self::Blocking => !confirmation.agreed,
            Self::Exclude => confirmation.responded && !confirmation.agreed,
        }
    }
}

/// Tunables for one negotiation.
#[derive(Debug, Clone)]
pub struct NegotiationConfig {
    /// Upper bound on rounds, including round 0. Must be at least 1.
    pub max_rounds: u32,
    pub reply_policy: ReplyPolicy,
    pub silence: SilencePolicy,
    pub templates: MessageTemplates,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            reply_policy: ReplyPolicy::default(),
            silence: SilencePolicy::default(),
            templates: MessageTemplates::default(),
        }
    }
}

impl NegotiationConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.max_rounds == 0 {
            return Err(NegotiationError::invalid_config("max_rounds must be at least 1"));
        }
        if self.reply_policy.attempts == 0 {
            return Err(NegotiationError::invalid_config(
                "reply attempts must be at least 1",
            ));
        }
        if self.reply_policy.max_wait().is_none() {
            return Err(NegotiationError::invalid_config(
                "reply interval is too large for the number of attempts",
            ));
        }
        Ok(())
    }
}

/// Drives a negotiation over an injected messenger.
pub struct NegotiationLoop {
    exchange: Exchange,
    config: NegotiationConfig,
}

impl NegotiationLoop {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        pacer: Arc<dyn Pacer>,
        config: NegotiationConfig,
    ) -> Self {
        let exchange = Exchange::new(messenger, pacer, config.reply_policy);
        Self { exchange, config }
    }

    pub fn config(&self) -> &NegotiationConfig {
        &self.config
    }

    /// Negotiate a slot with `participants`.
    ///
    /// Returns `Ok` for every defined outcome, including non-convergence and
    /// cancellation after at least one round. Errors are configuration
    /// problems, cancellation before any proposal exists, and fatal transport faults.
    pub async fn run(
        &self,
        participants: &[Participant],
        cancel: &CancellationToken,
    ) -> EngineResult<NegotiationResult> {
        self.config.validate()?;
        Participant::validate_unique(participants)?;

        if cancel.is_cancelled() {
            return Err(NegotiationError::Cancelled {
                rounds_completed: 0,
            });
        }

        let max_wait = self.config.reply_policy.max_wait().unwrap_or(Duration::MAX);
        info!(
            participants = participants.len(),
            max_rounds = self.config.max_rounds,
            max_wait_secs = max_wait.as_secs(),
            silence = ?self.config.silence,
            "Negotiation starting"
        );

        let mut machine = PhaseMachine::new();
        match self.negotiate(participants, cancel, &mut machine).await {
            Ok(result) => {
                info!(
                    converged = result.converged,
                    rounds_used = result.rounds_used,
                    stop_reason = %result.stop_reason,
                    proposal = %result.final_proposal,
                    history = %machine.summary(),
                    "Negotiation finished"
                );
                Ok(result)
            }
            Err(e) => {
                error!(error = %e, phase = %machine.current(), round = machine.round(), "Negotiation aborted");
                Err(e)
            }
        }
    }

    async fn negotiate(
        &self,
        participants: &[Participant],
        cancel: &CancellationToken,
        machine: &mut PhaseMachine,
    ) -> EngineResult<NegotiationResult> {
        let templates = &self.config.templates;
        let mut rounds: Vec<NegotiationRound> = Vec::new();
        let mut scope: Vec<Participant> = participants.to_vec();
        let mut anyone_agreed = false;

        let mut records = self
            .exchange
            .collect_availability(&scope, |p| templates.invitation(p), cancel)
            .await?;
        if cancel.is_cancelled() {
            terminate(machine, "cancelled")?;
            return Err(NegotiationError::Cancelled {
                rounds_completed: 0,
            });
        }

        let mut round_number: u32 = 0;
        loop {
            advance(machine, NegotiationPhase::Tallying, None)?;
            let proposal = aggregate(&records);
            info!(round = round_number, scope = scope.len(), %proposal, "Proposal derived");
            if !proposal.is_complete() {
                warn!(round = round_number, %proposal, "Proposal has undetermined dimensions");
            }

            advance(machine, NegotiationPhase::Confirming, None)?;
            let confirmations = self
                .exchange
                .collect_confirmations(&scope, |p| templates.confirmation(p, &proposal), cancel)
                .await?;

            let mut blocking: Vec<Participant> = scope
                .iter()
                .zip(&confirmations)
                .filter(|(_, c)| self.config.silence.blocks(c))
                .map(|(p, _)| p.clone())
                .collect();
            anyone_agreed |= confirmations.iter().any(|c| c.agreed);
            if blocking.is_empty() && !anyone_agreed {
                warn!(
                    round = round_number,
                    "Nobody in scope answered and nobody has agreed yet"
                );
                blocking = scope.clone();
            }

            rounds.push(NegotiationRound {
                round_number,
                proposal: proposal.clone(),
                confirmations,
            });

            if blocking.is_empty() {
                advance(machine, NegotiationPhase::Converged, Some("all in scope agreed"))?;
                return Ok(finish(rounds, StopReason::Converged, machine));
            }

            if round_number + 1 >= self.config.max_rounds {
                warn!(
                    round = round_number,
                    dissenters = blocking.len(),
                    "Round budget exhausted without consensus"
                );
                terminate(machine, "round budget exhausted")?;
                return Ok(finish(rounds, StopReason::BudgetExhausted, machine));
            }

            if cancel.is_cancelled() {
                info!(round = round_number, "Cancelled before next round");
                terminate(machine, "cancelled")?;
                return Ok(finish(rounds, StopReason::Cancelled, machine));
            }

            let reason = format!("{} dissenter(s)", blocking.len());
            advance(machine, NegotiationPhase::Renegotiating, Some(&reason))?;
            info!(
                round = round_number,
                dissenters = ?blocking.iter().map(|p| p.address.as_str()).collect::<Vec<_>>(),
                "Renegotiating with dissenters"
            );

            scope = blocking;
            records = self
                .exchange
                .collect_availability(&scope, |p| templates.renegotiation(p, &proposal), cancel)
                .await?;

            if cancel.is_cancelled() {
                terminate(machine, "cancelled")?;
                return Ok(finish(rounds, StopReason::Cancelled, machine));
            }

            round_number += 1;
            machine.set_round(round_number);
        }
    }
}

fn advance(
    machine: &mut PhaseMachine,
    to: NegotiationPhase,
    reason: Option<&str>,
) -> EngineResult<()> {
    machine
        .advance(to, reason)
        .map_err(|e| NegotiationError::Internal(e.to_string()))
}

fn terminate(machine: &mut PhaseMachine, reason: &str) -> EngineResult<()> {
    machine
        .terminate(reason)
        .map_err(|e| NegotiationError::Internal(e.to_string()))
}

fn finish(
    rounds: Vec<NegotiationRound>,
    stop_reason: StopReason,
    machine: &PhaseMachine,
) -> NegotiationResult {
    let final_proposal = rounds
        .last()
        .map(|r| r.proposal.clone())
        .unwrap_or_default();
    NegotiationResult {
        final_proposal,
        converged: stop_reason == StopReason::Converged,
        rounds_used: rounds.len() as u32,
        stop_reason,
        rounds,
        transitions: machine.transitions().to_vec(),
    }
}
