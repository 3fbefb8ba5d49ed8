//! Per-round message exchanges.
//!
//! One exchange = send a message to one participant, then wait (bounded) for
//! the reply. All exchanges of a round run concurrently and the round returns
//! only once every one of them has finished or timed out. Exchanges share no
//! mutable state; their replies are decoded and merged after the barrier.

use std::sync::Arc;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{EngineResult, TransportError};
use crate::messages::Message;
use crate::messenger::{Messenger, Pacer, ReplyPolicy};
use crate::reply_codec::{decode_availability, decode_confirmation};
use crate::types::{AvailabilityRecord, ConfirmationRecord, Participant};

/// Runs message exchanges against an injected [`Messenger`].
#[derive(Clone)]
pub struct Exchange {
    messenger: Arc<dyn Messenger>,
    pacer: Arc<dyn Pacer>,
    policy: ReplyPolicy,
}

impl Exchange {
    pub fn new(messenger: Arc<dyn Messenger>, pacer: Arc<dyn Pacer>, policy: ReplyPolicy) -> Self {
        Self {
            messenger,
            pacer,
            policy,
        }
    }

    /// Send `compose(p)` to every participant and decode each reply as availability.
    ///
    /// Records come back in participant order; a missing or unreadable reply
    /// becomes an empty record.
    pub async fn collect_availability<F>(
        &self,
        participants: &[Participant],
        compose: F,
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<AvailabilityRecord>>
    where
        F: Fn(&Participant) -> Message,
    {
        let replies = self.round(participants, compose, cancel).await?;
        let records: Vec<AvailabilityRecord> = participants
            .iter()
            .zip(replies)
            .map(|(p, reply)| {
                AvailabilityRecord::from_payload(
                    p.address.clone(),
                    decode_availability(reply.as_deref()),
                )
            })
            .collect();
        info!(
            scope = participants.len(),
            with_preferences = records.iter().filter(|r| !r.is_empty()).count(),
            "Availability collected"
        );
        Ok(records)
    }

    /// Send `compose(p)` to every participant and decode each reply as a confirmation.
    pub async fn collect_confirmations<F>(
        &self,
        participants: &[Participant],
        compose: F,
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<ConfirmationRecord>>
    where
        F: Fn(&Participant) -> Message,
    {
        let replies = self.round(participants, compose, cancel).await?;
        let records: Vec<ConfirmationRecord> = participants
            .iter()
            .zip(replies)
            .map(|(p, reply)| ConfirmationRecord {
                participant: p.address.clone(),
                agreed: decode_confirmation(reply.as_deref()),
                responded: reply.is_some(),
            })
            .collect();
        info!(
            scope = participants.len(),
            agreed = records.iter().filter(|c| c.agreed).count(),
            "Confirmations collected"
        );
        Ok(records)
    }

    /// Run one exchange per participant concurrently and wait for all of them.
    async fn round<F>(
        &self,
        participants: &[Participant],
        compose: F,
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<Option<String>>>
    where
        F: Fn(&Participant) -> Message,
    {
        let exchanges = participants
            .iter()
            .map(|p| self.exchange(p, compose(p), cancel));
        let outcomes = join_all(exchanges).await;

        let mut replies = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            replies.push(outcome?);
        }
        Ok(replies)
    }

    /// Send then wait. Only fatal transport faults escape; everything else is "no reply".
    async fn exchange(
        &self,
        participant: &Participant,
        message: Message,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, TransportError> {
        let address = participant.address.as_str();

        if let Err(e) = self
            .messenger
            .send(address, &message.subject, &message.body)
            .await
        {
            if e.is_fatal() {
                return Err(e);
            }
            warn!(address, error = %e, "Delivery failed, treating participant as silent");
            return Ok(None);
        }

        let reply = tokio::select! {
            biased;
            reply = self.messenger.await_reply(address, &self.policy, self.pacer.as_ref()) => reply,
            _ = cancel.cancelled() => {
                debug!(address, "Exchange cancelled while waiting for reply");
                return Ok(None);
            }
        };

        match reply {
            Ok(reply) => {
                if reply.is_none() {
                    info!(address, attempts = self.policy.attempts, "No reply received");
                }
                Ok(reply)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(address, error = %e, "Reply fetch failed, treating participant as silent");
                Ok(None)
            }
        }
    }
}
