//! Messenger contract: the engine's only view of the outside world.
//!
//! The engine sends text to an address and polls for a reply text. Transport
//! details (protocol, encoding, sessions) stay behind the trait. Waiting is
//! expressed as a [`ReplyPolicy`] and paced through an injected [`Pacer`], so
//! tests never sleep on the wall clock.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::error::TransportError;

/// Bounded wait for one reply: `attempts` checks, `interval` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl ReplyPolicy {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Upper bound on how long one exchange may wait. `None` when it does not
    /// fit in a `Duration`.
    pub fn max_wait(&self) -> Option<Duration> {
        self.interval.checked_mul(self.attempts.saturating_sub(1))
    }
}

impl Default for ReplyPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval: Duration::from_secs(30),
        }
    }
}

/// Source of delays between reply checks.
#[async_trait]
pub trait Pacer: Send + Sync {
    async fn pause(&self, duration: Duration);
}

/// Pacer backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioPacer;

#[async_trait]
impl Pacer for TokioPacer {
    async fn pause(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Send text to an address and poll for the reply.
///
/// Implementations own whatever connection or session they need and must not
/// hold it across calls.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Deliver one message.
    async fn send(&self, address: &str, subject: &str, body: &str) -> Result<(), TransportError>;

    /// Check once for a reply from `address`. `Ok(None)` means nothing yet.
    async fn fetch_reply(&self, address: &str) -> Result<Option<String>, TransportError>;

    /// Poll [`Messenger::fetch_reply`] until a reply arrives or the policy is spent.
    async fn await_reply(
        &self,
        address: &str,
        policy: &ReplyPolicy,
        pacer: &dyn Pacer,
    ) -> Result<Option<String>, TransportError> {
        for attempt in 1..=policy.attempts {
            trace!(address, attempt, attempts = policy.attempts, "Checking for reply");
            if let Some(reply) = self.fetch_reply(address).await? {
                debug!(address, attempt, "Reply received");
                return Ok(Some(reply));
            }
            if attempt < policy.attempts {
                pacer.pause(policy.interval).await;
            }
        }
        debug!(address, attempts = policy.attempts, "No reply within policy");
        Ok(None)
    }
}
