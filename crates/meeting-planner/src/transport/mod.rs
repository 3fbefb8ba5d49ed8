//! Concrete [`Messenger`] implementations.

mod http;
mod mailbox;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use negotiation::Messenger;
use tracing::info;

pub use http::HttpRelayMessenger;
pub use mailbox::{Envelope, MailboxMessenger};

use crate::config::TransportConfig;

/// Build the messenger a config asks for.
pub fn build_messenger(config: &TransportConfig) -> Result<Arc<dyn Messenger>> {
    match config {
        TransportConfig::Mailbox { root } => {
            info!(root = %root.display(), "Using mailbox transport");
            Ok(Arc::new(MailboxMessenger::new(root.clone())))
        }
        TransportConfig::Http {
            base_url,
            timeout_secs,
        } => {
            info!(base_url = %base_url, "Using HTTP relay transport");
            Ok(Arc::new(HttpRelayMessenger::new(
                base_url,
                Duration::from_secs(*timeout_secs),
            )?))
        }
    }
}
