//! HTTP relay messenger.
//!
//! Talks to a relay service that fronts the real mail system:
//!
//! - `POST {base}/messages` with `{"to", "subject", "body"}` sends a message.
//! - `GET {base}/replies/{address}` returns the oldest pending reply as the
//!   response body, or `204`/`404` when there is none.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use negotiation::{Messenger, TransportError};
use reqwest::{StatusCode, Url};
use serde::Serialize;
use tracing::debug;

#[derive(Serialize)]
struct OutgoingMessage<'a> {
    to: &'a str,
    subject: &'a str,
    body: &'a str,
}

pub struct HttpRelayMessenger {
    client: reqwest::Client,
    base: Url,
}

impl HttpRelayMessenger {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url).with_context(|| format!("Invalid relay URL {base_url}"))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("Relay URL {base_url} cannot carry a path");
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, base })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, TransportError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| TransportError::unreachable(format!("invalid relay URL {}", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

/// Connection-level failures mean the relay is down for everyone.
fn classify(address: &str, err: reqwest::Error) -> TransportError {
    if err.is_connect() || err.is_timeout() {
        TransportError::unreachable(err.to_string())
    } else {
        TransportError::rejected(address, err.to_string())
    }
}

#[async_trait]
impl Messenger for HttpRelayMessenger {
    async fn send(&self, address: &str, subject: &str, body: &str) -> Result<(), TransportError> {
        let url = self.endpoint(&["messages"])?;
        let response = self
            .client
            .post(url)
            .json(&OutgoingMessage {
                to: address,
                subject,
                body,
            })
            .send()
            .await
            .map_err(|e| classify(address, e))?;

        let status = response.status();
        if status.is_success() {
            debug!(address, %status, "Message accepted by relay");
            Ok(())
        } else if status.is_server_error() {
            Err(TransportError::unreachable(format!(
                "relay returned {status}"
            )))
        } else {
            Err(TransportError::rejected(
                address,
                format!("relay returned {status}"),
            ))
        }
    }

    async fn fetch_reply(&self, address: &str) -> Result<Option<String>, TransportError> {
        let url = self.endpoint(&["replies", address])?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify(address, e))?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let text = response
                    .text()
                    .await
                    .map_err(|e| classify(address, e))?;
                debug!(address, bytes = text.len(), "Reply fetched from relay");
                Ok(Some(text))
            }
            status if status.is_server_error() => Err(TransportError::unreachable(format!(
                "relay returned {status}"
            ))),
            status => Err(TransportError::rejected(
                address,
                format!("relay returned {status}"),
            )),
        }
    }
}
