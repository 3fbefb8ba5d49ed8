//! Filesystem drop-box messenger.
//!
//! Layout under the mailbox root:
//!
//! ```text
//! <root>/outbox/<address>/<timestamp>-<uuid>.json   one envelope per sent message
//! <root>/inbox/<address>/<anything>                 replies, consumed oldest-first by file name
//! ```
//!
//! Whoever answers on behalf of a participant drops a file into that
//! participant's inbox directory. Each file is one reply and is removed
//! once read.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use negotiation::{Messenger, TransportError};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

const OUTBOX: &str = "outbox";
const INBOX: &str = "inbox";

/// A sent message as stored in the outbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub sent_at: String,
}

pub struct MailboxMessenger {
    root: PathBuf,
}

impl MailboxMessenger {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn outbox_dir(&self, address: &str) -> PathBuf {
        self.root.join(OUTBOX).join(mailbox_name(address))
    }

    pub fn inbox_dir(&self, address: &str) -> PathBuf {
        self.root.join(INBOX).join(mailbox_name(address))
    }

    fn ensure_root(&self) -> Result<(), TransportError> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(TransportError::unreachable(format!(
                "mailbox root {} does not exist",
                self.root.display()
            )))
        }
    }

    /// Oldest reply file in `dir`, by file name. Hidden files are skipped.
    async fn oldest_reply(dir: &Path) -> std::io::Result<Option<PathBuf>> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut oldest: Option<PathBuf> = None;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let path = entry.path();
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'));
            if hidden {
                continue;
            }
            if oldest.as_ref().map_or(true, |o| path < *o) {
                oldest = Some(path);
            }
        }
        Ok(oldest)
    }
}

/// Directory name for an address.
///
/// Bytes outside `[A-Za-z0-9@.+-]`, every `_` and a leading `.` are written
/// as `_XX` (uppercase hex), so distinct addresses never share a directory and
/// no name can climb out of the mailbox root.
fn mailbox_name(address: &str) -> String {
    let mut name = String::with_capacity(address.len());
    for (i, byte) in address.bytes().enumerate() {
        let keep = match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'@' | b'+' | b'-' => true,
            b'.' => i > 0,
            _ => false,
        };
        if keep {
            name.push(char::from(byte));
        } else {
            name.push_str(&format!("_{byte:02X}"));
        }
    }
    name
}

#[async_trait]
impl Messenger for MailboxMessenger {
    async fn send(&self, address: &str, subject: &str, body: &str) -> Result<(), TransportError> {
        self.ensure_root()?;

        let dir = self.outbox_dir(address);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| TransportError::rejected(address, e.to_string()))?;

        let now = Utc::now();
        let envelope = Envelope {
            to: address.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            sent_at: now.to_rfc3339(),
        };
        let json = serde_json::to_string_pretty(&envelope)
            .map_err(|e| TransportError::rejected(address, e.to_string()))?;

        let path = dir.join(format!(
            "{}-{}.json",
            now.format("%Y%m%dT%H%M%S%.6fZ"),
            Uuid::new_v4()
        ));
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| TransportError::rejected(address, e.to_string()))?;

        debug!(address, path = %path.display(), "Message dropped in outbox");
        Ok(())
    }

    async fn fetch_reply(&self, address: &str) -> Result<Option<String>, TransportError> {
        self.ensure_root()?;

        let dir = self.inbox_dir(address);
        if !dir.is_dir() {
            return Ok(None);
        }

        let Some(path) = Self::oldest_reply(&dir)
            .await
            .map_err(|e| TransportError::rejected(address, e.to_string()))?
        else {
            return Ok(None);
        };

        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| TransportError::rejected(address, e.to_string()))?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| TransportError::rejected(address, e.to_string()))?;

        debug!(address, path = %path.display(), "Reply consumed from inbox");
        Ok(Some(text))
    }
}
