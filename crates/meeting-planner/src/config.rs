//! Planner configuration.
//!
//! Everything lives in one YAML file: the participants, the message
//! template, negotiation tunables, the transport and the task pipeline.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Command-line flags (`--max-rounds`, `--output-dir`)
//! 2. Environment variables (`PLANNER_MAX_ROUNDS`, ...)
//! 3. Values in the YAML file
//! 4. Built-in defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use negotiation::messages::DEFAULT_INVITATION;
use negotiation::{MessageTemplates, NegotiationConfig, Participant, ReplyPolicy, SilencePolicy};
use serde::Deserialize;
use tracing::warn;

use crate::pipeline::{self, TaskSpec};

const ENV_MAX_ROUNDS: &str = "PLANNER_MAX_ROUNDS";
const ENV_REPLY_ATTEMPTS: &str = "PLANNER_REPLY_ATTEMPTS";
const ENV_REPLY_INTERVAL_SECS: &str = "PLANNER_REPLY_INTERVAL_SECS";
const ENV_OUTPUT_DIR: &str = "PLANNER_OUTPUT_DIR";

const DEFAULT_MAX_ROUNDS: u32 = 3;
const DEFAULT_REPLY_ATTEMPTS: u32 = 10;
const DEFAULT_REPLY_INTERVAL_SECS: u64 = 30;
const DEFAULT_MAILBOX_ROOT: &str = "mailbox";
const DEFAULT_OUTPUT_DIR: &str = "planner-output";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Negotiation tunables as written in the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NegotiationSettings {
    pub max_rounds: u32,
    pub reply_attempts: u32,
    pub reply_interval_secs: u64,
    pub silence: SilencePolicy,
}

impl Default for NegotiationSettings {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            reply_attempts: DEFAULT_REPLY_ATTEMPTS,
            reply_interval_secs: DEFAULT_REPLY_INTERVAL_SECS,
            silence: SilencePolicy::default(),
        }
    }
}

/// Which messenger carries the messages.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Filesystem drop-box: `<root>/outbox/<address>/` and `<root>/inbox/<address>/`.
    Mailbox { root: PathBuf },
    /// HTTP relay exposing `POST /messages` and `GET /replies/{address}`.
    Http {
        base_url: String,
        #[serde(default = "default_http_timeout")]
        timeout_secs: u64,
    },
}

fn default_http_timeout() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Mailbox {
            root: PathBuf::from(DEFAULT_MAILBOX_ROOT),
        }
    }
}

/// Top-level planner configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PlannerConfig {
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default = "default_invitation")]
    pub invitation_template: String,
    #[serde(default)]
    pub negotiation: NegotiationSettings,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "pipeline::default_tasks")]
    pub tasks: Vec<TaskSpec>,
}

fn default_invitation() -> String {
    DEFAULT_INVITATION.to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}

impl PlannerConfig {
    /// Read and parse a YAML config file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::from_yaml(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`. Unparseable values are logged and ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_override(&lookup, ENV_MAX_ROUNDS) {
            self.negotiation.max_rounds = v;
        }
        if let Some(v) = parse_override(&lookup, ENV_REPLY_ATTEMPTS) {
            self.negotiation.reply_attempts = v;
        }
        if let Some(v) = parse_override(&lookup, ENV_REPLY_INTERVAL_SECS) {
            self.negotiation.reply_interval_secs = v;
        }
        if let Some(dir) = lookup(ENV_OUTPUT_DIR) {
            self.output_dir = PathBuf::from(dir);
        }
    }

    /// Reject configurations the engine or the pipeline would refuse later.
    pub fn validate(&self) -> Result<()> {
        Participant::validate_unique(&self.participants).context("Invalid participant list")?;
        self.negotiation_config()
            .validate()
            .context("Invalid negotiation settings")?;
        if let TransportConfig::Http { base_url, .. } = &self.transport {
            if base_url.trim().is_empty() {
                anyhow::bail!("transport.base_url must not be empty");
            }
        }
        pipeline::validate_tasks(&self.tasks, &pipeline::SEEDED_KEYS)
            .context("Invalid task pipeline")?;
        Ok(())
    }

    /// Engine configuration derived from these settings.
    pub fn negotiation_config(&self) -> NegotiationConfig {
        NegotiationConfig {
            max_rounds: self.negotiation.max_rounds,
            reply_policy: ReplyPolicy::new(
                self.negotiation.reply_attempts,
                Duration::from_secs(self.negotiation.reply_interval_secs),
            ),
            silence: self.negotiation.silence,
            templates: MessageTemplates::default().with_invitation(&self.invitation_template),
        }
    }
}

fn parse_override<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparseable override");
            None
        }
    }
}
