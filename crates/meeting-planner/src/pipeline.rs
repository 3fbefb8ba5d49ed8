//! Declarative task pipeline.
//!
//! A pipeline is an ordered list of [`TaskSpec`]s. Each task names a
//! [`Component`], the context keys it reads, and the key it writes. The
//! context starts out with `participants` and `invitation_template` and
//! grows by one entry per task.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use negotiation::{
    aggregate, tally, AvailabilityRecord, ConfirmationRecord, Exchange, Messenger,
    NegotiationConfig, NegotiationError, NegotiationLoop, NegotiationResult, Pacer, Participant,
    ProposedSlot, SilencePolicy,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::telemetry::{self, NegotiationReport};

pub const PARTICIPANTS_KEY: &str = "participants";
pub const INVITATION_TEMPLATE_KEY: &str = "invitation_template";

/// Keys present in every context before the first task runs.
pub const SEEDED_KEYS: [&str; 2] = [PARTICIPANTS_KEY, INVITATION_TEMPLATE_KEY];

/// What a task does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    /// Send invitations rendered from a template, collect availability records.
    Invitation,
    /// Tally availability records into a proposed slot.
    Scheduler,
    /// Circulate a proposed slot, collect confirmations.
    Confirmation,
    /// Re-poll the participants who blocked a proposal and tally their
    /// fresh availability into an updated one.
    Renegotiation,
    /// Run the full negotiation loop.
    Negotiation,
}

impl Component {
    /// Parameters the component reads, in the order task inputs bind to them.
    pub fn parameters(self) -> &'static [&'static str] {
        match self {
            Self::Invitation => &["participants", "invitation_template"],
            Self::Scheduler => &["availability"],
            Self::Confirmation => &["participants", "proposal"],
            Self::Renegotiation => &["participants", "confirmations", "proposal"],
            Self::Negotiation => &["participants"],
        }
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invitation => write!(f, "invitation"),
            Self::Scheduler => write!(f, "scheduler"),
            Self::Confirmation => write!(f, "confirmation"),
            Self::Renegotiation => write!(f, "renegotiation"),
            Self::Negotiation => write!(f, "negotiation"),
        }
    }
}

/// One step of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    pub component: Component,
    /// Context keys bound positionally to [`Component::parameters`].
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Context key the task's output is stored under.
    #[serde(alias = "expected_output")]
    pub output: String,
    /// Optional file (relative to the output directory) the output is written to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<PathBuf>,
}

/// The single-step pipeline used when a config names no tasks.
pub fn default_tasks() -> Vec<TaskSpec> {
    vec![TaskSpec {
        name: "negotiate".to_string(),
        component: Component::Negotiation,
        inputs: vec![PARTICIPANTS_KEY.to_string()],
        output: "negotiation_result".to_string(),
        output_file: Some(PathBuf::from("negotiation_result.json")),
    }]
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("pipeline has no tasks")]
    Empty,

    #[error("task '{task}' binds {given} inputs but {component} takes {expected}")]
    Arity {
        task: String,
        component: Component,
        given: usize,
        expected: usize,
    },

    #[error("task '{task}' reads '{key}', which no earlier task produces")]
    MissingInput { task: String, key: String },

    #[error("task '{task}' could not decode input '{key}': {source}")]
    InvalidInput {
        task: String,
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("task '{task}' failed: {source}")]
    Negotiation {
        task: String,
        #[source]
        source: NegotiationError,
    },

    #[error("failed to write {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode output of task '{task}': {source}")]
    Encode {
        task: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Check that every task's inputs are available by the time it runs.
pub fn validate_tasks(tasks: &[TaskSpec], seeded: &[&str]) -> Result<(), PipelineError> {
    if tasks.is_empty() {
        return Err(PipelineError::Empty);
    }

    let mut available: BTreeSet<&str> = seeded.iter().copied().collect();
    for task in tasks {
        let expected = task.component.parameters().len();
        if task.inputs.len() != expected {
            return Err(PipelineError::Arity {
                task: task.name.clone(),
                component: task.component,
                given: task.inputs.len(),
                expected,
            });
        }
        if let Some(key) = task
            .inputs
            .iter()
            .find(|key| !available.contains(key.as_str()))
        {
            return Err(PipelineError::MissingInput {
                task: task.name.clone(),
                key: key.clone(),
            });
        }
        available.insert(task.output.as_str());
    }
    Ok(())
}

/// Named values shared between tasks.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct PipelineContext {
    values: BTreeMap<String, Value>,
}

impl PipelineContext {
    /// Context seeded with the participant list and invitation template.
    pub fn seeded(participants: &[Participant], invitation_template: &str) -> Self {
        let mut values = BTreeMap::new();
        values.insert(
            PARTICIPANTS_KEY.to_string(),
            serde_json::to_value(participants).unwrap_or(Value::Null),
        );
        values.insert(
            INVITATION_TEMPLATE_KEY.to_string(),
            Value::String(invitation_template.to_string()),
        );
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    fn decode<T: DeserializeOwned>(&self, task: &str, key: &str) -> Result<T, PipelineError> {
        let value = self
            .values
            .get(key)
            .ok_or_else(|| PipelineError::MissingInput {
                task: task.to_string(),
                key: key.to_string(),
            })?;
        serde_json::from_value(value.clone()).map_err(|source| PipelineError::InvalidInput {
            task: task.to_string(),
            key: key.to_string(),
            source,
        })
    }
}

/// Outcome of one executed task.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub task: String,
    pub component: Component,
    pub output: String,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file: Option<PathBuf>,
}

/// Executes a task list against one messenger.
pub struct Pipeline {
    tasks: Vec<TaskSpec>,
    exchange: Exchange,
    engine: NegotiationLoop,
    output_dir: PathBuf,
}

impl Pipeline {
    pub fn new(
        tasks: Vec<TaskSpec>,
        messenger: Arc<dyn Messenger>,
        pacer: Arc<dyn Pacer>,
        config: NegotiationConfig,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        let exchange = Exchange::new(messenger.clone(), pacer.clone(), config.reply_policy);
        Self {
            tasks,
            exchange,
            engine: NegotiationLoop::new(messenger, pacer, config),
            output_dir: output_dir.into(),
        }
    }

    pub fn tasks(&self) -> &[TaskSpec] {
        &self.tasks
    }

    /// Run every task in order, stopping at the first failure.
    pub async fn run(
        &self,
        context: &mut PipelineContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<StepReport>, PipelineError> {
        let seeded: Vec<&str> = context.keys().collect();
        validate_tasks(&self.tasks, &seeded)?;

        let mut reports = Vec::with_capacity(self.tasks.len());
        for task in &self.tasks {
            if cancel.is_cancelled() {
                warn!(task = %task.name, "Pipeline cancelled, skipping remaining tasks");
                break;
            }

            info!(task = %task.name, component = %task.component, "Task starting");
            let started = Instant::now();
            let output = self.execute(task, context, cancel).await?;
            let duration_ms = started.elapsed().as_millis() as u64;

            let output_file = match &task.output_file {
                Some(file) => Some(self.persist(task, file, &output)?),
                None => None,
            };
            context.insert(task.output.clone(), output);

            info!(task = %task.name, duration_ms, "Task finished");
            reports.push(StepReport {
                task: task.name.clone(),
                component: task.component,
                output: task.output.clone(),
                duration_ms,
                output_file,
            });
        }
        Ok(reports)
    }

    async fn execute(
        &self,
        task: &TaskSpec,
        context: &PipelineContext,
        cancel: &CancellationToken,
    ) -> Result<Value, PipelineError> {
        let name = task.name.as_str();
        let input = |i: usize| task.inputs[i].as_str();
        let templates = &self.engine.config().templates;
        let failed = |source: NegotiationError| PipelineError::Negotiation {
            task: name.to_string(),
            source,
        };

        match task.component {
            Component::Invitation => {
                let participants: Vec<Participant> = context.decode(name, input(0))?;
                let template: String = context.decode(name, input(1))?;
                let templates = templates.clone().with_invitation(template);
                let records = self
                    .exchange
                    .collect_availability(&participants, |p| templates.invitation(p), cancel)
                    .await
                    .map_err(failed)?;
                encode(name, &records)
            }
            Component::Scheduler => {
                let records: Vec<AvailabilityRecord> = context.decode(name, input(0))?;
                let report = tally(&records);
                let proposal = report.proposal();
                info!(task = name, voters = report.voters, proposal = %proposal, "Slot proposed");
                encode(name, &proposal)
            }
            Component::Confirmation => {
                let participants: Vec<Participant> = context.decode(name, input(0))?;
                let proposal: ProposedSlot = context.decode(name, input(1))?;
                let records: Vec<ConfirmationRecord> = self
                    .exchange
                    .collect_confirmations(
                        &participants,
                        |p| templates.confirmation(p, &proposal),
                        cancel,
                    )
                    .await
                    .map_err(failed)?;
                encode(name, &records)
            }
            Component::Renegotiation => {
                let participants: Vec<Participant> = context.decode(name, input(0))?;
                let confirmations: Vec<ConfirmationRecord> = context.decode(name, input(1))?;
                let proposal: ProposedSlot = context.decode(name, input(2))?;
                let blocking = dissenters(
                    &participants,
                    &confirmations,
                    self.engine.config().silence,
                );
                if blocking.is_empty() {
                    info!(task = name, proposal = %proposal, "No dissenters, proposal stands");
                    return encode(name, &proposal);
                }
                info!(
                    task = name,
                    dissenters = ?blocking.iter().map(|p| p.address.as_str()).collect::<Vec<_>>(),
                    "Renegotiating with dissenters"
                );
                let records = self
                    .exchange
                    .collect_availability(
                        &blocking,
                        |p| templates.renegotiation(p, &proposal),
                        cancel,
                    )
                    .await
                    .map_err(failed)?;
                let updated = aggregate(&records);
                info!(task = name, proposal = %updated, "Proposal updated");
                encode(name, &updated)
            }
            Component::Negotiation => {
                let participants: Vec<Participant> = context.decode(name, input(0))?;
                let started = Instant::now();
                let result = self
                    .engine
                    .run(&participants, cancel)
                    .await
                    .map_err(failed)?;
                self.record(&participants, &result, started);
                encode(name, &result)
            }
        }
    }

    /// Write the negotiation report and telemetry line. Failures are logged only.
    fn record(&self, participants: &[Participant], result: &NegotiationResult, started: Instant) {
        let report = NegotiationReport::new(
            participants.len(),
            started.elapsed().as_millis() as u64,
            result.clone(),
        );
        telemetry::write_report(&report, &self.output_dir);
        telemetry::append_telemetry(&report, &self.output_dir);
    }

    fn persist(&self, task: &TaskSpec, file: &Path, output: &Value) -> Result<PathBuf, PipelineError> {
        let path = self.output_dir.join(file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| PipelineError::Persist {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(output).map_err(|source| PipelineError::Encode {
            task: task.name.clone(),
            source,
        })?;
        std::fs::write(&path, json).map_err(|source| PipelineError::Persist {
            path: path.clone(),
            source,
        })?;
        info!(task = %task.name, path = %path.display(), "Task output written");
        Ok(path)
    }
}

/// Participants whose confirmation blocks `silence`-wise. A participant with
/// no confirmation on record counts as silent, and when nobody agreed at all
/// every participant dissents.
fn dissenters(
    participants: &[Participant],
    confirmations: &[ConfirmationRecord],
    silence: SilencePolicy,
) -> Vec<Participant> {
    if !confirmations.iter().any(|c| c.agreed) {
        return participants.to_vec();
    }
    participants
        .iter()
        .filter(|p| {
            let silent = ConfirmationRecord {
                participant: p.address.clone(),
                agreed: false,
                responded: false,
            };
            let record = confirmations
                .iter()
                .find(|c| c.participant == p.address)
                .unwrap_or(&silent);
            silence.blocks(record)
        })
        .cloned()
        .collect()
}

fn encode<T: Serialize>(task: &str, value: &T) -> Result<Value, PipelineError> {
    serde_json::to_value(value).map_err(|source| PipelineError::Encode {
        task: task.to_string(),
        source,
    })
}
