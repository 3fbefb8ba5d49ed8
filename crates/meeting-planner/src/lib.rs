//! Meeting planner: configuration, task pipeline, transports and reporting
//! around the [`negotiation`] engine.

pub mod config;
pub mod pipeline;
pub mod telemetry;
pub mod transport;

pub use config::{NegotiationSettings, PlannerConfig, TransportConfig};
pub use pipeline::{Component, Pipeline, PipelineContext, PipelineError, StepReport, TaskSpec};
pub use telemetry::NegotiationReport;
pub use transport::{build_messenger, HttpRelayMessenger, MailboxMessenger};
