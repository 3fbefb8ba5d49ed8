use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use negotiation::{tally, AvailabilityRecord, TokioPacer};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use meeting_planner::{build_messenger, Pipeline, PipelineContext, PipelineError, PlannerConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the configured task pipeline
    Run {
        /// Planner config file (YAML)
        #[arg(long, short)]
        config: PathBuf,

        /// Directory for task outputs and reports (overrides config and env)
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Round budget (overrides config and env)
        #[arg(long)]
        max_rounds: Option<u32>,
    },
    /// Load and validate a config without contacting anyone
    Validate {
        #[arg(long, short)]
        config: PathBuf,
    },
    /// Tally a JSON array of availability records and print the proposal
    Tally { records: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Run {
            config,
            output_dir,
            max_rounds,
        } => run(&config, output_dir, max_rounds).await,
        Command::Validate { config } => validate(&config),
        Command::Tally { records } => tally_file(&records),
    }
}

async fn run(path: &Path, output_dir: Option<PathBuf>, max_rounds: Option<u32>) -> Result<()> {
    let mut config = PlannerConfig::load(path)?;
    if let Some(dir) = output_dir {
        config.output_dir = dir;
    }
    if let Some(rounds) = max_rounds {
        config.negotiation.max_rounds = rounds;
    }
    config.validate()?;

    let messenger = build_messenger(&config.transport)?;
    let pipeline = Pipeline::new(
        config.tasks.clone(),
        messenger,
        Arc::new(TokioPacer),
        config.negotiation_config(),
        config.output_dir.clone(),
    );
    info!(
        participants = config.participants.len(),
        tasks = pipeline.tasks().len(),
        output_dir = %config.output_dir.display(),
        "Planner starting"
    );

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing with the best proposal so far");
            watcher.cancel();
        }
    });

    let mut context = PipelineContext::seeded(&config.participants, &config.invitation_template);
    let reports = match pipeline.run(&mut context, &cancel).await {
        Ok(reports) => reports,
        Err(PipelineError::Negotiation { task, source }) => {
            anyhow::bail!("Task '{task}' failed: {}", source.with_suggestion())
        }
        Err(e) => return Err(e).context("Pipeline failed"),
    };

    let summary = serde_json::json!({
        "steps": reports,
        "outputs": context,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn validate(path: &Path) -> Result<()> {
    let config = PlannerConfig::load(path)?;
    config.validate()?;
    println!(
        "{}: {} participants, {} tasks, max {} rounds",
        path.display(),
        config.participants.len(),
        config.tasks.len(),
        config.negotiation.max_rounds
    );
    Ok(())
}

fn tally_file(path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let records: Vec<AvailabilityRecord> = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse availability records in {}", path.display()))?;

    let report = tally(&records);
    let summary = serde_json::json!({
        "proposal": report.proposal(),
        "votes": report,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
