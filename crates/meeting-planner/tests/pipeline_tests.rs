//! End-to-end pipeline runs over a pre-seeded filesystem mailbox.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use meeting_planner::pipeline::{default_tasks, Component, PipelineError, TaskSpec};
use meeting_planner::telemetry::{NegotiationReport, REPORT_FILE, TELEMETRY_FILE};
use meeting_planner::transport::Envelope;
use meeting_planner::{MailboxMessenger, Pipeline, PipelineContext, PlannerConfig};
use negotiation::messages::{CONFIRMATION_SUBJECT, INVITATION_SUBJECT, RENEGOTIATION_SUBJECT};
use negotiation::{
    ConfirmationRecord, NegotiationConfig, NegotiationError, NegotiationResult, Participant,
    ProposedSlot, ReplyPolicy, StopReason, TokioPacer, TransportError,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn people() -> Vec<Participant> {
    vec![
        Participant::new("Alice", "alice@example.com"),
        Participant::new("Bob", "bob@example.com"),
        Participant::new("Charlie", "charlie@example.com"),
    ]
}

fn engine_config(max_rounds: u32) -> NegotiationConfig {
    NegotiationConfig {
        max_rounds,
        reply_policy: ReplyPolicy::new(1, Duration::ZERO),
        ..NegotiationConfig::default()
    }
}

/// Queue replies for `address`; they are consumed in the given order.
fn seed(mailbox: &MailboxMessenger, address: &str, replies: &[&str]) {
    let inbox = mailbox.inbox_dir(address);
    std::fs::create_dir_all(&inbox).unwrap();
    for (i, reply) in replies.iter().enumerate() {
        std::fs::write(inbox.join(format!("{i:03}.json")), reply).unwrap();
    }
}

fn sent_subjects(mailbox: &MailboxMessenger, address: &str) -> Vec<String> {
    let dir = mailbox.outbox_dir(address);
    if !dir.is_dir() {
        return Vec::new();
    }
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    paths.sort();
    paths
        .iter()
        .map(|p| {
            let envelope: Envelope =
                serde_json::from_str(&std::fs::read_to_string(p).unwrap()).unwrap();
            envelope.subject
        })
        .collect()
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> T {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

struct Fixture {
    _dir: TempDir,
    mailbox_root: PathBuf,
    output_dir: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let mailbox_root = dir.path().join("mailbox");
        std::fs::create_dir_all(&mailbox_root).unwrap();
        let output_dir = dir.path().join("out");
        Self {
            _dir: dir,
            mailbox_root,
            output_dir,
        }
    }

    fn mailbox(&self) -> MailboxMessenger {
        MailboxMessenger::new(&self.mailbox_root)
    }

    fn pipeline(&self, tasks: Vec<TaskSpec>, config: NegotiationConfig) -> Pipeline {
        Pipeline::new(
            tasks,
            Arc::new(self.mailbox()),
            Arc::new(TokioPacer),
            config,
            &self.output_dir,
        )
    }
}

#[tokio::test]
async fn default_pipeline_converges_and_writes_reports() {
    let fx = Fixture::new();
    let mailbox = fx.mailbox();
    seed(
        &mailbox,
        "alice@example.com",
        &[r#"{"times":["7pm"],"dates":["Saturday"],"places":["Joe's Pizza"]}"#, r#"{"agree":true}"#],
    );
    seed(
        &mailbox,
        "bob@example.com",
        &[r#"{"times":["7pm"],"dates":["Saturday"],"places":["Cafe"]}"#, r#"{"agree":true}"#],
    );
    seed(
        &mailbox,
        "charlie@example.com",
        &[r#"{"times":"6pm","dates":"Saturday","places":"Joe's Pizza"}"#, r#"{"agree":true}"#],
    );

    let pipeline = fx.pipeline(default_tasks(), engine_config(3));
    let mut ctx = PipelineContext::seeded(&people(), "Hi {name}");
    let steps = pipeline
        .run(&mut ctx, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(steps.len(), 1);
    let result_path = steps[0].output_file.clone().unwrap();
    let result: NegotiationResult = read_json(&result_path);
    assert!(result.converged);
    assert_eq!(result.rounds_used, 1);
    assert_eq!(
        result.final_proposal,
        ProposedSlot {
            time: "7pm".into(),
            date: "Saturday".into(),
            place: "Joe's Pizza".into(),
        }
    );
    assert!(ctx.get("negotiation_result").is_some());

    let report: NegotiationReport = read_json(&fx.output_dir.join(REPORT_FILE));
    assert_eq!(report.participants, 3);
    assert_eq!(report.result.stop_reason, StopReason::Converged);
    let telemetry = std::fs::read_to_string(fx.output_dir.join(TELEMETRY_FILE)).unwrap();
    assert_eq!(telemetry.lines().count(), 1);

    for p in people() {
        assert_eq!(
            sent_subjects(&mailbox, &p.address),
            vec![INVITATION_SUBJECT, CONFIRMATION_SUBJECT]
        );
    }
}

#[tokio::test]
async fn dissenter_is_renegotiated_alone() {
    let fx = Fixture::new();
    let mailbox = fx.mailbox();
    seed(
        &mailbox,
        "alice@example.com",
        &[r#"{"times":["7pm"],"dates":["Friday"],"places":["Cafe"]}"#, r#"{"agree":true}"#],
    );
    seed(
        &mailbox,
        "bob@example.com",
        &[
            r#"{"times":["7pm"],"dates":["Friday"],"places":["Cafe"]}"#,
            r#"{"agree":false}"#,
            r#"{"times":["8pm"],"dates":["Friday"],"places":["Cafe"]}"#,
            r#"{"agree":true}"#,
        ],
    );

    let everyone = people();
    let participants = &everyone[..2];
    let pipeline = fx.pipeline(default_tasks(), engine_config(3));
    let mut ctx = PipelineContext::seeded(participants, "Hi {name}");
    pipeline
        .run(&mut ctx, &CancellationToken::new())
        .await
        .unwrap();

    let result: NegotiationResult =
        serde_json::from_value(ctx.get("negotiation_result").unwrap().clone()).unwrap();
    assert!(result.converged);
    assert_eq!(result.rounds_used, 2);
    assert_eq!(result.final_proposal.time, "8pm");
    assert_eq!(result.rounds[1].confirmations.len(), 1);

    assert_eq!(
        sent_subjects(&mailbox, "alice@example.com"),
        vec![INVITATION_SUBJECT, CONFIRMATION_SUBJECT]
    );
    assert_eq!(
        sent_subjects(&mailbox, "bob@example.com"),
        vec![
            INVITATION_SUBJECT,
            CONFIRMATION_SUBJECT,
            RENEGOTIATION_SUBJECT,
            CONFIRMATION_SUBJECT
        ]
    );
}

#[tokio::test]
async fn staged_pipeline_chains_outputs() {
    let fx = Fixture::new();
    let mailbox = fx.mailbox();
    seed(
        &mailbox,
        "alice@example.com",
        &[r#"Sure! {"times":["6pm"],"dates":["Sunday"],"places":["Park"]}"#, r#"{"agree":true}"#],
    );
    seed(
        &mailbox,
        "bob@example.com",
        &[
            r#"{"times":["6pm"],"dates":["Sunday"],"places":["Park"]}"#,
            r#"{"agree":false}"#,
            r#"{"times":["8pm"],"dates":["Monday"],"places":["Cafe"]}"#,
        ],
    );
    // Charlie never answers.

    let tasks = vec![
        TaskSpec {
            name: "invite".into(),
            component: Component::Invitation,
            inputs: vec!["participants".into(), "invitation_template".into()],
            output: "availability".into(),
            output_file: Some("availability.json".into()),
        },
        TaskSpec {
            name: "schedule".into(),
            component: Component::Scheduler,
            inputs: vec!["availability".into()],
            output: "proposal".into(),
            output_file: Some("proposal.json".into()),
        },
        TaskSpec {
            name: "confirm".into(),
            component: Component::Confirmation,
            inputs: vec!["participants".into(), "proposal".into()],
            output: "confirmations".into(),
            output_file: None,
        },
        TaskSpec {
            name: "renegotiate".into(),
            component: Component::Renegotiation,
            inputs: vec![
                "participants".into(),
                "confirmations".into(),
                "proposal".into(),
            ],
            output: "updated_proposal".into(),
            output_file: Some("updated_proposal.json".into()),
        },
    ];
    let pipeline = fx.pipeline(tasks, engine_config(3));
    let mut ctx = PipelineContext::seeded(&people(), "Hi {name}, when are you free?");
    let steps = pipeline
        .run(&mut ctx, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(steps.len(), 4);

    let proposal: ProposedSlot = read_json(&fx.output_dir.join("proposal.json"));
    assert_eq!(proposal.place, "Park");
    assert!(fx.output_dir.join("availability.json").is_file());

    let confirmations: Vec<ConfirmationRecord> =
        serde_json::from_value(ctx.get("confirmations").unwrap().clone()).unwrap();
    let agreed: Vec<bool> = confirmations.iter().map(|c| c.agreed).collect();
    assert_eq!(agreed, vec![true, false, false]);
    assert!(!confirmations[2].responded);

    // Bob disagreed and Charlie was silent; only they are re-polled.
    let updated: ProposedSlot = read_json(&fx.output_dir.join("updated_proposal.json"));
    assert_eq!(
        updated,
        ProposedSlot {
            time: "8pm".into(),
            date: "Monday".into(),
            place: "Cafe".into(),
        }
    );
    assert_eq!(
        sent_subjects(&mailbox, "alice@example.com"),
        vec![INVITATION_SUBJECT, CONFIRMATION_SUBJECT]
    );
    for dissenter in ["bob@example.com", "charlie@example.com"] {
        assert_eq!(
            sent_subjects(&mailbox, dissenter),
            vec![INVITATION_SUBJECT, CONFIRMATION_SUBJECT, RENEGOTIATION_SUBJECT]
        );
    }

    // The invitation came from the template in the context.
    let mut sent: Vec<PathBuf> = std::fs::read_dir(mailbox.outbox_dir("alice@example.com"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    sent.sort();
    let invitation: Envelope = read_json(&sent[0]);
    assert_eq!(invitation.body, "Hi Alice, when are you free?");

    // No negotiation step ran, so no report.
    assert!(!fx.output_dir.join(REPORT_FILE).exists());
}

#[tokio::test]
async fn renegotiation_keeps_the_proposal_when_everyone_agreed() {
    let fx = Fixture::new();
    let proposal = ProposedSlot {
        time: "7pm".into(),
        date: "Friday".into(),
        place: "Cafe".into(),
    };
    let confirmations: Vec<ConfirmationRecord> = people()
        .iter()
        .map(|p| ConfirmationRecord {
            participant: p.address.clone(),
            agreed: true,
            responded: true,
        })
        .collect();

    let tasks = vec![TaskSpec {
        name: "renegotiate".into(),
        component: Component::Renegotiation,
        inputs: vec![
            "participants".into(),
            "confirmations".into(),
            "proposal".into(),
        ],
        output: "updated_proposal".into(),
        output_file: None,
    }];
    let pipeline = fx.pipeline(tasks, engine_config(3));
    let mut ctx = PipelineContext::seeded(&people(), "Hi {name}");
    ctx.insert("confirmations", serde_json::to_value(&confirmations).unwrap());
    ctx.insert("proposal", serde_json::to_value(&proposal).unwrap());
    pipeline
        .run(&mut ctx, &CancellationToken::new())
        .await
        .unwrap();

    let updated: ProposedSlot =
        serde_json::from_value(ctx.get("updated_proposal").unwrap().clone()).unwrap();
    assert_eq!(updated, proposal);
    for p in people() {
        assert!(sent_subjects(&fx.mailbox(), &p.address).is_empty());
    }
}

#[tokio::test]
async fn missing_mailbox_root_fails_the_task() {
    let fx = Fixture::new();
    std::fs::remove_dir_all(&fx.mailbox_root).unwrap();

    let pipeline = fx.pipeline(default_tasks(), engine_config(3));
    let mut ctx = PipelineContext::seeded(&people(), "Hi {name}");
    let err = pipeline
        .run(&mut ctx, &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        PipelineError::Negotiation { task, source } => {
            assert_eq!(task, "negotiate");
            assert!(matches!(
                source,
                NegotiationError::Transport(TransportError::Unreachable(_))
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(ctx.get("negotiation_result").is_none());
}

#[tokio::test]
async fn cancelled_pipeline_runs_no_tasks() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline(default_tasks(), engine_config(3));
    let mut ctx = PipelineContext::seeded(&people(), "Hi {name}");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let steps = pipeline.run(&mut ctx, &cancel).await.unwrap();
    assert!(steps.is_empty());
    assert!(sent_subjects(&fx.mailbox(), "alice@example.com").is_empty());
}

#[tokio::test]
async fn config_file_drives_a_full_run() {
    let fx = Fixture::new();
    let mailbox = fx.mailbox();
    for p in people() {
        seed(
            &mailbox,
            &p.address,
            &[r#"{"times":["noon"],"dates":["Monday"],"places":["Office"]}"#, r#"{"agree":true}"#],
        );
    }

    let yaml = format!(
        "
participants:
  - {{ name: Alice, address: alice@example.com }}
  - {{ name: Bob, address: bob@example.com }}
  - {{ name: Charlie, address: charlie@example.com }}
invitation_template: 'Hello {{name}}, when suits you?'
negotiation:
  max_rounds: 2
  reply_attempts: 1
  reply_interval_secs: 0
transport:
  kind: mailbox
  root: {}
output_dir: {}
",
        fx.mailbox_root.display(),
        fx.output_dir.display()
    );
    let config_path = fx.mailbox_root.parent().unwrap().join("planner.yaml");
    std::fs::write(&config_path, yaml).unwrap();

    let config = PlannerConfig::from_yaml(&std::fs::read_to_string(&config_path).unwrap()).unwrap();
    config.validate().unwrap();

    let messenger = meeting_planner::build_messenger(&config.transport).unwrap();
    let pipeline = Pipeline::new(
        config.tasks.clone(),
        messenger,
        Arc::new(TokioPacer),
        config.negotiation_config(),
        config.output_dir.clone(),
    );
    let mut ctx = PipelineContext::seeded(&config.participants, &config.invitation_template);
    pipeline
        .run(&mut ctx, &CancellationToken::new())
        .await
        .unwrap();

    let result: NegotiationResult = read_json(&fx.output_dir.join("negotiation_result.json"));
    assert!(result.converged);
    assert_eq!(result.final_proposal.place, "Office");

    let dir = mailbox.outbox_dir("alice@example.com");
    let mut first: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    first.sort();
    let invitation: Envelope = read_json(&first[0]);
    assert!(invitation.body.starts_with("Hello Alice"));
}
