//! Training pipeline integration tests
//!
//! Contributions are seeded through a real `SubmissionOrchestrator` so the
//! training side sees the same audit records, blobs and ledger state it
//! would in production.

use std::path::Path;
use std::sync::Arc;

use purechain_ledger::{ReputationLedger, TxKind};
use purechain_orchestrator::collaborators::mock::{
    MockContentStore, MockIdentityResolver, MockTrainer, MockValidator, RecordingNotificationSink,
};
use purechain_orchestrator::collaborators::{AuditLog, ValidationReport};
use purechain_orchestrator::config::ModelFamily;
use purechain_orchestrator::local::MemoryAuditLog;
use purechain_orchestrator::retry::RetryPolicy;
use purechain_orchestrator::{
    Collaborators, ContributorProfile, NotificationStatus, OrchestratorConfig, OrchestratorError,
    Sector, Step, SubmissionOrchestrator, SubmissionRequest, TrainingCollaborators,
    TrainingOrchestrator, TrainingRequest, TrainingStatus,
};
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

const ADMIN: &str = "0xAD1114";
const OPERATOR: &str = "ops@purechain.example";

fn profile(name: &str, address: &str) -> ContributorProfile {
    ContributorProfile {
        identity_key: format!("user_{}", name.to_lowercase()),
        name: name.to_string(),
        organization: "North Clinic".to_string(),
        sector: Sector::Healthcare,
        address: address.to_string(),
        email: format!("{}@example.org", name.to_lowercase()),
    }
}

fn csv(seed: u32) -> Vec<u8> {
    format!(
        "age,bmi,target\n{},{},1\n{},{},0\n",
        30 + seed,
        20 + seed,
        55 + seed,
        27 + seed
    )
    .into_bytes()
}

struct Harness {
    submissions: SubmissionOrchestrator,
    collaborators: Collaborators,
    config: OrchestratorConfig,
    store: Arc<MockContentStore>,
    validator: Arc<MockValidator>,
    ledger: Arc<ReputationLedger>,
    audit: Arc<MemoryAuditLog>,
    notifier: Arc<RecordingNotificationSink>,
    dir: TempDir,
}

fn harness() -> Harness {
    harness_with(|_| {})
}

fn harness_with(configure: impl FnOnce(&mut OrchestratorConfig)) -> Harness {
    let dir = TempDir::new().unwrap();

    let mut config = OrchestratorConfig::default().with_data_dir(dir.path());
    config.retry = RetryPolicy::immediate(2);
    config.receipts.attempts = 2;
    config.receipts.interval_ms = 1;
    configure(&mut config);

    let identity = Arc::new(
        MockIdentityResolver::new()
            .with_profile("token-alice", profile("Alice", "0xA11CE"))
            .with_profile("token-bob", profile("Bob", "0xB0B"))
            .with_profile("token-carol", profile("Carol", "0xCA401")),
    );
    let store = Arc::new(MockContentStore::new());
    let validator = Arc::new(MockValidator::valid());
    let ledger = Arc::new(ReputationLedger::new());
    let audit = Arc::new(MemoryAuditLog::new());
    let notifier = Arc::new(RecordingNotificationSink::new());

    let collaborators = Collaborators {
        identity,
        store: store.clone(),
        validator: validator.clone(),
        ledger: ledger.clone(),
        audit: audit.clone(),
        notifier: notifier.clone(),
    };

    Harness {
        submissions: SubmissionOrchestrator::new(config.clone(), collaborators.clone()),
        collaborators,
        config,
        store,
        validator,
        ledger,
        audit,
        notifier,
        dir,
    }
}

impl Harness {
    fn trainer(&self, trainer: Arc<MockTrainer>) -> TrainingOrchestrator {
        TrainingOrchestrator::new(
            self.config.clone(),
            TrainingCollaborators::from_submission(&self.collaborators, trainer),
        )
    }

    /// Submit valid data and return its content address.
    async fn contribute(&self, token: &str, model_id: &str, seed: u32) -> String {
        let request = SubmissionRequest::new(
            token,
            format!("batch-{}.csv", seed),
            csv(seed),
            Sector::Healthcare,
            model_id,
        );
        let outcome = self.submissions.handle(request).await.unwrap();
        assert!(outcome.is_accepted());
        outcome.content_address.unwrap()
    }

    async fn contribute_invalid(&self, token: &str, seed: u32) {
        self.validator
            .set_report(ValidationReport::invalid(&["Missing values: 40%"]))
            .await;
        let request =
            SubmissionRequest::new(token, "broken.csv", csv(seed), Sector::Healthcare, "model_1");
        self.submissions.handle(request).await.unwrap();
        self.validator.set_report(ValidationReport::valid()).await;
    }

    fn request(&self, model_id: &str) -> TrainingRequest {
        TrainingRequest {
            model_id: model_id.to_string(),
            sector: Sector::Healthcare,
            triggering_account: ADMIN.to_string(),
        }
    }
}

// =============================================================================
// Data sufficiency
// =============================================================================

#[tokio::test]
async fn test_single_contribution_is_insufficient() {
    let h = harness();
    h.contribute("token-alice", "model_1", 1).await;
    let trainer = Arc::new(MockTrainer::new().with_metric("f1_score", 0.9));

    let err = assert_err!(h.trainer(trainer.clone()).train(h.request("model_1")).await);

    assert!(matches!(
        err,
        OrchestratorError::InsufficientData { required: 2, found: 1 }
    ));
    assert_eq!(trainer.call_count(), 0);
    assert!(h.audit.training_runs(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_other_models_are_ignored() {
    let h = harness();
    h.contribute("token-alice", "model_1", 1).await;
    h.contribute("token-bob", "model_2", 2).await;

    let trainer = Arc::new(MockTrainer::new());
    let err = h.trainer(trainer).train(h.request("model_1")).await.unwrap_err();

    assert!(matches!(err, OrchestratorError::InsufficientData { found: 1, .. }));
}

// =============================================================================
// Completed runs
// =============================================================================

#[tokio::test]
async fn test_successful_run_is_recorded_and_announced() {
    let h = harness();
    h.contribute("token-alice", "model_1", 1).await;
    h.contribute("token-bob", "model_1", 2).await;
    h.contribute_invalid("token-carol", 3).await;

    let trainer = Arc::new(MockTrainer::new().with_metric("f1_score", 0.91).with_metric("accuracy", 0.93));
    let outcome = assert_ok!(h.trainer(trainer.clone()).train(h.request("model_1")).await);

    assert_eq!(outcome.run.status, TrainingStatus::Success);
    assert_eq!(outcome.run.row_count, 4);
    assert_eq!(outcome.run.contributor_count, 2);
    assert_eq!(outcome.run.metrics["f1_score"], 0.91);
    assert!(!outcome.alert_sent);
    assert!(outcome.warnings.is_empty());
    assert!(outcome.skipped_blobs.is_empty());
    assert_eq!(trainer.call_count(), 1);

    // Committed on the ledger and mirrored.
    let tx_ref = outcome.run.ledger_tx_ref.clone().unwrap();
    let events = h.ledger.events_for(ADMIN).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, TxKind::Training);
    assert_eq!(events[0].tx_hash, tx_ref);
    assert_eq!(events[0].payload["modelId"], "model_1");
    let mirrors = h.audit.transactions(Some(ADMIN)).await.unwrap();
    assert_eq!(mirrors[0].kind, TxKind::Training);

    let runs = h.audit.training_runs(Some("model_1")).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].artifact_version.as_deref(), Some(outcome.artifacts.version.as_str()));

    // Contributors whose data was used hear about it; rejected ones hear why.
    for contact in ["alice@example.org", "bob@example.org"] {
        let sent = h.notifier.sent_to(contact).await;
        assert!(sent.iter().any(|m| m.subject == "Model model_1 trained"), "{}", contact);
    }
    let carol = h.notifier.sent_to("carol@example.org").await;
    let rejection = carol
        .iter()
        .find(|m| m.subject == "Data not used for model model_1")
        .unwrap();
    assert!(rejection.body.contains("Missing values: 40%"));
}

#[tokio::test]
async fn test_low_performance_run_alerts_operator() {
    let h = harness_with(|config| {
        config.training.operator_contact = Some(OPERATOR.to_string());
    });
    h.contribute("token-alice", "model_1", 1).await;
    h.contribute("token-bob", "model_1", 2).await;

    let trainer = Arc::new(MockTrainer::new().with_metric("f1_score", 0.5));
    let training = h.trainer(trainer);
    let first = training.train(h.request("model_1")).await.unwrap();

    assert_eq!(first.run.status, TrainingStatus::LowPerformance);
    assert!(first.alert_sent);
    let alerts = h.notifier.sent_to(OPERATOR).await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].subject, "Low performance: model model_1");
    assert!(alerts[0].body.contains("f1_score = 0.5000"));

    // Low performance still publishes versioned artifacts.
    let version_dir = h
        .dir
        .path()
        .join("models")
        .join("model_1")
        .join(&first.artifacts.version);
    assert!(Path::new(&first.artifacts.model_path).starts_with(&version_dir));
    assert!(Path::new(&first.artifacts.model_path).exists());
    assert!(Path::new(&first.artifacts.scaler_path).exists());

    let second = training.train(h.request("model_1")).await.unwrap();
    assert!(second.artifacts.version > first.artifacts.version);
    assert!(Path::new(&first.artifacts.model_path).exists());
    assert!(Path::new(&second.artifacts.model_path).exists());
}

#[tokio::test]
async fn test_missing_metric_without_operator_is_a_warning() {
    let h = harness();
    h.contribute("token-alice", "model_1", 1).await;
    h.contribute("token-bob", "model_1", 2).await;

    let trainer = Arc::new(MockTrainer::new().with_metric("accuracy", 0.99));
    let outcome = h.trainer(trainer).train(h.request("model_1")).await.unwrap();

    assert_eq!(outcome.run.status, TrainingStatus::LowPerformance);
    assert!(!outcome.alert_sent);
    assert!(outcome
        .warnings
        .iter()
        .any(|w| w.contains("no operator contact")));
}

#[tokio::test]
async fn test_clustering_model_drops_target() {
    let h = harness_with(|config| {
        config
            .training
            .model_families
            .insert("model_2".to_string(), ModelFamily::Clustering);
    });
    h.contribute("token-alice", "model_2", 1).await;
    h.contribute("token-bob", "model_2", 2).await;

    let trainer = Arc::new(MockTrainer::new().with_metric("silhouette_score", 0.8));
    let outcome = h.trainer(trainer.clone()).train(h.request("model_2")).await.unwrap();

    assert_eq!(outcome.run.status, TrainingStatus::Success);
    let input = trainer.last_input().await.unwrap();
    assert!(input.starts_with("age,bmi\n"), "{}", input);
    assert_eq!(input.lines().count(), 5);
}

// =============================================================================
// Degraded collaborators
// =============================================================================

#[tokio::test]
async fn test_unreadable_blob_is_skipped() {
    let h = harness();
    h.contribute("token-alice", "model_1", 1).await;
    let bob = h.contribute("token-bob", "model_1", 2).await;
    h.contribute("token-carol", "model_1", 3).await;
    h.store.break_address(&bob);

    let trainer = Arc::new(MockTrainer::new().with_metric("f1_score", 0.8));
    let outcome = h.trainer(trainer).train(h.request("model_1")).await.unwrap();

    assert_eq!(outcome.skipped_blobs.len(), 1);
    assert_eq!(outcome.skipped_blobs[0].content_address, bob);
    assert_eq!(outcome.run.row_count, 4);
}

#[tokio::test]
async fn test_unreachable_blob_is_skipped_after_retries() {
    let h = harness();
    h.contribute("token-alice", "model_1", 1).await;
    let bob = h.contribute("token-bob", "model_1", 2).await;
    h.contribute("token-carol", "model_1", 3).await;
    h.store.unreachable_address(&bob);

    let trainer = Arc::new(MockTrainer::new().with_metric("f1_score", 0.8));
    let outcome = h.trainer(trainer.clone()).train(h.request("model_1")).await.unwrap();

    assert_eq!(outcome.run.status, TrainingStatus::Success);
    assert_eq!(outcome.skipped_blobs.len(), 1);
    assert_eq!(outcome.skipped_blobs[0].content_address, bob);
    assert!(outcome.skipped_blobs[0].error.contains("gateway timeout"));
    assert_eq!(outcome.run.row_count, 4);
    assert_eq!(trainer.call_count(), 1);
}

#[tokio::test]
async fn test_store_outage_aborts_training() {
    let h = harness();
    h.contribute("token-alice", "model_1", 1).await;
    h.contribute("token-bob", "model_1", 2).await;
    h.store.set_unavailable(true);

    let trainer = Arc::new(MockTrainer::new());
    let err = h.trainer(trainer.clone()).train(h.request("model_1")).await.unwrap_err();

    assert!(matches!(
        err,
        OrchestratorError::TransientInfrastructure { step: Step::ContentStore, attempts: 2, .. }
    ));
    assert_eq!(trainer.call_count(), 0);
}

#[tokio::test]
async fn test_notification_failure_does_not_fail_run() {
    let h = harness();
    h.contribute("token-alice", "model_1", 1).await;
    h.contribute("token-bob", "model_1", 2).await;
    h.notifier.fail_for("bob@example.org");

    let trainer = Arc::new(MockTrainer::new().with_metric("f1_score", 0.8));
    let outcome = h.trainer(trainer).train(h.request("model_1")).await.unwrap();

    assert_eq!(outcome.run.status, TrainingStatus::Success);
    assert_eq!(outcome.notification_failures.len(), 1);
    assert_eq!(outcome.notification_failures[0].recipient, "bob@example.org");

    let failed = h
        .audit
        .notifications()
        .await
        .unwrap()
        .into_iter()
        .filter(|n| n.status == NotificationStatus::Failed)
        .count();
    assert_eq!(failed, 1);
}

#[tokio::test]
async fn test_trainer_failure_records_failed_run() {
    let h = harness();
    h.contribute("token-alice", "model_1", 1).await;
    h.contribute("token-bob", "model_1", 2).await;

    let trainer = Arc::new(MockTrainer::new().failing("Traceback: ValueError: could not convert"));
    let err = h.trainer(trainer).train(h.request("model_1")).await.unwrap_err();

    assert!(matches!(err, OrchestratorError::FatalProcess { step: Step::Trainer, .. }));

    let runs = h.audit.training_runs(Some("model_1")).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, TrainingStatus::Failed);
    assert!(runs[0].error.as_deref().unwrap().contains("Traceback"));
    assert!(runs[0].artifact_version.is_none());
    assert!(!h.dir.path().join("models").join("model_1").exists());
    assert!(h.ledger.events_for(ADMIN).await.is_empty());
}

#[tokio::test]
async fn test_missing_artifacts_fail_run() {
    let h = harness();
    h.contribute("token-alice", "model_1", 1).await;
    h.contribute("token-bob", "model_1", 2).await;

    let trainer = Arc::new(
        MockTrainer::new()
            .with_metric("f1_score", 0.95)
            .with_artifacts(&["model.pkl"]),
    );
    let err = h.trainer(trainer).train(h.request("model_1")).await.unwrap_err();

    assert!(matches!(err, OrchestratorError::FatalProcess { step: Step::Artifacts, .. }));

    let runs = h.audit.training_runs(Some("model_1")).await.unwrap();
    assert_eq!(runs[0].status, TrainingStatus::Failed);
    assert_eq!(runs[0].metrics["f1_score"], 0.95);
}
