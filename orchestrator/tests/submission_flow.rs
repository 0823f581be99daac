//! Submission pipeline integration tests
//!
//! Drives `SubmissionOrchestrator` against a real in-memory ledger and mock
//! collaborators, covering the reputation decision table, duplicate and
//! commit-failure handling, retries and staging cleanup.

use std::path::PathBuf;
use std::sync::Arc;

use purechain_ledger::{Ledger, ReputationLedger, TxKind};
use purechain_orchestrator::collaborators::mock::{
    FlakyAuditLog, MockContentStore, MockIdentityResolver, MockValidator,
    RecordingNotificationSink, UnconfirmedLedger,
};
use purechain_orchestrator::collaborators::{AuditLog, ValidationReport};
use purechain_orchestrator::local::MemoryAuditLog;
use purechain_orchestrator::retry::RetryPolicy;
use purechain_orchestrator::{
    Collaborators, ContributorProfile, ErrorKind, OrchestratorConfig, OrchestratorError,
    RecordOutcome, Sector, Step, SubmissionOrchestrator, SubmissionQuery, SubmissionRequest,
    SubmissionStatus,
};
use tempfile::TempDir;
use tokio_test::assert_ok;

const TOKEN: &str = "token-alice";
const ALICE: &str = "0xA11CE";

fn alice() -> ContributorProfile {
    ContributorProfile {
        identity_key: "user_alice".to_string(),
        name: "Alice".to_string(),
        organization: "North Clinic".to_string(),
        sector: Sector::Healthcare,
        address: ALICE.to_string(),
        email: "alice@example.org".to_string(),
    }
}

fn csv(n: u32) -> Vec<u8> {
    format!("age,bmi,target\n{},{},1\n{},{},0\n", 30 + n, 20 + n, 50 + n, 25 + n).into_bytes()
}

fn request(n: u32) -> SubmissionRequest {
    SubmissionRequest::new(TOKEN, format!("patients-{}.csv", n), csv(n), Sector::Healthcare, "model_1")
        .with_label(format!("Patients batch {}", n))
}

struct Harness {
    orchestrator: SubmissionOrchestrator,
    identity: Arc<MockIdentityResolver>,
    store: Arc<MockContentStore>,
    validator: Arc<MockValidator>,
    ledger: Arc<ReputationLedger>,
    audit: Arc<dyn AuditLog>,
    notifier: Arc<RecordingNotificationSink>,
    staging: PathBuf,
    _dir: TempDir,
}

struct Options {
    leniency: bool,
    unconfirmed: bool,
    audit: Option<Arc<dyn AuditLog>>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            leniency: true,
            unconfirmed: false,
            audit: None,
        }
    }
}

fn harness() -> Harness {
    harness_with(Options::default())
}

fn harness_with(options: Options) -> Harness {
    let dir = TempDir::new().unwrap();
    let staging = dir.path().join("staging");

    let mut config = OrchestratorConfig::default().with_data_dir(dir.path());
    config.retry = RetryPolicy::immediate(3);
    config.receipts.attempts = 2;
    config.receipts.interval_ms = 1;
    config.submission.policy.leniency_on_first_invalid = options.leniency;

    let identity = Arc::new(MockIdentityResolver::new().with_profile(TOKEN, alice()));
    let store = Arc::new(MockContentStore::new());
    let validator = Arc::new(MockValidator::valid());
    let ledger = Arc::new(ReputationLedger::new());
    let audit = options
        .audit
        .unwrap_or_else(|| Arc::new(MemoryAuditLog::new()) as Arc<dyn AuditLog>);
    let notifier = Arc::new(RecordingNotificationSink::new());

    let ledger_handle: Arc<dyn Ledger> = if options.unconfirmed {
        Arc::new(UnconfirmedLedger::failing(ledger.clone()))
    } else {
        ledger.clone()
    };

    let orchestrator = SubmissionOrchestrator::new(
        config,
        Collaborators {
            identity: identity.clone(),
            store: store.clone(),
            validator: validator.clone(),
            ledger: ledger_handle,
            audit: audit.clone(),
            notifier: notifier.clone(),
        },
    );

    Harness {
        orchestrator,
        identity,
        store,
        validator,
        ledger,
        audit,
        notifier,
        staging,
        _dir: dir,
    }
}

impl Harness {
    async fn records(&self) -> Vec<purechain_orchestrator::SubmissionRecord> {
        self.audit.submissions(&SubmissionQuery::default()).await.unwrap()
    }

    async fn submit_invalid(&self, n: u32) -> purechain_orchestrator::Result<purechain_orchestrator::SubmissionOutcome> {
        self.validator
            .set_report(ValidationReport::invalid(&["Missing values: 40%"]))
            .await;
        let outcome = self.orchestrator.handle(request(n)).await;
        self.validator.set_report(ValidationReport::valid()).await;
        outcome
    }

    fn staging_is_empty(&self) -> bool {
        match std::fs::read_dir(&self.staging) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => true,
        }
    }
}

// =============================================================================
// Decision table
// =============================================================================

#[tokio::test]
async fn test_valid_first_submission_creates_account() {
    let h = harness();

    let outcome = assert_ok!(h.orchestrator.handle(request(1)).await);

    assert_eq!(outcome.status, SubmissionStatus::Accepted);
    assert_eq!(outcome.reputation, 3);
    assert!(outcome.warnings.is_empty());
    assert!(outcome.unique_id.starts_with("uid-"));

    let address = outcome.content_address.clone().unwrap();
    assert!(h.store.contains(&address));

    let account = h.ledger.get_account(ALICE).await;
    assert_eq!(account.submission_count, 1);
    assert_eq!(account.bound_unique_id, outcome.unique_id);
    assert_eq!(account.display_name, "Alice");

    let mirrors = h.audit.transactions(Some(ALICE)).await.unwrap();
    let kinds: Vec<TxKind> = mirrors.iter().map(|t| t.kind).collect();
    assert_eq!(kinds, vec![TxKind::Submission, TxKind::Reward]);
    assert!(mirrors.iter().all(|t| t.related_submission.as_deref() == Some(outcome.record_id.as_str())));

    let records = h.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, RecordOutcome::Accepted);
    assert_eq!(records[0].dataset_label, "Patients batch 1");
    assert_eq!(records[0].tx_ref, outcome.submission_tx);

    let sent = h.notifier.sent_to("alice@example.org").await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].body.contains("From PureChain Team"));
}

#[tokio::test]
async fn test_invalid_after_valid_is_penalized() {
    let h = harness();
    h.orchestrator.handle(request(1)).await.unwrap();

    let outcome = h.submit_invalid(2).await.unwrap();

    assert_eq!(outcome.status, SubmissionStatus::Penalized);
    assert_eq!(outcome.reputation, 2);
    assert!(outcome.penalty_tx.is_some());
    assert!(outcome.content_address.is_none());
    assert_eq!(outcome.issues, vec!["Missing values: 40%"]);

    // Invalid content is never stored.
    assert_eq!(h.store.blob_count(), 1);

    let account = h.ledger.get_account(ALICE).await;
    assert_eq!(account.submission_count, 1);

    let penalized = h
        .audit
        .submissions(&SubmissionQuery::invalid())
        .await
        .unwrap();
    assert_eq!(penalized.len(), 1);
    assert_eq!(penalized[0].outcome, RecordOutcome::Penalized);
}

#[tokio::test]
async fn test_repeated_invalid_submissions_blacklist() {
    let h = harness();
    h.orchestrator.handle(request(1)).await.unwrap();

    let mut statuses = Vec::new();
    let mut reputations = Vec::new();
    for n in 2..6 {
        let outcome = h.submit_invalid(n).await.unwrap();
        statuses.push(outcome.status);
        reputations.push(outcome.reputation);
    }

    assert_eq!(reputations, vec![2, 1, 0, -1]);
    assert_eq!(
        statuses,
        vec![
            SubmissionStatus::Penalized,
            SubmissionStatus::Penalized,
            SubmissionStatus::Penalized,
            SubmissionStatus::Blocked,
        ]
    );

    let blacklists = h
        .audit
        .transactions(Some(ALICE))
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.kind == TxKind::Blacklist)
        .count();
    assert_eq!(blacklists, 1);

    // Valid data from a blacklisted account is a conflict.
    let err = h.orchestrator.handle(request(10)).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Conflict(_)));
    assert_eq!(err.kind(), ErrorKind::Conflict);

    // Invalid data from a blacklisted account is terminal, not an error.
    let outcome = h.submit_invalid(11).await.unwrap();
    assert_eq!(outcome.status, SubmissionStatus::Blocked);
    assert_eq!(outcome.reputation, -1);
    assert!(outcome.penalty_tx.is_none());

    let account = h.ledger.get_account(ALICE).await;
    assert_eq!(account.reputation, -1);
    assert!(account.is_blacklisted);
}

#[tokio::test]
async fn test_first_invalid_submission_is_lenient() {
    let h = harness();

    let outcome = h.submit_invalid(1).await.unwrap();

    assert_eq!(outcome.status, SubmissionStatus::Lenient);
    assert_eq!(outcome.reputation, 0);
    assert!(outcome.penalty_tx.is_none());
    assert!(h.ledger.events().await.is_empty());
    assert_eq!(h.store.put_calls(), 0);

    let records = h.records().await;
    assert_eq!(records[0].outcome, RecordOutcome::Lenient);
    assert!(records[0].content_address.is_none());
}

#[tokio::test]
async fn test_first_invalid_without_leniency_is_not_found() {
    let h = harness_with(Options {
        leniency: false,
        ..Default::default()
    });

    let err = h.submit_invalid(1).await.unwrap_err();

    assert!(matches!(err, OrchestratorError::NotFound(_)));
    assert!(h.ledger.events().await.is_empty());
    assert_eq!(h.records().await[0].outcome, RecordOutcome::Rejected);
}

// =============================================================================
// Conflicts and commit failures
// =============================================================================

#[tokio::test]
async fn test_duplicate_submission_is_conflict() {
    let h = harness();
    h.orchestrator.handle(request(1)).await.unwrap();

    let err = h.orchestrator.handle(request(1)).await.unwrap_err();

    assert!(matches!(err, OrchestratorError::Conflict(_)));
    assert_eq!(h.ledger.get_reputation(ALICE).await, 3);
    assert_eq!(h.ledger.get_account(ALICE).await.submission_count, 1);

    let records = h.records().await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].outcome, RecordOutcome::Duplicate);
    assert!(records[1].tx_ref.is_none());
}

#[tokio::test]
async fn test_failed_receipt_is_commit_failure() {
    let h = harness_with(Options {
        unconfirmed: true,
        ..Default::default()
    });

    let err = h.orchestrator.handle(request(1)).await.unwrap_err();

    let tx_hash = match &err {
        OrchestratorError::LedgerCommitFailed { tx_hash, .. } => tx_hash.clone(),
        other => panic!("expected commit failure, got {:?}", other),
    };
    assert!(err.is_retryable());

    let records = h.records().await;
    assert_eq!(records[0].outcome, RecordOutcome::Failed);
    assert_eq!(records[0].tx_ref.as_deref(), Some(tx_hash.as_str()));
    assert!(h.audit.transactions(None).await.unwrap().is_empty());
    assert!(h.notifier.sent().await.is_empty());
}

// =============================================================================
// Retries
// =============================================================================

#[tokio::test]
async fn test_transient_store_failures_are_retried_once_stored() {
    let h = harness();
    h.store.fail_next_puts(2);

    let outcome = h.orchestrator.handle(request(1)).await.unwrap();

    assert!(outcome.is_accepted());
    assert_eq!(h.store.put_calls(), 3);
    assert_eq!(h.store.blob_count(), 1);
    assert_eq!(h.ledger.get_account(ALICE).await.submission_count, 1);

    // Retries land on the same address a clean first attempt would.
    let clean = harness();
    let first_try = clean.orchestrator.handle(request(1)).await.unwrap();
    assert_eq!(clean.store.put_calls(), 1);
    assert_eq!(outcome.content_address, first_try.content_address);
    assert!(h.store.contains(outcome.content_address.as_deref().unwrap()));
}

#[tokio::test]
async fn test_empty_store_response_is_retried() {
    let h = harness();
    h.store.empty_next_puts(1);

    let outcome = h.orchestrator.handle(request(1)).await.unwrap();

    assert!(outcome.content_address.unwrap().starts_with("sha256-"));
    assert_eq!(h.store.put_calls(), 2);
}

#[tokio::test]
async fn test_store_outage_leaves_ledger_untouched() {
    let h = harness();
    h.store.set_unavailable(true);

    let err = h.orchestrator.handle(request(1)).await.unwrap_err();

    match err {
        OrchestratorError::TransientInfrastructure { step, attempts, .. } => {
            assert_eq!(step, Step::ContentStore);
            assert_eq!(attempts, 3);
        }
        other => panic!("expected transient failure, got {:?}", other),
    }
    assert!(h.ledger.events().await.is_empty());
    assert_eq!(h.records().await[0].outcome, RecordOutcome::Failed);

    // Resubmitting after recovery succeeds exactly once.
    h.store.set_unavailable(false);
    h.orchestrator.handle(request(1)).await.unwrap();
    assert!(h.orchestrator.handle(request(1)).await.is_err());
    assert_eq!(h.ledger.get_reputation(ALICE).await, 3);
}

// =============================================================================
// Staging and best-effort steps
// =============================================================================

#[tokio::test]
async fn test_staged_upload_removed_on_every_path() {
    let h = harness();

    h.orchestrator.handle(request(1)).await.unwrap();
    assert!(h.validator.saw_staged_file());
    let staged = h.validator.last_path().await.unwrap();
    assert_eq!(staged.extension().unwrap(), "csv");
    assert!(!staged.exists());
    assert!(h.staging_is_empty());

    h.validator.set_failure("Traceback: pandas.errors.ParserError").await;
    let err = h.orchestrator.handle(request(2)).await.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::FatalProcess { step: Step::Validation, .. }
    ));
    assert!(h.staging_is_empty());
    assert_eq!(h.ledger.get_account(ALICE).await.submission_count, 1);
}

#[tokio::test]
async fn test_post_commit_failures_become_warnings() {
    let flaky = Arc::new(FlakyAuditLog::new());
    let h = harness_with(Options {
        audit: Some(flaky.clone()),
        ..Default::default()
    });
    flaky.set_fail_writes(true);

    let outcome = h.orchestrator.handle(request(1)).await.unwrap();

    assert!(outcome.is_accepted());
    assert_eq!(outcome.reputation, 3);
    // Two mirrors and the submission record.
    assert_eq!(outcome.warnings.len(), 3);
    assert_eq!(h.ledger.get_reputation(ALICE).await, 3);
}

#[tokio::test]
async fn test_failed_request_reports_unwritten_record() {
    let flaky = Arc::new(FlakyAuditLog::new());
    let h = harness_with(Options {
        audit: Some(flaky.clone()),
        ..Default::default()
    });
    h.store.set_unavailable(true);
    flaky.set_fail_writes(true);

    let err = h.orchestrator.handle(request(1)).await.unwrap_err();

    assert!(matches!(
        err.root(),
        OrchestratorError::TransientInfrastructure { step: Step::ContentStore, attempts: 3, .. }
    ));
    assert!(err.is_retryable());

    let response = err.to_response();
    assert_eq!(response.kind, ErrorKind::TransientInfrastructure);
    assert_eq!(response.warnings.len(), 1);
    assert!(response.warnings[0].contains("not written"));
    assert!(flaky.submissions(&SubmissionQuery::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_submissions_from_one_account() {
    let h = Arc::new(harness());

    let mut handles = Vec::new();
    for n in 0..10 {
        let h = Arc::clone(&h);
        handles.push(tokio::spawn(async move { h.orchestrator.handle(request(n)).await }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().unwrap().is_accepted());
    }

    let account = h.ledger.get_account(ALICE).await;
    assert_eq!(account.submission_count, 10);
    assert_eq!(account.reputation, 1 + 10 * 2);
    assert_eq!(h.identity.call_count(), 10);
    assert!(h.staging_is_empty());
}
