//! Submission orchestration.
//!
//! Drives one contributor upload through identity resolution, staging,
//! validation, storage, the ledger, the audit log and notification:
//!
//! | Verdict | Prior submissions | Account     | Result                       |
//! |---------|-------------------|-------------|------------------------------|
//! | VALID   | any               | clean       | store, submit, reward        |
//! | INVALID | 0                 | none        | lenient (when enabled)       |
//! | INVALID | >= 1              | clean       | penalize, maybe blacklist    |
//! | any     | any               | blacklisted | blocked                      |

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use purechain_ledger::{Ledger, LedgerError, TxKind};

use crate::collaborators::{Collaborators, ContentLabel, ValidationReport};
use crate::config::OrchestratorConfig;
use crate::error::{CollaboratorError, OrchestratorError, Result, Step};
use crate::identity::derive_unique_id;
use crate::messages;
use crate::retry::retry_with_backoff;
use crate::staging::StagedUpload;
use crate::steps::{confirm_commit, deliver, from_retry, mirror_events};
use crate::types::{
    ContributorProfile, RecordOutcome, SubmissionOutcome, SubmissionRecord, SubmissionRequest,
    SubmissionStatus, ValidationStatus,
};

/// State of one submission after validation.
struct Attempt<'a> {
    record_id: String,
    request: &'a SubmissionRequest,
    profile: ContributorProfile,
    unique_id: String,
    dataset_label: String,
    report: ValidationReport,
}

impl Attempt<'_> {
    fn record(
        &self,
        outcome: RecordOutcome,
        content_address: Option<&str>,
        tx_ref: Option<&str>,
    ) -> SubmissionRecord {
        SubmissionRecord {
            id: self.record_id.clone(),
            unique_id: self.unique_id.clone(),
            account: self.profile.address.clone(),
            contributor_name: self.profile.name.clone(),
            contact: self.profile.email.clone(),
            content_address: content_address.map(String::from),
            validation_status: self.report.quality,
            issues: self.report.issues.clone(),
            dataset_label: self.dataset_label.clone(),
            sector: self.request.sector,
            model_id: self.request.model_id.clone(),
            outcome,
            tx_ref: tx_ref.map(String::from),
            created_at: Utc::now(),
        }
    }

    fn outcome(&self, status: SubmissionStatus, message: &str, reputation: i64) -> SubmissionOutcome {
        SubmissionOutcome {
            status,
            message: message.to_string(),
            unique_id: self.unique_id.clone(),
            content_address: None,
            submission_tx: None,
            penalty_tx: None,
            reputation,
            issues: self.report.issues.clone(),
            record_id: self.record_id.clone(),
            warnings: Vec::new(),
        }
    }
}

/// Coordinates contributor submissions.
pub struct SubmissionOrchestrator {
    config: OrchestratorConfig,
    collaborators: Collaborators,
}

impl SubmissionOrchestrator {
    pub fn new(config: OrchestratorConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn ledger(&self) -> Arc<dyn Ledger> {
        Arc::clone(&self.collaborators.ledger)
    }

    /// Handle one upload end to end.
    pub async fn handle(&self, request: SubmissionRequest) -> Result<SubmissionOutcome> {
        self.check_request(&request)?;

        let profile = self.resolve_identity(&request.identity_token).await?;
        let unique_id = derive_unique_id(&profile.name, &profile.organization, &profile.identity_key);

        let report = {
            let staged = StagedUpload::stage(
                &self.config.submission.staging_dir,
                &request.file_name,
                &request.file_bytes,
            )
            .await
            .map_err(|e| OrchestratorError::internal(Step::Staging, e))?;

            self.collaborators
                .validator
                .validate(staged.path())
                .await
                .map_err(|e| OrchestratorError::fatal(Step::Validation, e))?
        };

        let attempt = Attempt {
            record_id: uuid::Uuid::new_v4().to_string(),
            dataset_label: request
                .dataset_label
                .clone()
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(|| request.file_name.clone()),
            request: &request,
            profile,
            unique_id,
            report,
        };

        info!(
            account = %attempt.profile.address,
            unique_id = %attempt.unique_id,
            quality = ?attempt.report.quality,
            issues = attempt.report.issues.len(),
            "Submission validated"
        );

        let outcome = match attempt.report.quality {
            ValidationStatus::Valid => self.accept(&attempt).await?,
            ValidationStatus::Invalid => self.reject(&attempt).await?,
        };

        info!(
            account = %attempt.profile.address,
            status = ?outcome.status,
            reputation = outcome.reputation,
            warnings = outcome.warnings.len(),
            "Submission handled"
        );

        Ok(outcome)
    }

    fn check_request(&self, request: &SubmissionRequest) -> Result<()> {
        let limits = &self.config.submission;

        if request.identity_token.trim().is_empty() {
            return Err(OrchestratorError::ClientInput("Missing identity token".to_string()));
        }
        if request.file_bytes.is_empty() {
            return Err(OrchestratorError::ClientInput("Missing file".to_string()));
        }
        if request.file_bytes.len() > limits.max_upload_bytes {
            return Err(OrchestratorError::ClientInput(format!(
                "File size exceeds {} byte limit",
                limits.max_upload_bytes
            )));
        }
        if !limits.accepts_file(&request.file_name) {
            return Err(OrchestratorError::ClientInput(format!(
                "Invalid file type. Allowed: {}",
                limits.allowed_extensions.join(", ")
            )));
        }
        if request.model_id.trim().is_empty() {
            return Err(OrchestratorError::ClientInput("Missing model id".to_string()));
        }
        Ok(())
    }

    async fn resolve_identity(&self, token: &str) -> Result<ContributorProfile> {
        let identity = &*self.collaborators.identity;

        let profile = retry_with_backoff(&self.config.retry, CollaboratorError::is_transient, || async move {
            identity.resolve(token).await
        })
        .await
        .map_err(|e| from_retry(Step::Identity, e))?
        .ok_or_else(|| OrchestratorError::NotFound("User not found".to_string()))?;

        if !profile.is_complete() {
            return Err(OrchestratorError::ClientInput("Invalid user data".to_string()));
        }
        Ok(profile)
    }

    async fn accept(&self, attempt: &Attempt<'_>) -> Result<SubmissionOutcome> {
        let store = &*self.collaborators.store;
        let ledger = &*self.collaborators.ledger;
        let profile = &attempt.profile;

        let label = ContentLabel::new(&attempt.dataset_label)
            .with("uniqueId", &attempt.unique_id)
            .with("sector", attempt.request.sector.as_str())
            .with("modelId", &attempt.request.model_id);
        let label = &label;
        let bytes = attempt.request.file_bytes.as_slice();

        let stored = retry_with_backoff(&self.config.retry, CollaboratorError::is_transient, || async move {
            let address = store.put(bytes, label).await?;
            if address.trim().is_empty() {
                return Err(CollaboratorError::EmptyResponse("content store".to_string()));
            }
            Ok(address)
        })
        .await;

        let content_address = match stored {
            Ok(address) => address,
            Err(e) => {
                return Err(self
                    .abort(attempt.record(RecordOutcome::Failed, None, None), from_retry(Step::ContentStore, e))
                    .await);
            }
        };

        let tx = match ledger
            .submit_with_profile(
                &profile.address,
                &attempt.unique_id,
                &content_address,
                &profile.name,
                &profile.organization,
            )
            .await
        {
            Ok(tx) => tx,
            Err(e) => {
                let outcome = match &e {
                    LedgerError::DuplicateSubmission { .. } => RecordOutcome::Duplicate,
                    e if e.is_conflict() => RecordOutcome::Rejected,
                    _ => RecordOutcome::Failed,
                };
                warn!(account = %profile.address, error = %e, "Ledger rejected submission");
                return Err(self
                    .abort(
                        attempt.record(outcome, Some(&content_address), None),
                        OrchestratorError::from_ledger(e),
                    )
                    .await);
            }
        };

        if let Err(e) = confirm_commit(ledger, &tx.tx_hash, &self.config.receipts).await {
            return Err(self
                .abort(
                    attempt.record(RecordOutcome::Failed, Some(&content_address), Some(&tx.tx_hash)),
                    e,
                )
                .await);
        }

        let mut warnings = Vec::new();
        mirror_events(&*self.collaborators.audit, &tx, Some(&attempt.record_id), &mut warnings).await;
        if let Err(w) = self
            .persist(attempt.record(RecordOutcome::Accepted, Some(&content_address), Some(&tx.tx_hash)))
            .await
        {
            warnings.push(w);
        }

        let reputation = ledger.get_reputation(&profile.address).await;
        let mut outcome = attempt.outcome(SubmissionStatus::Accepted, "Data submitted successfully", reputation);
        outcome.content_address = Some(content_address);
        outcome.submission_tx = Some(tx.tx_hash);

        self.notify_contributor(attempt, &outcome, &mut warnings).await;
        outcome.warnings = warnings;
        Ok(outcome)
    }

    async fn reject(&self, attempt: &Attempt<'_>) -> Result<SubmissionOutcome> {
        let ledger = &*self.collaborators.ledger;
        let address = &attempt.profile.address;
        let account = ledger.get_account(address).await;
        let mut warnings = Vec::new();

        if account.is_blacklisted {
            return self.blocked(attempt, account.reputation).await;
        }

        if account.submission_count == 0 && self.config.submission.policy.leniency_on_first_invalid {
            info!(account = %address, "First submission invalid, not penalized");
            if let Err(w) = self.persist(attempt.record(RecordOutcome::Lenient, None, None)).await {
                warnings.push(w);
            }
            let mut outcome = attempt.outcome(
                SubmissionStatus::Lenient,
                "Data validation failed; first submission is not penalized",
                account.reputation,
            );
            self.notify_contributor(attempt, &outcome, &mut warnings).await;
            outcome.warnings = warnings;
            return Ok(outcome);
        }

        let tx = match ledger.penalize(&attempt.unique_id, address).await {
            Ok(tx) => tx,
            Err(LedgerError::Blacklisted(_)) => {
                let reputation = ledger.get_reputation(address).await;
                return self.blocked(attempt, reputation).await;
            }
            Err(e) => {
                warn!(account = %address, error = %e, "Ledger rejected penalty");
                return Err(self
                    .abort(attempt.record(RecordOutcome::Rejected, None, None), OrchestratorError::from_ledger(e))
                    .await);
            }
        };

        if let Err(e) = confirm_commit(ledger, &tx.tx_hash, &self.config.receipts).await {
            return Err(self
                .abort(attempt.record(RecordOutcome::Failed, None, Some(&tx.tx_hash)), e)
                .await);
        }

        mirror_events(&*self.collaborators.audit, &tx, Some(&attempt.record_id), &mut warnings).await;

        let blacklisted = tx.emitted(TxKind::Blacklist);
        let (status, record_outcome, message) = if blacklisted {
            warn!(account = %address, "Account blacklisted");
            (
                SubmissionStatus::Blocked,
                RecordOutcome::Blocked,
                "Data validation failed; account blacklisted",
            )
        } else {
            (
                SubmissionStatus::Penalized,
                RecordOutcome::Penalized,
                "Data validation failed; reputation penalized",
            )
        };

        if let Err(w) = self
            .persist(attempt.record(record_outcome, None, Some(&tx.tx_hash)))
            .await
        {
            warnings.push(w);
        }

        let reputation = ledger.get_reputation(address).await;
        let mut outcome = attempt.outcome(status, message, reputation);
        outcome.penalty_tx = Some(tx.tx_hash);

        self.notify_contributor(attempt, &outcome, &mut warnings).await;
        outcome.warnings = warnings;
        Ok(outcome)
    }

    /// Terminal outcome for an already blacklisted account.
    async fn blocked(&self, attempt: &Attempt<'_>, reputation: i64) -> Result<SubmissionOutcome> {
        info!(account = %attempt.profile.address, "Submission from blacklisted account");

        let mut outcome = attempt.outcome(
            SubmissionStatus::Blocked,
            "Account is blacklisted; submissions are blocked",
            reputation,
        );
        if let Err(w) = self.persist(attempt.record(RecordOutcome::Blocked, None, None)).await {
            outcome.warnings.push(w);
        }
        Ok(outcome)
    }

    /// Write the record of a failed attempt. A write failure travels with the error.
    async fn abort(&self, record: SubmissionRecord, err: OrchestratorError) -> OrchestratorError {
        match self.persist(record).await {
            Ok(()) => err,
            Err(warning) => OrchestratorError::Unrecorded {
                source: Box::new(err),
                warning,
            },
        }
    }

    /// Write the submission record; the error is returned as a warning.
    async fn persist(&self, record: SubmissionRecord) -> std::result::Result<(), String> {
        let id = record.id.clone();
        self.collaborators
            .audit
            .record_submission(record)
            .await
            .map_err(|e| {
                warn!(record_id = %id, error = %e, "Failed to write submission record");
                format!("submission record {} not written: {}", id, e)
            })
    }

    async fn notify_contributor(
        &self,
        attempt: &Attempt<'_>,
        outcome: &SubmissionOutcome,
        warnings: &mut Vec<String>,
    ) {
        let contact = attempt.profile.email.trim();
        if contact.is_empty() {
            return;
        }

        let message = messages::submission_notice(&attempt.profile.name, &attempt.dataset_label, outcome);
        if let Err(e) = deliver(
            &*self.collaborators.notifier,
            &*self.collaborators.audit,
            contact,
            &message,
        )
        .await
        {
            warnings.push(format!("notification to {} failed: {}", contact, e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::mock::*;
    use crate::local::MemoryAuditLog;
    use crate::retry::RetryPolicy;
    use crate::types::Sector;
    use purechain_ledger::ReputationLedger;

    fn profile() -> ContributorProfile {
        ContributorProfile {
            identity_key: "user_1".to_string(),
            name: "Alice".to_string(),
            organization: "Clinic".to_string(),
            sector: Sector::Healthcare,
            address: "0xA11CE".to_string(),
            email: "alice@example.org".to_string(),
        }
    }

    fn orchestrator(staging: &std::path::Path) -> (SubmissionOrchestrator, Arc<MockIdentityResolver>) {
        let identity = Arc::new(MockIdentityResolver::new().with_profile("token", profile()));
        let mut config = OrchestratorConfig::default();
        config.submission.staging_dir = staging.to_path_buf();
        config.retry = RetryPolicy::immediate(3);

        let collaborators = Collaborators {
            identity: identity.clone(),
            store: Arc::new(MockContentStore::new()),
            validator: Arc::new(MockValidator::valid()),
            ledger: Arc::new(ReputationLedger::new()),
            audit: Arc::new(MemoryAuditLog::new()),
            notifier: Arc::new(RecordingNotificationSink::new()),
        };
        (SubmissionOrchestrator::new(config, collaborators), identity)
    }

    fn request(file_name: &str, bytes: &[u8]) -> SubmissionRequest {
        SubmissionRequest::new("token", file_name, bytes.to_vec(), Sector::Healthcare, "model_1")
    }

    #[tokio::test]
    async fn test_input_checks_run_before_identity() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, identity) = orchestrator(dir.path());

        let cases = vec![
            request("data.csv", b""),
            request("data.exe", b"a,b\n"),
            request("data.csv", &vec![b'x'; 10 * 1024 * 1024 + 1]),
            SubmissionRequest::new("", "data.csv", b"a\n".to_vec(), Sector::Finance, "model_1"),
            SubmissionRequest::new("token", "data.csv", b"a\n".to_vec(), Sector::Finance, " "),
        ];
        for case in cases {
            let err = orchestrator.handle(case).await.unwrap_err();
            assert!(matches!(err, OrchestratorError::ClientInput(_)), "{:?}", err);
        }
        assert_eq!(identity.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_token_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, _) = orchestrator(dir.path());

        let mut req = request("data.csv", b"a,b\n1,2\n");
        req.identity_token = "stranger".to_string();
        assert!(matches!(
            orchestrator.handle(req).await,
            Err(OrchestratorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_identity_outage_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, identity) = orchestrator(dir.path());

        identity.fail_next(2);
        let outcome = orchestrator.handle(request("data.csv", b"a,b\n1,2\n")).await.unwrap();
        assert!(outcome.is_accepted());
        assert_eq!(identity.call_count(), 3);

        identity.fail_next(3);
        let err = orchestrator.handle(request("data.csv", b"a,b\n3,4\n")).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::TransientInfrastructure { step: Step::Identity, attempts: 3, .. }
        ));
    }
}
