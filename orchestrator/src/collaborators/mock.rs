//! In-process collaborators for tests.
//!
//! Each mock counts its calls and can be scripted to fail, so tests can check
//! retry counts, ordering and best-effort behavior without real services.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use purechain_ledger::{
    Account, EventPayload, Ledger, Result as LedgerResult, TxReceipt, TxResult, TxStatus,
};

use super::traits::*;
use crate::error::CollaboratorError;
use crate::local::audit::MemoryAuditLog;
use crate::local::content_store::content_address;
use crate::types::{
    ContributorProfile, LedgerTransaction, NotificationRecord, SubmissionQuery, SubmissionRecord,
    TrainingRun,
};

/// Token-to-profile map with scripted outages.
#[derive(Default)]
pub struct MockIdentityResolver {
    profiles: DashMap<String, ContributorProfile>,
    failures: AtomicU32,
    call_count: AtomicU32,
}

impl MockIdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(self, token: impl Into<String>, profile: ContributorProfile) -> Self {
        self.profiles.insert(token.into(), profile);
        self
    }

    /// Make the next `n` calls fail as unreachable.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityResolver for MockIdentityResolver {
    async fn resolve(&self, token: &str) -> CollabResult<Option<ContributorProfile>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.failures) {
            return Err(CollaboratorError::Unavailable("mock identity service".to_string()));
        }
        Ok(self.profiles.get(token).map(|p| p.clone()))
    }
}

/// Content-addressed blob map with scripted outages.
#[derive(Default)]
pub struct MockContentStore {
    blobs: DashMap<String, Vec<u8>>,
    put_failures: AtomicU32,
    empty_responses: AtomicU32,
    unavailable: AtomicBool,
    broken: DashSet<String>,
    unreachable: DashSet<String>,
    put_calls: AtomicU32,
    get_calls: AtomicU32,
}

impl MockContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` puts fail as unreachable.
    pub fn fail_next_puts(&self, n: u32) {
        self.put_failures.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` puts return an empty address.
    pub fn empty_next_puts(&self, n: u32) {
        self.empty_responses.store(n, Ordering::SeqCst);
    }

    /// Fail every call until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make reads of one address fail permanently.
    pub fn break_address(&self, address: impl Into<String>) {
        self.broken.insert(address.into());
    }

    /// Make reads of one address time out on every attempt.
    pub fn unreachable_address(&self, address: impl Into<String>) {
        self.unreachable.insert(address.into());
    }

    /// Store a blob directly, bypassing the put counters.
    pub fn insert(&self, bytes: &[u8]) -> String {
        let address = content_address(bytes);
        self.blobs.insert(address.clone(), bytes.to_vec());
        address
    }

    pub fn contains(&self, address: &str) -> bool {
        self.blobs.contains_key(address)
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }

    pub fn put_calls(&self) -> u32 {
        self.put_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> u32 {
        self.get_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentStore for MockContentStore {
    async fn put(&self, bytes: &[u8], _label: &ContentLabel) -> CollabResult<String> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) || take_failure(&self.put_failures) {
            return Err(CollaboratorError::Unavailable("mock content store".to_string()));
        }
        if take_failure(&self.empty_responses) {
            return Ok(String::new());
        }
        Ok(self.insert(bytes))
    }

    async fn get(&self, address: &str) -> CollabResult<Vec<u8>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable("mock content store".to_string()));
        }
        if self.unreachable.contains(address) {
            return Err(CollaboratorError::Unavailable("gateway timeout".to_string()));
        }
        if self.broken.contains(address) {
            return Err(CollaboratorError::Rejected(format!("unreadable blob {}", address)));
        }
        self.blobs
            .get(address)
            .map(|b| b.clone())
            .ok_or_else(|| CollaboratorError::NotFound(address.to_string()))
    }
}

enum Verdict {
    Report(ValidationReport),
    Fail(String),
}

/// Validator returning a scripted verdict.
pub struct MockValidator {
    verdict: Mutex<Verdict>,
    call_count: AtomicU32,
    last_path: Mutex<Option<PathBuf>>,
    saw_staged_file: AtomicBool,
}

impl MockValidator {
    pub fn new(report: ValidationReport) -> Self {
        Self {
            verdict: Mutex::new(Verdict::Report(report)),
            call_count: AtomicU32::new(0),
            last_path: Mutex::new(None),
            saw_staged_file: AtomicBool::new(false),
        }
    }

    pub fn valid() -> Self {
        Self::new(ValidationReport::valid())
    }

    pub async fn set_report(&self, report: ValidationReport) {
        *self.verdict.lock().await = Verdict::Report(report);
    }

    /// Make every call fail as a crashed validator process.
    pub async fn set_failure(&self, stderr: impl Into<String>) {
        *self.verdict.lock().await = Verdict::Fail(stderr.into());
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Path of the most recently validated file.
    pub async fn last_path(&self) -> Option<PathBuf> {
        self.last_path.lock().await.clone()
    }

    /// Whether the file existed while it was being validated.
    pub fn saw_staged_file(&self) -> bool {
        self.saw_staged_file.load(Ordering::SeqCst)
    }
}

impl Default for MockValidator {
    fn default() -> Self {
        Self::valid()
    }
}

#[async_trait]
impl QualityValidator for MockValidator {
    async fn validate(&self, path: &Path) -> CollabResult<ValidationReport> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.saw_staged_file
            .store(tokio::fs::metadata(path).await.is_ok(), Ordering::SeqCst);
        *self.last_path.lock().await = Some(path.to_path_buf());

        match &*self.verdict.lock().await {
            Verdict::Report(report) => Ok(report.clone()),
            Verdict::Fail(stderr) => Err(CollaboratorError::ProcessFailed {
                exit_code: Some(1),
                stderr: stderr.clone(),
            }),
        }
    }
}

/// Trainer that reports scripted metrics and writes placeholder artifacts.
pub struct MockTrainer {
    metrics: BTreeMap<String, f64>,
    failure: Option<String>,
    artifact_names: Vec<String>,
    call_count: AtomicU32,
    last_input: Mutex<Option<String>>,
}

impl MockTrainer {
    pub fn new() -> Self {
        Self {
            metrics: BTreeMap::new(),
            failure: None,
            artifact_names: vec!["model.pkl".to_string(), "scaler.pkl".to_string()],
            call_count: AtomicU32::new(0),
            last_input: Mutex::new(None),
        }
    }

    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        self.metrics.insert(name.to_string(), value);
        self
    }

    /// Exit unsuccessfully without writing artifacts.
    pub fn failing(mut self, stderr: impl Into<String>) -> Self {
        self.failure = Some(stderr.into());
        self
    }

    /// Override which artifact files get written (empty writes none).
    pub fn with_artifacts(mut self, names: &[&str]) -> Self {
        self.artifact_names = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Contents of the dataset handed to the last run.
    pub async fn last_input(&self) -> Option<String> {
        self.last_input.lock().await.clone()
    }
}

impl Default for MockTrainer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Trainer for MockTrainer {
    async fn train(&self, input: &Path, working_dir: &Path) -> CollabResult<TrainerReport> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        *self.last_input.lock().await = tokio::fs::read_to_string(input).await.ok();

        if let Some(stderr) = &self.failure {
            return Err(CollaboratorError::ProcessFailed {
                exit_code: Some(1),
                stderr: stderr.clone(),
            });
        }

        for name in &self.artifact_names {
            tokio::fs::write(working_dir.join(name), format!("mock artifact {}", name)).await?;
        }

        let stdout = self
            .metrics
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(TrainerReport {
            metrics: self.metrics.clone(),
            stdout,
        })
    }
}

/// A message captured by [`RecordingNotificationSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// Sink that keeps delivered messages in memory.
#[derive(Default)]
pub struct RecordingNotificationSink {
    sent: Mutex<Vec<SentMessage>>,
    failing: DashSet<String>,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every message addressed to `recipient`.
    pub fn fail_for(&self, recipient: impl Into<String>) {
        self.failing.insert(recipient.into());
    }

    pub async fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_to(&self, recipient: &str) -> Vec<SentMessage> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|m| m.recipient == recipient)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotificationSink {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> CollabResult<()> {
        if self.failing.contains(recipient) {
            return Err(CollaboratorError::Rejected(format!("mailbox unavailable: {}", recipient)));
        }
        self.sent.lock().await.push(SentMessage {
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

/// Audit log whose writes can be switched off.
#[derive(Default)]
pub struct FlakyAuditLog {
    inner: MemoryAuditLog,
    fail_writes: AtomicBool,
}

impl FlakyAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> CollabResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(CollaboratorError::Unavailable("mock audit log".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AuditLog for FlakyAuditLog {
    async fn append_transaction(&self, tx: LedgerTransaction) -> CollabResult<()> {
        self.check()?;
        self.inner.append_transaction(tx).await
    }

    async fn transactions(&self, account: Option<&str>) -> CollabResult<Vec<LedgerTransaction>> {
        self.inner.transactions(account).await
    }

    async fn record_submission(&self, record: SubmissionRecord) -> CollabResult<()> {
        self.check()?;
        self.inner.record_submission(record).await
    }

    async fn submissions(&self, query: &SubmissionQuery) -> CollabResult<Vec<SubmissionRecord>> {
        self.inner.submissions(query).await
    }

    async fn record_training_run(&self, run: TrainingRun) -> CollabResult<()> {
        self.check()?;
        self.inner.record_training_run(run).await
    }

    async fn training_runs(&self, model_id: Option<&str>) -> CollabResult<Vec<TrainingRun>> {
        self.inner.training_runs(model_id).await
    }

    async fn record_notification(&self, record: NotificationRecord) -> CollabResult<()> {
        self.check()?;
        self.inner.record_notification(record).await
    }

    async fn notifications(&self) -> CollabResult<Vec<NotificationRecord>> {
        self.inner.notifications().await
    }
}

/// Ledger wrapper whose receipts report failure after the call returned.
pub struct UnconfirmedLedger {
    inner: Arc<dyn Ledger>,
    missing: bool,
}

impl UnconfirmedLedger {
    /// Receipts come back with status `Failed`.
    pub fn failing(inner: Arc<dyn Ledger>) -> Self {
        Self {
            inner,
            missing: false,
        }
    }

    /// Receipts never become available.
    pub fn missing(inner: Arc<dyn Ledger>) -> Self {
        Self {
            inner,
            missing: true,
        }
    }
}

#[async_trait]
impl Ledger for UnconfirmedLedger {
    async fn submit_with_profile(
        &self,
        actor: &str,
        unique_id: &str,
        content_address: &str,
        display_name: &str,
        organization: &str,
    ) -> LedgerResult<TxResult> {
        self.inner
            .submit_with_profile(actor, unique_id, content_address, display_name, organization)
            .await
    }

    async fn penalize(&self, unique_id: &str, actor: &str) -> LedgerResult<TxResult> {
        self.inner.penalize(unique_id, actor).await
    }

    async fn record_training(
        &self,
        actor: &str,
        model_id: &str,
        payload: EventPayload,
    ) -> LedgerResult<TxResult> {
        self.inner.record_training(actor, model_id, payload).await
    }

    async fn receipt(&self, tx_hash: &str) -> Option<TxReceipt> {
        if self.missing {
            return None;
        }
        self.inner.receipt(tx_hash).await.map(|mut receipt| {
            receipt.status = TxStatus::Failed;
            receipt.reason = Some("block reorganized".to_string());
            receipt
        })
    }

    async fn get_account(&self, address: &str) -> Account {
        self.inner.get_account(address).await
    }
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_content_store_scripted_failures() {
        let store = MockContentStore::new();
        store.fail_next_puts(1);
        let label = ContentLabel::new("ds");

        assert!(store.put(b"a,b\n1,2\n", &label).await.is_err());
        let address = store.put(b"a,b\n1,2\n", &label).await.unwrap();

        assert!(address.starts_with("sha256-"));
        assert_eq!(store.get(&address).await.unwrap(), b"a,b\n1,2\n");
        assert_eq!(store.put_calls(), 2);
    }

    #[tokio::test]
    async fn test_recording_sink() {
        let sink = RecordingNotificationSink::new();
        sink.fail_for("bounce@example.org");

        sink.send("alice@example.org", "Hi", "Body").await.unwrap();
        assert!(sink.send("bounce@example.org", "Hi", "Body").await.is_err());

        assert_eq!(sink.sent().await.len(), 1);
        assert_eq!(sink.sent_to("alice@example.org").await[0].subject, "Hi");
    }
}
