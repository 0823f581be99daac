//! Interfaces to the systems the orchestrators coordinate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::CollaboratorError;
use crate::types::{
    ContributorProfile, LedgerTransaction, NotificationRecord, SubmissionQuery, SubmissionRecord,
    TrainingRun, ValidationStatus,
};

pub type CollabResult<T> = std::result::Result<T, CollaboratorError>;

/// Maps an identity token to a stored contributor profile.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// `Ok(None)` when the token is valid but no profile is stored.
    async fn resolve(&self, token: &str) -> CollabResult<Option<ContributorProfile>>;
}

/// Metadata attached to stored content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentLabel {
    pub name: String,
    pub keyvalues: BTreeMap<String, String>,
}

impl ContentLabel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keyvalues: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.keyvalues.insert(key.to_string(), value.into());
        self
    }
}

/// Immutable content-addressed blob storage.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store bytes and return their content address.
    async fn put(&self, bytes: &[u8], label: &ContentLabel) -> CollabResult<String>;

    async fn get(&self, address: &str) -> CollabResult<Vec<u8>>;
}

/// One invocation of an external command.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Passed to the command as its last argument
    pub input: PathBuf,
    pub working_dir: Option<PathBuf>,
}

/// Captured result of an external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// `None` when terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Convert a non-zero exit into an error.
    pub fn into_success(self) -> CollabResult<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(CollaboratorError::ProcessFailed {
                exit_code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Runs an external program with a bounded lifetime.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, request: &ExecRequest) -> CollabResult<ExecOutput>;
}

/// Structured verdict from the quality validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub quality: ValidationStatus,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub stats: Option<serde_json::Value>,
}

impl ValidationReport {
    pub fn valid() -> Self {
        Self {
            quality: ValidationStatus::Valid,
            issues: Vec::new(),
            stats: None,
        }
    }

    pub fn invalid(issues: &[&str]) -> Self {
        Self {
            quality: ValidationStatus::Invalid,
            issues: issues.iter().map(|i| i.to_string()).collect(),
            stats: None,
        }
    }
}

/// Judges a staged dataset.
#[async_trait]
pub trait QualityValidator: Send + Sync {
    async fn validate(&self, path: &Path) -> CollabResult<ValidationReport>;
}

/// Metrics reported by a finished training process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainerReport {
    pub metrics: BTreeMap<String, f64>,
    pub stdout: String,
}

/// Trains a model on a normalized dataset, leaving artifacts in `working_dir`.
#[async_trait]
pub trait Trainer: Send + Sync {
    async fn train(&self, input: &Path, working_dir: &Path) -> CollabResult<TrainerReport>;
}

/// Append-only store of submissions, ledger mirrors, runs and notifications.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append_transaction(&self, tx: LedgerTransaction) -> CollabResult<()>;

    /// Mirrors for one account, or all when `None`, in sequence order.
    async fn transactions(&self, account: Option<&str>) -> CollabResult<Vec<LedgerTransaction>>;

    async fn record_submission(&self, record: SubmissionRecord) -> CollabResult<()>;

    /// Matching submissions in insertion order.
    async fn submissions(&self, query: &SubmissionQuery) -> CollabResult<Vec<SubmissionRecord>>;

    async fn record_training_run(&self, run: TrainingRun) -> CollabResult<()>;

    /// Runs for one model, or all when `None`, newest first.
    async fn training_runs(&self, model_id: Option<&str>) -> CollabResult<Vec<TrainingRun>>;

    async fn record_notification(&self, record: NotificationRecord) -> CollabResult<()>;

    /// Notification history, newest first.
    async fn notifications(&self) -> CollabResult<Vec<NotificationRecord>>;
}

/// Delivers plain-text messages.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> CollabResult<()>;
}
