//! Records and request/response types shared by the orchestrators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use purechain_ledger::{EventPayload, LedgerEvent, TxKind, TxStatus};

#[cfg(feature = "typescript")]
use ts_rs::TS;

/// Data sector a contributor and a model belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub enum Sector {
    Healthcare,
    Finance,
}

impl Sector {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthcare => "Healthcare",
            Self::Finance => "Finance",
        }
    }
}

impl std::fmt::Display for Sector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "healthcare" => Ok(Self::Healthcare),
            "finance" => Ok(Self::Finance),
            other => Err(format!("unknown sector: {}", other)),
        }
    }
}

/// Verdict of the external quality validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStatus {
    Valid,
    Invalid,
}

/// Stored contributor profile, as returned by the identity resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributorProfile {
    /// Identity-provider key for the contributor
    pub identity_key: String,
    pub name: String,
    pub organization: String,
    pub sector: Sector,
    /// Ledger address
    pub address: String,
    /// Where notifications are delivered
    #[serde(default)]
    pub email: String,
}

impl ContributorProfile {
    /// Whether the fields needed to derive a unique id are present.
    pub fn is_complete(&self) -> bool {
        !self.identity_key.trim().is_empty()
            && !self.name.trim().is_empty()
            && !self.organization.trim().is_empty()
            && !self.address.trim().is_empty()
    }
}

/// Outcome code stored on a submission record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    /// Stored and rewarded
    Accepted,
    /// Invalid first submission, not penalized
    Lenient,
    /// Invalid, penalty applied
    Penalized,
    /// Invalid, account blacklisted
    Blocked,
    /// Rejected by the ledger's duplicate guard
    Duplicate,
    /// Rejected by another ledger rule
    Rejected,
    /// Aborted by an infrastructure or commit failure
    Failed,
}

/// One submission attempt, written once and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub id: String,
    pub unique_id: String,
    /// Ledger address of the contributor
    pub account: String,
    pub contributor_name: String,
    /// Notification address of the contributor
    pub contact: String,
    /// `None` when the content was never stored
    pub content_address: Option<String>,
    pub validation_status: ValidationStatus,
    pub issues: Vec<String>,
    pub dataset_label: String,
    pub sector: Sector,
    pub model_id: String,
    pub outcome: RecordOutcome,
    /// Ledger transaction that settled the attempt, if any
    pub tx_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Filter for submission history queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionQuery {
    pub status: Option<ValidationStatus>,
    pub model_id: Option<String>,
    pub sector: Option<Sector>,
    pub account: Option<String>,
}

impl SubmissionQuery {
    pub fn valid() -> Self {
        Self {
            status: Some(ValidationStatus::Valid),
            ..Default::default()
        }
    }

    pub fn invalid() -> Self {
        Self {
            status: Some(ValidationStatus::Invalid),
            ..Default::default()
        }
    }

    pub fn for_model(mut self, model_id: impl Into<String>, sector: Sector) -> Self {
        self.model_id = Some(model_id.into());
        self.sector = Some(sector);
        self
    }

    pub fn for_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn matches(&self, record: &SubmissionRecord) -> bool {
        self.status.map_or(true, |s| s == record.validation_status)
            && self.model_id.as_ref().map_or(true, |m| m == &record.model_id)
            && self.sector.map_or(true, |s| s == record.sector)
            && self.account.as_ref().map_or(true, |a| a == &record.account)
    }
}

/// Audit mirror of one ledger event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub tx_hash: String,
    pub kind: TxKind,
    pub account: String,
    pub unique_id: Option<String>,
    /// Submission record the event settled, if any
    pub related_submission: Option<String>,
    pub content_address: Option<String>,
    pub outcome: TxStatus,
    /// Ledger sequence number ("block number" analogue)
    pub sequence_number: u64,
    pub event_name: String,
    pub event_payload: EventPayload,
    pub created_at: DateTime<Utc>,
}

impl LedgerTransaction {
    /// Mirror a committed ledger event.
    pub fn mirror(event: &LedgerEvent, related_submission: Option<&str>) -> Self {
        Self {
            tx_hash: event.tx_hash.clone(),
            kind: event.kind,
            account: event.account.clone(),
            unique_id: event.unique_id.clone(),
            related_submission: related_submission.map(String::from),
            content_address: event.content_address.clone(),
            outcome: TxStatus::Success,
            sequence_number: event.sequence,
            event_name: event.kind.event_name().to_string(),
            event_payload: event.payload.clone(),
            created_at: event.recorded_at,
        }
    }
}

/// A contributor's upload, as handed over by the transport layer.
#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    pub identity_token: String,
    pub file_bytes: Vec<u8>,
    pub file_name: String,
    pub sector: Sector,
    pub model_id: String,
    pub dataset_label: Option<String>,
}

impl SubmissionRequest {
    pub fn new(
        identity_token: impl Into<String>,
        file_name: impl Into<String>,
        file_bytes: Vec<u8>,
        sector: Sector,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            identity_token: identity_token.into(),
            file_bytes,
            file_name: file_name.into(),
            sector,
            model_id: model_id.into(),
            dataset_label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.dataset_label = Some(label.into());
        self
    }
}

/// How a handled submission ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Accepted,
    Lenient,
    Penalized,
    /// Terminal: the account is blacklisted
    Blocked,
}

/// Response for a handled submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct SubmissionOutcome {
    pub status: SubmissionStatus,
    pub message: String,
    pub unique_id: String,
    pub content_address: Option<String>,
    pub submission_tx: Option<String>,
    pub penalty_tx: Option<String>,
    pub reputation: i64,
    pub issues: Vec<String>,
    pub record_id: String,
    /// Best-effort steps that failed after the ledger committed
    pub warnings: Vec<String>,
}

impl SubmissionOutcome {
    pub fn is_accepted(&self) -> bool {
        self.status == SubmissionStatus::Accepted
    }
}

/// Administrator request to train one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingRequest {
    pub model_id: String,
    pub sector: Sector,
    /// Ledger address of the administrator
    pub triggering_account: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrainingStatus {
    Success,
    LowPerformance,
    Failed,
}

/// One training invocation, recorded at completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct TrainingRun {
    pub id: String,
    pub model_id: String,
    pub sector: Sector,
    pub triggering_account: String,
    pub row_count: usize,
    pub contributor_count: usize,
    pub duration_seconds: f64,
    pub metrics: BTreeMap<String, f64>,
    pub status: TrainingStatus,
    pub artifact_version: Option<String>,
    pub model_path: Option<String>,
    pub scaler_path: Option<String>,
    pub ledger_tx_ref: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Where a run's artifacts were published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPaths {
    pub version: String,
    pub model_path: String,
    pub scaler_path: String,
}

/// A blob that could not be used for training.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedBlob {
    pub content_address: String,
    pub error: String,
}

/// A notification that could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationFailure {
    pub recipient: String,
    pub error: String,
}

/// Response for a training run. Sub-failures never fail the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingOutcome {
    pub run: TrainingRun,
    pub artifacts: ArtifactPaths,
    pub skipped_blobs: Vec<SkippedBlob>,
    pub notification_failures: Vec<NotificationFailure>,
    pub alert_sent: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Sent,
    Failed,
}

/// Log entry for one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    pub recipient: String,
    pub subject: String,
    pub status: NotificationStatus,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn new(recipient: &str, subject: &str, result: &Result<(), String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            status: if result.is_ok() {
                NotificationStatus::Sent
            } else {
                NotificationStatus::Failed
            },
            error: result.as_ref().err().cloned(),
            timestamp: Utc::now(),
        }
    }
}
