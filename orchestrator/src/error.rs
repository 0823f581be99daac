//! Error types for the orchestrators and their collaborators.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use purechain_ledger::LedgerError;

#[cfg(feature = "typescript")]
use ts_rs::TS;

/// Errors reported by an external collaborator.
#[derive(Error, Debug)]
pub enum CollaboratorError {
    /// Service could not be reached
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Service answered without a usable body
    #[error("Empty response from {0}")]
    EmptyResponse(String),

    /// Call did not complete in time
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Service refused the request
    #[error("Rejected: {0}")]
    Rejected(String),

    /// External process exited unsuccessfully
    #[error("Process exited with code {exit_code:?}: {stderr}")]
    ProcessFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    /// Output could not be interpreted
    #[error("Malformed output: {0}")]
    MalformedOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CollaboratorError {
    /// Whether the same call may succeed if repeated.
    ///
    /// Only consulted for network collaborators; external processes are never
    /// retried, whatever the error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::EmptyResponse(_) | Self::Timeout(_)
        )
    }
}

/// Pipeline step an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Identity,
    Staging,
    Validation,
    ContentStore,
    Ledger,
    Audit,
    Notification,
    Dataset,
    Trainer,
    Artifacts,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Identity => "identity service",
            Self::Staging => "staging",
            Self::Validation => "quality validator",
            Self::ContentStore => "content store",
            Self::Ledger => "ledger",
            Self::Audit => "audit log",
            Self::Notification => "notification sink",
            Self::Dataset => "dataset assembly",
            Self::Trainer => "trainer",
            Self::Artifacts => "artifact publishing",
        };
        f.write_str(name)
    }
}

/// Errors returned by the submission and training orchestrators.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Request rejected before any side effect
    #[error("Invalid request: {0}")]
    ClientInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Ledger business rule rejected the operation
    #[error("Rejected by ledger: {0}")]
    Conflict(#[source] LedgerError),

    /// A collaborator stayed unreachable after retries
    #[error("{step} unavailable after {attempts} attempt(s): {source}")]
    TransientInfrastructure {
        step: Step,
        attempts: u32,
        #[source]
        source: CollaboratorError,
    },

    /// An external process failed; never retried
    #[error("{step} failed: {detail}")]
    FatalProcess { step: Step, detail: String },

    /// The ledger call returned but its receipt reports failure
    #[error("Ledger transaction {tx_hash} failed to commit: {reason}")]
    LedgerCommitFailed { tx_hash: String, reason: String },

    #[error("Insufficient data: found {found}, at least {required} required")]
    InsufficientData { required: usize, found: usize },

    #[error("Ledger error: {0}")]
    Ledger(#[source] LedgerError),

    #[error("Internal error in {step}: {detail}")]
    Internal { step: Step, detail: String },

    /// The request failed and its audit record could not be written either
    #[error("{source} (audit record not written: {warning})")]
    Unrecorded {
        #[source]
        source: Box<OrchestratorError>,
        warning: String,
    },
}

impl OrchestratorError {
    /// Classify a ledger rejection.
    pub fn from_ledger(err: LedgerError) -> Self {
        match err {
            e if e.is_conflict() => Self::Conflict(e),
            LedgerError::SubmissionNotFound(id) => {
                Self::NotFound(format!("no submission for unique id {}", id))
            }
            e => Self::Ledger(e),
        }
    }

    /// A collaborator failure inside an external-process step.
    pub fn fatal(step: Step, err: impl std::fmt::Display) -> Self {
        Self::FatalProcess {
            step,
            detail: err.to_string(),
        }
    }

    pub fn internal(step: Step, err: impl std::fmt::Display) -> Self {
        Self::Internal {
            step,
            detail: err.to_string(),
        }
    }

    /// The failure itself, without audit bookkeeping.
    pub fn root(&self) -> &OrchestratorError {
        match self {
            Self::Unrecorded { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unrecorded { source, .. } => source.kind(),
            Self::ClientInput(_) => ErrorKind::ClientInput,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::TransientInfrastructure { .. } => ErrorKind::TransientInfrastructure,
            Self::FatalProcess { .. } => ErrorKind::FatalProcess,
            Self::LedgerCommitFailed { .. } => ErrorKind::LedgerCommitFailed,
            Self::InsufficientData { .. } => ErrorKind::InsufficientData,
            Self::Ledger(_) | Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Whether the caller may resubmit the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root(),
            Self::TransientInfrastructure { .. } | Self::LedgerCommitFailed { .. }
        )
    }

    pub fn to_response(&self) -> ErrorResponse {
        if let Self::Unrecorded { source, warning } = self {
            let mut response = source.to_response();
            response.warnings.push(warning.clone());
            return response;
        }

        let details = match self {
            Self::Conflict(e) | Self::Ledger(e) => Some(e.to_string()),
            Self::TransientInfrastructure { source, .. } => Some(source.to_string()),
            Self::FatalProcess { detail, .. } | Self::Internal { detail, .. } => {
                Some(detail.clone())
            }
            Self::LedgerCommitFailed { tx_hash, .. } => Some(format!("transaction {}", tx_hash)),
            _ => None,
        };

        ErrorResponse {
            success: false,
            kind: self.kind(),
            error: self.to_string(),
            details,
            warnings: Vec::new(),
        }
    }
}

/// Machine-readable error class, stable across messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ClientInput,
    NotFound,
    Conflict,
    TransientInfrastructure,
    FatalProcess,
    LedgerCommitFailed,
    InsufficientData,
    Internal,
}

/// Error body returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct ErrorResponse {
    pub success: bool,
    pub kind: ErrorKind,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Bookkeeping that failed alongside the request
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
