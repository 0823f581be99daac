//! Error types for the reputation ledger.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Content address must not be empty")]
    EmptyContent,

    #[error("Unique id mismatch: account is bound to {expected}, got {actual}")]
    UniqueIdMismatch { expected: String, actual: String },

    #[error("Account is blacklisted: {0}")]
    Blacklisted(String),

    #[error("Duplicate submission: {unique_id} / {content_address}")]
    DuplicateSubmission {
        unique_id: String,
        content_address: String,
    },

    #[error("No submission found for unique id: {0}")]
    SubmissionNotFound(String),

    #[error("Journal error: {0}")]
    Journal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LedgerError {
    /// Business rejections that leave the ledger untouched and must not be retried.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::UniqueIdMismatch { .. } | Self::Blacklisted(_) | Self::DuplicateSubmission { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
