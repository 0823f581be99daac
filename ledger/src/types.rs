//! Core types for the reputation ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[cfg(feature = "typescript")]
use ts_rs::TS;

/// Reputation granted when an account is created by its first submission.
pub const INITIAL_REPUTATION: i64 = 1;

/// Reputation granted for every successful submit.
pub const SUBMISSION_REWARD: i64 = 2;

/// Reputation removed by a single penalty.
pub const PENALTY: i64 = 1;

/// Kind-specific key/values attached to an event.
pub type EventPayload = BTreeMap<String, serde_json::Value>;

/// One contributor account, keyed by address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct Account {
    /// Stable account key
    pub address: String,
    /// Contributor display name
    pub display_name: String,
    /// Contributor organization
    pub organization: String,
    /// Signed, unbounded reputation score
    pub reputation: i64,
    /// Cached `reputation < 0`
    pub is_blacklisted: bool,
    /// Number of accepted submissions
    pub submission_count: u64,
    /// Unique id bound on first submission, immutable afterwards
    pub bound_unique_id: String,
}

impl Account {
    /// Zero-value account returned for unknown addresses.
    pub fn unknown(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            display_name: String::new(),
            organization: String::new(),
            reputation: 0,
            is_blacklisted: false,
            submission_count: 0,
            bound_unique_id: String::new(),
        }
    }

    /// Whether this account has been created by a submission.
    pub fn exists(&self) -> bool {
        !self.bound_unique_id.is_empty()
    }

    fn sync_blacklist(&mut self) {
        self.is_blacklisted = self.reputation < 0;
    }

    pub(crate) fn apply_delta(&mut self, delta: i64) {
        self.reputation += delta;
        self.sync_blacklist();
    }
}

/// Kind of ledger event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxKind {
    Submission,
    Reward,
    Penalize,
    Blacklist,
    Training,
}

impl TxKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submission => "SUBMISSION",
            Self::Reward => "REWARD",
            Self::Penalize => "PENALIZE",
            Self::Blacklist => "BLACKLIST",
            Self::Training => "TRAINING",
        }
    }

    /// Event name as emitted by the ledger.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Submission => "DataSubmitted",
            Self::Reward => "UserRewarded",
            Self::Penalize => "UserPenalized",
            Self::Blacklist => "UserBlacklisted",
            Self::Training => "ModelTrained",
        }
    }
}

impl std::fmt::Display for TxKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final status of a ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    Success,
    Failed,
}

/// An immutable entry in the ledger's event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct LedgerEvent {
    /// Monotonic per-ledger sequence number
    pub sequence: u64,
    /// Block (operation) that produced this event
    pub block_number: u64,
    /// Hash of the producing transaction
    pub tx_hash: String,
    /// Event kind
    pub kind: TxKind,
    /// Account the event applies to
    pub account: String,
    /// Unique id of the related submission, if any
    pub unique_id: Option<String>,
    /// Content address of the related submission, if any
    pub content_address: Option<String>,
    /// Reputation change applied by this event
    pub delta: i64,
    /// Kind-specific key/values
    pub payload: EventPayload,
    /// When the event was committed
    pub recorded_at: DateTime<Utc>,
}

/// Result of a committed ledger operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct TxResult {
    /// Transaction hash
    pub tx_hash: String,
    /// Block number assigned to the operation
    pub block_number: u64,
    /// Events appended by the operation, in order
    pub events: Vec<LedgerEvent>,
}

impl TxResult {
    /// Whether the operation emitted an event of the given kind.
    pub fn emitted(&self, kind: TxKind) -> bool {
        self.events.iter().any(|e| e.kind == kind)
    }
}

/// Receipt for a transaction, available once the operation has completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct TxReceipt {
    pub tx_hash: String,
    pub block_number: u64,
    pub status: TxStatus,
    /// Revert reason for failed transactions
    pub reason: Option<String>,
}

impl TxReceipt {
    pub fn is_success(&self) -> bool {
        self.status == TxStatus::Success
    }
}

/// Which fields make two submissions duplicates of each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateKey {
    /// The `(unique_id, content_address)` pair
    #[default]
    UniqueIdAndContent,
    /// The content address alone, across all contributors
    ContentOnly,
}
