//! Append-only audit logs.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::collaborators::{AuditLog, CollabResult};
use crate::error::CollaboratorError;
use crate::types::{
    LedgerTransaction, NotificationRecord, SubmissionQuery, SubmissionRecord, TrainingRun,
};

#[derive(Default)]
struct AuditState {
    transactions: Vec<LedgerTransaction>,
    submissions: Vec<SubmissionRecord>,
    training_runs: Vec<TrainingRun>,
    notifications: Vec<NotificationRecord>,
}

/// In-memory audit log.
#[derive(Default)]
pub struct MemoryAuditLog {
    state: Arc<RwLock<AuditState>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append_transaction(&self, tx: LedgerTransaction) -> CollabResult<()> {
        self.state.write().await.transactions.push(tx);
        Ok(())
    }

    async fn transactions(&self, account: Option<&str>) -> CollabResult<Vec<LedgerTransaction>> {
        let state = self.state.read().await;
        let mut txs: Vec<LedgerTransaction> = state
            .transactions
            .iter()
            .filter(|t| account.map_or(true, |a| t.account == a))
            .cloned()
            .collect();
        txs.sort_by_key(|t| t.sequence_number);
        Ok(txs)
    }

    async fn record_submission(&self, record: SubmissionRecord) -> CollabResult<()> {
        self.state.write().await.submissions.push(record);
        Ok(())
    }

    async fn submissions(&self, query: &SubmissionQuery) -> CollabResult<Vec<SubmissionRecord>> {
        let state = self.state.read().await;
        Ok(state
            .submissions
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect())
    }

    async fn record_training_run(&self, run: TrainingRun) -> CollabResult<()> {
        self.state.write().await.training_runs.push(run);
        Ok(())
    }

    async fn training_runs(&self, model_id: Option<&str>) -> CollabResult<Vec<TrainingRun>> {
        let state = self.state.read().await;
        Ok(state
            .training_runs
            .iter()
            .rev()
            .filter(|r| model_id.map_or(true, |m| r.model_id == m))
            .cloned()
            .collect())
    }

    async fn record_notification(&self, record: NotificationRecord) -> CollabResult<()> {
        self.state.write().await.notifications.push(record);
        Ok(())
    }

    async fn notifications(&self) -> CollabResult<Vec<NotificationRecord>> {
        let state = self.state.read().await;
        Ok(state.notifications.iter().rev().cloned().collect())
    }
}

const TRANSACTIONS_FILE: &str = "transactions.jsonl";
const SUBMISSIONS_FILE: &str = "submissions.jsonl";
const TRAINING_RUNS_FILE: &str = "training_runs.jsonl";
const NOTIFICATIONS_FILE: &str = "notifications.jsonl";

/// Audit log persisted as one JSON-lines file per record type.
///
/// Files are loaded into memory on open; every write is appended to its file
/// before it becomes visible to queries.
pub struct JsonlAuditLog {
    dir: PathBuf,
    cache: MemoryAuditLog,
    write_lock: Mutex<()>,
}

impl JsonlAuditLog {
    pub async fn open<P: AsRef<Path>>(dir: P) -> CollabResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;

        let state = AuditState {
            transactions: load_lines(&dir.join(TRANSACTIONS_FILE)).await?,
            submissions: load_lines(&dir.join(SUBMISSIONS_FILE)).await?,
            training_runs: load_lines(&dir.join(TRAINING_RUNS_FILE)).await?,
            notifications: load_lines(&dir.join(NOTIFICATIONS_FILE)).await?,
        };

        info!(
            path = %dir.display(),
            submissions = state.submissions.len(),
            transactions = state.transactions.len(),
            "Opened audit log"
        );

        Ok(Self {
            dir,
            cache: MemoryAuditLog {
                state: Arc::new(RwLock::new(state)),
            },
            write_lock: Mutex::new(()),
        })
    }

    async fn append_line<T: Serialize>(&self, file: &str, value: &T) -> CollabResult<()> {
        let mut line = serde_json::to_vec(value)
            .map_err(|e| CollaboratorError::MalformedOutput(e.to_string()))?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut handle = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(file))
            .await?;
        handle.write_all(&line).await?;
        handle.flush().await?;
        Ok(())
    }
}

async fn load_lines<T: DeserializeOwned>(path: &Path) -> CollabResult<Vec<T>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut items = Vec::new();
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(item) => items.push(item),
            Err(e) => warn!(path = %path.display(), line = index + 1, error = %e, "Skipping unreadable audit line"),
        }
    }
    Ok(items)
}

#[async_trait]
impl AuditLog for JsonlAuditLog {
    async fn append_transaction(&self, tx: LedgerTransaction) -> CollabResult<()> {
        self.append_line(TRANSACTIONS_FILE, &tx).await?;
        self.cache.append_transaction(tx).await
    }

    async fn transactions(&self, account: Option<&str>) -> CollabResult<Vec<LedgerTransaction>> {
        self.cache.transactions(account).await
    }

    async fn record_submission(&self, record: SubmissionRecord) -> CollabResult<()> {
        self.append_line(SUBMISSIONS_FILE, &record).await?;
        self.cache.record_submission(record).await
    }

    async fn submissions(&self, query: &SubmissionQuery) -> CollabResult<Vec<SubmissionRecord>> {
        self.cache.submissions(query).await
    }

    async fn record_training_run(&self, run: TrainingRun) -> CollabResult<()> {
        self.append_line(TRAINING_RUNS_FILE, &run).await?;
        self.cache.record_training_run(run).await
    }

    async fn training_runs(&self, model_id: Option<&str>) -> CollabResult<Vec<TrainingRun>> {
        self.cache.training_runs(model_id).await
    }

    async fn record_notification(&self, record: NotificationRecord) -> CollabResult<()> {
        self.append_line(NOTIFICATIONS_FILE, &record).await?;
        self.cache.record_notification(record).await
    }

    async fn notifications(&self) -> CollabResult<Vec<NotificationRecord>> {
        self.cache.notifications().await
    }
}
